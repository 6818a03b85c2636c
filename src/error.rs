//! Exposes the deimos error type

use thiserror::Error;

/// Error type that deimos can return. Everything here is surfaced synchronously
/// from [`bake()`](crate::RenderGraph::bake) or from frame setup/recording; no partial
/// plan is ever left installed when baking fails.
#[derive(Error, Debug)]
pub enum Error {
    /// The pass dependency graph contains a cycle and cannot be ordered.
    #[error("Render graph contains a cycle through pass `{0}`.")]
    GraphHasCycle(String),
    /// A pass consumes a resource that no pass produces.
    #[error("Resource `{0}` is read but never written.")]
    UnproducedResource(String),
    /// The same name was used both as an image and as a buffer.
    #[error("Resource `{0}` is used both as an image and as a buffer.")]
    ResourceTypeMismatch(String),
    /// An input-relative attachment references an unknown resource, or size
    /// relations form a cycle.
    #[error("Cannot resolve physical dimensions for resource `{0}`.")]
    UnresolvedDimensions(String),
    /// A pass survived dependency analysis but has no implementation set.
    #[error("Pass `{0}` is part of the frame but has no implementation set.")]
    MissingImplementation(String),
    /// A pass consumes one of its own outputs without declaring an input twin.
    #[error("Pass `{0}` depends on itself through resource `{1}`.")]
    SelfDependency(String, String),
    /// No backbuffer source was set before baking.
    #[error("No backbuffer source set.")]
    NoBackbufferSource,
    /// The graph was not baked, or was mutated after the last bake.
    #[error("Render graph was not baked.")]
    NotBaked,
    /// Physical attachments were not set up since the last bake.
    #[error("Physical attachments were not set up.")]
    AttachmentsNotReady,
    /// No physical resource exists at the given physical index.
    #[error("No physical resource bound at index {0}.")]
    NoResourceBound(usize),
    /// A resource is used with conflicting image layouts inside a single pass.
    #[error("Resource `{0}` is used with conflicting layouts within one pass.")]
    ConflictingLayouts(String),
    /// Uncategorized error.
    #[error("Uncategorized error: `{0}`")]
    Uncategorized(&'static str),
}
