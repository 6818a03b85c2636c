//! The render graph system: declare passes and the resources flowing between
//! them, and let [`bake()`](RenderGraph::bake) turn the declaration into an
//! executable plan — a topologically ordered pass list, a physically
//! allocated (and aliased) resource pool, merged multi-subpass render passes,
//! and the exact set of pipeline barriers the frame needs. Nothing is
//! recorded until [`enqueue_render_passes()`](RenderGraph::enqueue_render_passes)
//! walks the plan.
//!
//! Resources are referenced by string name at declaration time only;
//! internally everything is an arena index. Rebuilding the graph is never
//! needed per frame: bake once, re-bake when the swapchain or the frame
//! structure changes.
//!
//! # Example
//!
//! A depth-prepass feeding a lighting pass that reads the depth buffer as a
//! subpass-local input:
//! ```no_run
//! # use deimos::prelude::*;
//! # use ash::vk;
//! # fn build<D: RenderDevice>(graph: &mut RenderGraph<D>) -> anyhow::Result<()> {
//! let depth = AttachmentInfo::with_format(vk::Format::D32_SFLOAT);
//!
//! let mut geometry = graph.add_pass("geometry", vk::PipelineStageFlags::FRAGMENT_SHADER);
//! geometry.add_color_output("albedo", AttachmentInfo::default(), None)?;
//! geometry.set_depth_stencil_output("depth", depth)?;
//! geometry.set_implementation(EmptyPassImplementation);
//!
//! let mut lighting = graph.add_pass("lighting", vk::PipelineStageFlags::FRAGMENT_SHADER);
//! lighting.add_attachment_input("albedo")?;
//! lighting.set_depth_stencil_input("depth")?;
//! lighting.add_color_output("hdr", AttachmentInfo::default(), None)?;
//! lighting.set_implementation(ShaderBlit::new("quad.vert", "lighting.frag"));
//!
//! graph.set_backbuffer_source("hdr");
//! graph.bake()?;
//! # Ok(())
//! # }
//! ```
//! Both passes end up in one physical render pass with two subpasses; the
//! albedo and depth reads are synchronized with subpass dependencies instead
//! of pipeline barriers, and `albedo`/`depth` become transient attachments
//! that may never leave tile memory.

pub mod pass;
pub mod render_graph;
pub mod resource;

pub(crate) mod attachments;
pub(crate) mod barrier;
pub(crate) mod dependency;
pub(crate) mod physical_pass;
pub(crate) mod physical_resource;
pub(crate) mod record;

pub use barrier::{Barrier, BarrierInstruction, FrameBarriers, HistoryRead};
pub use pass::{
    EmptyPassImplementation, PassBuilder, PassContext, RenderPass, RenderPassImplementation,
    ShaderBlit,
};
pub use physical_pass::{ColorClearRequest, DepthClearRequest, PhysicalPass, ScaledClearRequest};
pub use render_graph::{GraphViz, RenderGraph, SwapchainEvent};
pub use resource::{
    AttachmentInfo, BufferInfo, RenderResource, ResourceDimensions, ResourceKind, SizeClass,
};
