//! Deimos is a declarative render graph for explicit graphics APIs.
//!
//! A client declares a directed acyclic graph of render passes, each naming
//! the logical images and buffers it reads, writes or produces. Baking the
//! graph produces an execution plan before any command is recorded: a
//! topologically ordered pass list, a physically allocated resource pool with
//! transient aliasing and history double-buffering, merged multi-subpass
//! render passes that keep attachment data on-chip, and the minimal set of
//! pipeline-stage/access barriers needed for correctness.
//!
//! The backing device stays external: deimos talks to it through the
//! [`RenderDevice`] and [`CommandRecorder`] traits and only ever holds the
//! image, buffer and command-buffer handles it is given. All descriptor types
//! are plain [`ash::vk`] values.
//!
//! See the [`graph`] module documentation for a usage walkthrough.

pub mod device;
pub mod error;
pub mod graph;
pub mod prelude;

pub use crate::device::{
    AttachmentOps, BufferBarrier, BufferCreateInfo, CommandRecorder, DepthMode, ImageBarrier,
    ImageCreateInfo, RenderDevice, RenderPassBeginInfo, RenderPassInfo, StockSampler,
    SubpassDependency, SubpassInfo,
};
pub use crate::error::Error;
pub use crate::graph::{
    AttachmentInfo, BufferInfo, EmptyPassImplementation, GraphViz, PassBuilder, PassContext,
    RenderGraph, RenderPass, RenderPassImplementation, RenderResource, ResourceDimensions,
    ResourceKind, ShaderBlit, SizeClass, SwapchainEvent,
};
