//! Convenient re-exports of the types almost every user of the crate needs.

pub use crate::device::{
    BufferBarrier, BufferCreateInfo, CommandRecorder, ImageBarrier, ImageCreateInfo, RenderDevice,
    RenderPassBeginInfo, StockSampler,
};
pub use crate::error::Error;
pub use crate::graph::pass::{
    EmptyPassImplementation, PassBuilder, PassContext, RenderPassImplementation, ShaderBlit,
};
pub use crate::graph::render_graph::{GraphViz, RenderGraph, SwapchainEvent};
pub use crate::graph::resource::{AttachmentInfo, BufferInfo, ResourceDimensions, SizeClass};
