//! Interfaces the render graph expects from the backing graphics device.
//!
//! The graph never talks to the graphics API directly. Everything it needs from
//! the outside world is captured by two traits: [`RenderDevice`] hands out
//! physical images, buffers and command buffers, and [`CommandRecorder`] is the
//! recording surface barriers and render passes are written to. Pass
//! implementations receive the same recorder and are free to record whatever
//! draw or dispatch commands the concrete device supports on top of it.
//!
//! All descriptor types in this module use plain [`ash::vk`] values, so a
//! Vulkan backend can translate them one to one, and a test double can inspect
//! them without touching a driver.

use std::fmt::Debug;

use anyhow::Result;
use ash::vk;
use derivative::Derivative;

/// The stock sampler objects every device is expected to provide. Used by the
/// shader blit implementation and by texture binding helpers.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StockSampler {
    #[default]
    LinearClamp,
    NearestClamp,
    LinearWrap,
    NearestWrap,
    TrilinearClamp,
    TrilinearWrap,
}

/// Creation parameters for a physical image, produced by the attachment
/// allocator from resolved resource dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCreateInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub levels: u32,
    pub layers: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    /// Request lazily allocated memory. Only set for attachments whose contents
    /// never leave their render pass.
    pub transient: bool,
}

/// Creation parameters for a physical buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferCreateInfo {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

/// A single image barrier. Directly translates to one entry of
/// `vkCmdPipelineBarrier()`.
#[derive(Debug, Clone)]
pub struct ImageBarrier<I> {
    pub image: I,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
}

/// A single buffer barrier. Most drivers implement these as global memory
/// barriers, but the handle is carried along for devices that want ranges.
#[derive(Debug, Clone)]
pub struct BufferBarrier<B> {
    pub buffer: B,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// Load/store behaviour of one attachment over the whole render pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AttachmentOps {
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
}

/// How a subpass uses the depth/stencil attachment.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum DepthMode {
    #[default]
    None,
    ReadOnly,
    ReadWrite,
}

/// One subpass in a render pass descriptor. Attachment references index into
/// the color attachment list of the owning render pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubpassInfo {
    pub color_attachments: Vec<u32>,
    pub input_attachments: Vec<u32>,
    pub depth: DepthMode,
}

/// An execution and memory dependency between two subpasses of the same render
/// pass. Takes the place of a pipeline barrier for attachment data that stays
/// on-chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubpassDependency {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stages: vk::PipelineStageFlags,
    pub dst_stages: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// Device-facing render pass descriptor produced during baking. The device is
/// expected to create (and cache) an API render pass object from this.
#[derive(Debug, Default, Clone)]
pub struct RenderPassInfo {
    /// Per color attachment load/store ops, parallel to the physical color
    /// attachment list of the pass.
    pub color_ops: Vec<AttachmentOps>,
    pub depth_stencil_ops: Option<AttachmentOps>,
    pub subpasses: Vec<SubpassInfo>,
    pub dependencies: Vec<SubpassDependency>,
}

/// Fully resolved arguments for beginning a render pass: the baked descriptor
/// plus this frame's attachment handles and clear values.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct RenderPassBeginInfo<I> {
    pub info: RenderPassInfo,
    pub color_attachments: Vec<I>,
    pub depth_stencil_attachment: Option<I>,
    #[derivative(Debug = "ignore")]
    pub clear_values: Vec<Option<vk::ClearColorValue>>,
    #[derivative(Debug = "ignore")]
    pub depth_clear_value: Option<vk::ClearDepthStencilValue>,
    pub render_area: vk::Extent2D,
}

/// Command recording interface the graph writes the frame to.
///
/// The barrier and render pass entry points are what the executor itself
/// records; the program/texture/draw entry points are the small surface needed
/// by the built-in fullscreen blit paths. Pass implementations typically
/// downcast or extend the concrete recorder with the rest of their command
/// vocabulary.
pub trait CommandRecorder {
    type ImageView: Clone + Debug;
    type Buffer: Clone + Debug;

    fn pipeline_barrier(
        &mut self,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        image_barriers: &[ImageBarrier<Self::ImageView>],
        buffer_barriers: &[BufferBarrier<Self::Buffer>],
    );
    fn begin_render_pass(&mut self, info: &RenderPassBeginInfo<Self::ImageView>);
    fn next_subpass(&mut self);
    fn end_render_pass(&mut self);
    fn bind_blit_program(&mut self, vertex: &str, fragment: &str, defines: &[(String, i32)]);
    fn bind_sampled_image(
        &mut self,
        set: u32,
        binding: u32,
        image: &Self::ImageView,
        sampler: StockSampler,
    );
    fn draw_fullscreen(&mut self);
}

/// The backing graphics device. Owns allocation of physical resources and
/// command buffer lifetime; the graph only ever holds the handles it is given.
///
/// The swapchain image is *not* allocated through this trait. It is owned
/// externally and handed to [`setup_attachments`](crate::RenderGraph::setup_attachments)
/// each time the swapchain changes.
pub trait RenderDevice {
    type ImageView: Clone + Debug;
    type Buffer: Clone + Debug;
    type Recorder: CommandRecorder<ImageView = Self::ImageView, Buffer = Self::Buffer>;

    fn create_image(&mut self, info: &ImageCreateInfo) -> Result<Self::ImageView>;
    fn create_buffer(&mut self, info: &BufferCreateInfo) -> Result<Self::Buffer>;
    fn request_command_buffer(&mut self) -> Result<Self::Recorder>;
    fn submit(&mut self, cmd: Self::Recorder) -> Result<()>;
}
