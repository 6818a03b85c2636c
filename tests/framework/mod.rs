//! Shared test framework: a mock device that records the command stream the
//! graph emits, so tests can assert on barriers, render passes and draws
//! without a GPU.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use deimos::prelude::*;
use deimos::{AttachmentOps, SubpassDependency};

#[derive(Debug)]
pub struct MockImageInner {
    pub id: u64,
    /// `None` for the externally owned swapchain image.
    pub info: Option<ImageCreateInfo>,
}

/// Handle to a mock image; clones share identity.
#[derive(Debug, Clone)]
pub struct MockImage(pub Arc<MockImageInner>);

impl PartialEq for MockImage {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for MockImage {}

#[derive(Debug)]
pub struct MockBufferInner {
    pub id: u64,
    pub info: BufferCreateInfo,
}

/// Handle to a mock buffer; clones share identity.
#[derive(Debug, Clone)]
pub struct MockBuffer(pub Arc<MockBufferInner>);

impl PartialEq for MockBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for MockBuffer {}

/// One recorded command.
#[derive(Debug, Clone)]
pub enum Command {
    ImageBarrier {
        image: MockImage,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    BufferBarrier {
        buffer: MockBuffer,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    },
    BeginRenderPass {
        color_attachments: Vec<MockImage>,
        depth_stencil_attachment: Option<MockImage>,
        color_ops: Vec<AttachmentOps>,
        subpass_count: usize,
        dependencies: Vec<SubpassDependency>,
        clear_values: Vec<Option<[f32; 4]>>,
        render_area: (u32, u32),
    },
    NextSubpass,
    EndRenderPass,
    BindProgram {
        vertex: String,
        fragment: String,
    },
    BindTexture {
        set: u32,
        binding: u32,
        image: MockImage,
        sampler: StockSampler,
    },
    Draw,
}

#[derive(Debug, Default)]
pub struct MockRecorder {
    pub commands: Vec<Command>,
}

impl CommandRecorder for MockRecorder {
    type ImageView = MockImage;
    type Buffer = MockBuffer;

    fn pipeline_barrier(
        &mut self,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        image_barriers: &[ImageBarrier<MockImage>],
        buffer_barriers: &[BufferBarrier<MockBuffer>],
    ) {
        for barrier in image_barriers {
            self.commands.push(Command::ImageBarrier {
                image: barrier.image.clone(),
                src_stages,
                dst_stages,
                src_access: barrier.src_access,
                dst_access: barrier.dst_access,
                old_layout: barrier.old_layout,
                new_layout: barrier.new_layout,
            });
        }
        for barrier in buffer_barriers {
            self.commands.push(Command::BufferBarrier {
                buffer: barrier.buffer.clone(),
                src_stages,
                dst_stages,
                src_access: barrier.src_access,
                dst_access: barrier.dst_access,
            });
        }
    }

    fn begin_render_pass(&mut self, info: &RenderPassBeginInfo<MockImage>) {
        self.commands.push(Command::BeginRenderPass {
            color_attachments: info.color_attachments.clone(),
            depth_stencil_attachment: info.depth_stencil_attachment.clone(),
            color_ops: info.info.color_ops.clone(),
            subpass_count: info.info.subpasses.len(),
            dependencies: info.info.dependencies.clone(),
            clear_values: info
                .clear_values
                .iter()
                .map(|clear| clear.map(|value| unsafe { value.float32 }))
                .collect(),
            render_area: (info.render_area.width, info.render_area.height),
        });
    }

    fn next_subpass(&mut self) {
        self.commands.push(Command::NextSubpass);
    }

    fn end_render_pass(&mut self) {
        self.commands.push(Command::EndRenderPass);
    }

    fn bind_blit_program(&mut self, vertex: &str, fragment: &str, _defines: &[(String, i32)]) {
        self.commands.push(Command::BindProgram {
            vertex: vertex.to_owned(),
            fragment: fragment.to_owned(),
        });
    }

    fn bind_sampled_image(&mut self, set: u32, binding: u32, image: &MockImage, sampler: StockSampler) {
        self.commands.push(Command::BindTexture {
            set,
            binding,
            image: image.clone(),
            sampler,
        });
    }

    fn draw_fullscreen(&mut self) {
        self.commands.push(Command::Draw);
    }
}

#[derive(Debug, Default)]
pub struct MockDevice {
    next_id: u64,
    pub created_images: Vec<MockImage>,
    pub created_buffers: Vec<MockBuffer>,
    pub submitted: Vec<Vec<Command>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// An externally owned swapchain image.
    pub fn swapchain_image(&mut self) -> MockImage {
        self.next_id += 1;
        MockImage(Arc::new(MockImageInner {
            id: self.next_id,
            info: None,
        }))
    }

    /// The command stream of the most recently submitted frame.
    pub fn last_frame(&self) -> &[Command] {
        self.submitted.last().map(Vec::as_slice).unwrap_or(&[])
    }
}

impl RenderDevice for MockDevice {
    type ImageView = MockImage;
    type Buffer = MockBuffer;
    type Recorder = MockRecorder;

    fn create_image(&mut self, info: &ImageCreateInfo) -> Result<MockImage> {
        self.next_id += 1;
        let image = MockImage(Arc::new(MockImageInner {
            id: self.next_id,
            info: Some(info.clone()),
        }));
        self.created_images.push(image.clone());
        Ok(image)
    }

    fn create_buffer(&mut self, info: &BufferCreateInfo) -> Result<MockBuffer> {
        self.next_id += 1;
        let buffer = MockBuffer(Arc::new(MockBufferInner {
            id: self.next_id,
            info: info.clone(),
        }));
        self.created_buffers.push(buffer.clone());
        Ok(buffer)
    }

    fn request_command_buffer(&mut self) -> Result<MockRecorder> {
        Ok(MockRecorder::default())
    }

    fn submit(&mut self, cmd: MockRecorder) -> Result<()> {
        self.submitted.push(cmd.commands);
        Ok(())
    }
}

/// Swapchain dimension record shared by most tests.
pub fn swapchain_dimensions(width: u32, height: u32) -> ResourceDimensions {
    ResourceDimensions {
        format: vk::Format::B8G8R8A8_SRGB,
        width,
        height,
        ..Default::default()
    }
}

/// A non-persistent, swapchain-relative attachment.
pub fn scratch_attachment(format: vk::Format) -> AttachmentInfo {
    AttachmentInfo {
        format,
        persistent: false,
        ..Default::default()
    }
}

/// Downcast an `anyhow::Error` to the crate error for matching.
pub fn graph_error(error: &anyhow::Error) -> &Error {
    error
        .downcast_ref::<Error>()
        .expect("expected a deimos::Error")
}
