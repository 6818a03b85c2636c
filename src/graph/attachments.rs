//! The attachment allocator: materializing the baked plan's physical images
//! and buffers through the device.

use anyhow::Result;
use ash::vk;
use log::trace;

use crate::device::{BufferCreateInfo, ImageCreateInfo, RenderDevice};
use crate::error::Error;
use crate::graph::render_graph::RenderGraph;
use crate::graph::resource::ResourceDimensions;

impl<D: RenderDevice> RenderGraph<D> {
    /// Materialize physical resources for the baked plan and bind the
    /// externally owned swapchain image into its reserved slot.
    ///
    /// Persistent resources survive the call when their dimensions are
    /// unchanged; transients and non-persistent images are recreated freely.
    /// History-enabled slots get a second image that is swapped in after every
    /// frame.
    pub fn setup_attachments(&mut self, device: &mut D, swapchain: D::ImageView) -> Result<()> {
        let plan = self.baked.as_ref().ok_or(Error::NotBaked)?;
        let count = plan.physical.dimensions.len();
        self.physical_attachments.resize_with(count, || None);
        self.physical_history_attachments.resize_with(count, || None);
        self.physical_buffers.resize_with(count, || None);
        self.allocated_dimensions.resize_with(count, || None);
        self.attachment_cold.resize(count, true);
        self.history_valid.resize(count, false);

        for index in 0..count {
            let dimensions = &plan.physical.dimensions[index];
            if index == plan.physical.swapchain_physical_index {
                self.physical_attachments[index] = Some(swapchain.clone());
                self.attachment_cold[index] = true;
                self.allocated_dimensions[index] = Some(dimensions.clone());
                continue;
            }
            let unchanged = self.allocated_dimensions[index].as_ref() == Some(dimensions);
            if dimensions.is_buffer() {
                let keep = unchanged
                    && dimensions.buffer_info.persistent
                    && self.physical_buffers[index].is_some();
                if !keep {
                    trace!("allocating physical buffer #{index}: {dimensions:?}");
                    self.physical_buffers[index] = Some(device.create_buffer(&BufferCreateInfo {
                        size: dimensions.buffer_info.size,
                        usage: dimensions.buffer_info.usage,
                    })?);
                    self.attachment_cold[index] = true;
                }
            } else {
                let history = plan.physical.has_history[index];
                let keep = unchanged
                    && dimensions.persistent
                    && self.physical_attachments[index].is_some()
                    && (!history || self.physical_history_attachments[index].is_some());
                if !keep {
                    trace!("allocating physical image #{index}: {dimensions:?}");
                    let info = image_create_info(dimensions);
                    self.physical_attachments[index] = Some(device.create_image(&info)?);
                    self.physical_history_attachments[index] = if history {
                        Some(device.create_image(&info)?)
                    } else {
                        None
                    };
                    self.attachment_cold[index] = true;
                    self.history_valid[index] = false;
                }
            }
            self.allocated_dimensions[index] = Some(dimensions.clone());
        }
        Ok(())
    }

    /// Drop every physical allocation. Invoked on swapchain destruction.
    pub fn release_attachments(&mut self) {
        self.physical_attachments.clear();
        self.physical_history_attachments.clear();
        self.physical_buffers.clear();
        self.allocated_dimensions.clear();
        self.attachment_cold.clear();
        self.history_valid.clear();
    }
}

fn image_create_info(dimensions: &ResourceDimensions) -> ImageCreateInfo {
    let mut usage = if is_depth_format(dimensions.format) {
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
    } else {
        vk::ImageUsageFlags::COLOR_ATTACHMENT
    };
    if dimensions.storage {
        usage |= vk::ImageUsageFlags::STORAGE;
    }
    if dimensions.transient {
        usage |= vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT;
    } else {
        usage |= vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::INPUT_ATTACHMENT;
    }
    ImageCreateInfo {
        width: dimensions.width,
        height: dimensions.height,
        depth: dimensions.depth,
        levels: dimensions.levels,
        layers: dimensions.layers,
        format: dimensions.format,
        usage,
        transient: dimensions.transient,
    }
}

pub(crate) fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}
