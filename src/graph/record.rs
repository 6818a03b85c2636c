//! The executor: walking the baked plan and recording one frame into a device
//! command buffer.

use anyhow::Result;
use ash::vk;

use crate::device::{
    BufferBarrier, CommandRecorder, ImageBarrier, RenderDevice, RenderPassBeginInfo, StockSampler,
};
use crate::error::Error;
use crate::graph::barrier::BarrierInstruction;
use crate::graph::pass::{PassContext, RenderPassImplementation};
use crate::graph::physical_pass::PhysicalPass;
use crate::graph::physical_pass::ScaledClearRequest;
use crate::graph::resource::ResourceDimensions;

use crate::graph::render_graph::RenderGraph;

impl<D: RenderDevice> RenderGraph<D> {
    /// Record and submit one frame: frame-boundary barriers, then for every
    /// physical pass its invalidate barriers, render pass (with scaled blits
    /// and one implementation callback per subpass) or compute callback, and
    /// finally the present transition and the history image swap.
    pub fn enqueue_render_passes(&mut self, device: &mut D) -> Result<()> {
        let plan = self.baked.as_ref().ok_or(Error::NotBaked)?;
        if self.physical_attachments.len() != plan.physical.dimensions.len() {
            return Err(Error::AttachmentsNotReady.into());
        }
        let mut cmd = device.request_command_buffer()?;

        // Frame-boundary barriers. Freshly created images come out of
        // UNDEFINED; everything else wraps around from last frame's final
        // state.
        let mut boundary: Vec<BarrierInstruction> = Vec::new();
        for cold in &plan.barriers.initial {
            if self.attachment_cold[cold.resource] {
                boundary.push(*cold);
            } else if let Some(warm) = plan
                .barriers
                .steady
                .iter()
                .find(|warm| warm.resource == cold.resource)
            {
                boundary.push(*warm);
            }
        }
        emit_barriers::<D>(
            &mut cmd,
            &boundary,
            &plan.physical.dimensions,
            &self.physical_attachments,
            &self.physical_buffers,
        )?;

        // History images become readable before any pass samples them.
        for read in &plan.barriers.history_reads {
            if !self.history_valid[read.resource] {
                continue;
            }
            let image = self.physical_history_attachments[read.resource]
                .as_ref()
                .ok_or(Error::NoResourceBound(read.resource))?;
            cmd.pipeline_barrier(
                read.src_stages,
                read.dst_stages,
                &[ImageBarrier {
                    image: image.clone(),
                    src_access: read.src_access,
                    dst_access: vk::AccessFlags::SHADER_READ,
                    old_layout: read.old_layout,
                    new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }],
                &[],
            );
        }

        for physical_pass in &plan.physical_passes {
            emit_barriers::<D>(
                &mut cmd,
                &physical_pass.invalidate,
                &plan.physical.dimensions,
                &self.physical_attachments,
                &self.physical_buffers,
            )?;
            match &physical_pass.render_pass_info {
                Some(info) => {
                    let begin = begin_info(
                        physical_pass,
                        info.clone(),
                        &plan.physical.dimensions,
                        &self.physical_attachments,
                        &self.implementations,
                    )?;
                    cmd.begin_render_pass(&begin);
                    for (subpass, &pass_index) in physical_pass.passes.iter().enumerate() {
                        if subpass > 0 {
                            cmd.next_subpass();
                        }
                        enqueue_scaled_requests::<D>(
                            &mut cmd,
                            &physical_pass.scaled_clear_requests[subpass],
                            &self.physical_attachments,
                        )?;
                        let context = PassContext {
                            pass: &self.passes[pass_index],
                            resources: &self.resources,
                            attachments: &self.physical_attachments,
                            history: &self.physical_history_attachments,
                            history_valid: &self.history_valid,
                            buffers: &self.physical_buffers,
                        };
                        let implementation = self.implementations[pass_index]
                            .as_mut()
                            .ok_or_else(|| {
                                Error::MissingImplementation(self.passes[pass_index].name.clone())
                            })?;
                        implementation.build_render_pass(&context, &mut cmd)?;
                    }
                    cmd.end_render_pass();
                }
                None => {
                    for &pass_index in &physical_pass.passes {
                        let context = PassContext {
                            pass: &self.passes[pass_index],
                            resources: &self.resources,
                            attachments: &self.physical_attachments,
                            history: &self.physical_history_attachments,
                            history_valid: &self.history_valid,
                            buffers: &self.physical_buffers,
                        };
                        let implementation = self.implementations[pass_index]
                            .as_mut()
                            .ok_or_else(|| {
                                Error::MissingImplementation(self.passes[pass_index].name.clone())
                            })?;
                        implementation.build_render_pass(&context, &mut cmd)?;
                    }
                }
            }
        }

        if let Some(present) = &plan.barriers.present {
            emit_barriers::<D>(
                &mut cmd,
                std::slice::from_ref(present),
                &plan.physical.dimensions,
                &self.physical_attachments,
                &self.physical_buffers,
            )?;
        }

        device.submit(cmd)?;

        // Swap history images: what was written this frame becomes next
        // frame's history.
        for (index, &has_history) in plan.physical.has_history.iter().enumerate() {
            if has_history {
                let current = self.physical_attachments[index].take();
                let previous = self.physical_history_attachments[index].take();
                self.physical_attachments[index] = previous;
                self.physical_history_attachments[index] = current;
                self.history_valid[index] = true;
            }
        }
        for cold in &mut self.attachment_cold {
            *cold = false;
        }
        Ok(())
    }
}

fn emit_barriers<D: RenderDevice>(
    cmd: &mut D::Recorder,
    instructions: &[BarrierInstruction],
    dimensions: &[ResourceDimensions],
    attachments: &[Option<D::ImageView>],
    buffers: &[Option<D::Buffer>],
) -> Result<()> {
    for instruction in instructions {
        if dimensions[instruction.resource].is_buffer() {
            let buffer = buffers[instruction.resource]
                .as_ref()
                .ok_or(Error::NoResourceBound(instruction.resource))?;
            cmd.pipeline_barrier(
                instruction.src_stages,
                instruction.dst_stages,
                &[],
                &[BufferBarrier {
                    buffer: buffer.clone(),
                    src_access: instruction.src_access,
                    dst_access: instruction.dst_access,
                }],
            );
        } else {
            let image = attachments[instruction.resource]
                .as_ref()
                .ok_or(Error::NoResourceBound(instruction.resource))?;
            cmd.pipeline_barrier(
                instruction.src_stages,
                instruction.dst_stages,
                &[ImageBarrier {
                    image: image.clone(),
                    src_access: instruction.src_access,
                    dst_access: instruction.dst_access,
                    old_layout: instruction.old_layout,
                    new_layout: instruction.new_layout,
                }],
                &[],
            );
        }
    }
    Ok(())
}

type Implementations<D> = [Option<Box<dyn RenderPassImplementation<D>>>];

fn begin_info<D: RenderDevice>(
    physical_pass: &PhysicalPass,
    info: crate::device::RenderPassInfo,
    dimensions: &[ResourceDimensions],
    attachments: &[Option<D::ImageView>],
    implementations: &Implementations<D>,
) -> Result<RenderPassBeginInfo<D::ImageView>> {
    let color_attachments = physical_pass
        .physical_color_attachments
        .iter()
        .map(|&slot| {
            attachments[slot]
                .clone()
                .ok_or_else(|| Error::NoResourceBound(slot).into())
        })
        .collect::<Result<Vec<_>>>()?;
    let depth_stencil_attachment = match physical_pass.physical_depth_stencil_attachment {
        Some(slot) => Some(
            attachments[slot]
                .clone()
                .ok_or(Error::NoResourceBound(slot))?,
        ),
        None => None,
    };

    let mut clear_values = vec![None; color_attachments.len()];
    for request in &physical_pass.color_clear_requests {
        clear_values[request.attachment] = implementations[request.pass]
            .as_ref()
            .and_then(|implementation| implementation.get_clear_color(request.index));
    }
    let depth_clear_value = physical_pass.depth_clear_request.as_ref().and_then(|request| {
        implementations[request.pass]
            .as_ref()
            .and_then(|implementation| implementation.get_clear_depth_stencil())
    });

    let area_slot = physical_pass
        .physical_color_attachments
        .first()
        .copied()
        .or(physical_pass.physical_depth_stencil_attachment)
        .ok_or(Error::Uncategorized("render pass without attachments"))?;
    let render_area = vk::Extent2D {
        width: dimensions[area_slot].width,
        height: dimensions[area_slot].height,
    };

    Ok(RenderPassBeginInfo {
        info,
        color_attachments,
        depth_stencil_attachment,
        clear_values,
        depth_clear_value,
        render_area,
    })
}

/// Scaled color inputs resolve through a fullscreen sampling blit recorded
/// before the consuming subpass's own commands.
fn enqueue_scaled_requests<D: RenderDevice>(
    cmd: &mut D::Recorder,
    requests: &[ScaledClearRequest],
    attachments: &[Option<D::ImageView>],
) -> Result<()> {
    if requests.is_empty() {
        return Ok(());
    }
    cmd.bind_blit_program("blit.vert", "blit.frag", &[]);
    for request in requests {
        let image = attachments[request.physical_resource]
            .as_ref()
            .ok_or(Error::NoResourceBound(request.physical_resource))?;
        cmd.bind_sampled_image(0, request.target as u32, image, StockSampler::LinearClamp);
        cmd.draw_fullscreen();
    }
    Ok(())
}
