//! Physical pass construction: merging runs of compatible logical passes into
//! one multi-subpass render pass and synthesizing its descriptor.
//!
//! Merging is greedy over the baked order. A candidate joins the current group
//! only when everything it shares with the group can stay on-chip: its reads
//! of group outputs go through attachment-input or color-input edges, its
//! attachments agree with the group's on physical index and extent, and no
//! storage access crossing the boundary would need a real pipeline barrier.
//! Two adjacent raster passes with no subpass-local interaction stay separate;
//! merging buys nothing there. Compute-only passes always stand alone.

use std::collections::HashMap;

use ash::vk;

use crate::device::{
    AttachmentOps, DepthMode, RenderDevice, RenderPassInfo, SubpassDependency, SubpassInfo,
};
use crate::graph::barrier::{Barrier, BarrierInstruction};
use crate::graph::pass::{RenderPass, RenderPassImplementation};
use crate::graph::resource::{RenderResource, ResourceDimensions};

/// Deferred clear of one color attachment. The implementation is queried for
/// the actual value when the frame is recorded.
#[derive(Debug, Copy, Clone)]
pub struct ColorClearRequest {
    /// Logical pass whose implementation provides the value.
    pub pass: usize,
    /// Color output slot on that pass.
    pub index: usize,
    /// Attachment slot in the physical pass.
    pub attachment: usize,
}

#[derive(Debug, Copy, Clone)]
pub struct DepthClearRequest {
    pub pass: usize,
}

/// Fullscreen blit from a differently sized source, queued before the subpass
/// whose color input was promoted to a scaled input.
#[derive(Debug, Copy, Clone)]
pub struct ScaledClearRequest {
    /// Color slot on the consuming pass, also the binding the blit samples to.
    pub target: usize,
    pub physical_resource: usize,
}

/// One merged render pass unit of the executable plan.
#[derive(Debug)]
pub struct PhysicalPass {
    /// Logical passes in subpass order. A single compute pass for non-raster
    /// groups.
    pub passes: Vec<usize>,
    pub invalidate: Vec<BarrierInstruction>,
    pub flush: Vec<Barrier>,
    /// Render pass descriptor; `None` for compute-only groups.
    pub render_pass_info: Option<RenderPassInfo>,
    /// Physical indices of the color attachments, in slot order.
    pub physical_color_attachments: Vec<usize>,
    pub physical_depth_stencil_attachment: Option<usize>,
    pub color_clear_requests: Vec<ColorClearRequest>,
    pub depth_clear_request: Option<DepthClearRequest>,
    /// Per subpass, the scaled-input blits to run before its contents.
    pub scaled_clear_requests: Vec<Vec<ScaledClearRequest>>,
}

/// Greedily merge the ordered pass list into physical passes and assign each
/// logical pass its physical pass index.
pub(crate) fn build_physical_passes(
    passes: &mut [RenderPass],
    resources: &[RenderResource],
    order: &[usize],
    dimensions: &[ResourceDimensions],
) -> Vec<PhysicalPass> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for &index in order {
        let merge = match groups.last() {
            Some(group) => should_merge(passes, resources, dimensions, group, index),
            None => false,
        };
        if merge {
            groups.last_mut().unwrap().push(index);
        } else {
            groups.push(vec![index]);
        }
    }

    let physical_passes: Vec<PhysicalPass> = groups
        .into_iter()
        .map(|group| PhysicalPass {
            passes: group,
            invalidate: Vec::new(),
            flush: Vec::new(),
            render_pass_info: None,
            physical_color_attachments: Vec::new(),
            physical_depth_stencil_attachment: None,
            color_clear_requests: Vec::new(),
            depth_clear_request: None,
            scaled_clear_requests: Vec::new(),
        })
        .collect();

    for (physical_index, physical_pass) in physical_passes.iter().enumerate() {
        for &pass in &physical_pass.passes {
            passes[pass].physical_pass = Some(physical_index);
        }
    }
    physical_passes
}

fn should_merge(
    passes: &[RenderPass],
    resources: &[RenderResource],
    dimensions: &[ResourceDimensions],
    group: &[usize],
    candidate: usize,
) -> bool {
    let cand = &passes[candidate];
    if !cand.is_raster() || group.iter().any(|&g| !passes[g].is_raster()) {
        return false;
    }

    let slot = |r: usize| resources[r].physical_index.unwrap();

    let mut group_color_writes: Vec<usize> = Vec::new();
    let mut group_writes: Vec<usize> = Vec::new();
    let mut group_sampled_reads: Vec<usize> = Vec::new();
    let mut group_depth: Option<usize> = None;
    let mut group_depth_written = false;
    // Which resource occupies each attachment slot; an alias sneaking a second
    // resource onto the same slot would overlap live ranges when merged.
    let mut attachment_owner: HashMap<usize, usize> = HashMap::new();
    let mut attachment_slots: Vec<usize> = Vec::new();

    for &g in group {
        let pass = &passes[g];
        for &r in &pass.color_outputs {
            group_color_writes.push(slot(r));
            group_writes.push(slot(r));
        }
        for &r in pass
            .storage_texture_outputs
            .iter()
            .chain(&pass.storage_outputs)
        {
            group_writes.push(slot(r));
        }
        if let Some(r) = pass.depth_stencil_output {
            group_writes.push(slot(r));
            group_depth = Some(slot(r));
            group_depth_written = true;
        }
        if let Some(r) = pass.depth_stencil_input {
            group_depth.get_or_insert(slot(r));
        }
        for &r in pass
            .texture_inputs
            .iter()
            .chain(pass.color_scale_inputs.iter().flatten())
            .chain(&pass.storage_texture_read_inputs)
            .chain(&pass.uniform_inputs)
            .chain(&pass.storage_read_inputs)
        {
            group_sampled_reads.push(slot(r));
        }
        for &r in pass
            .color_outputs
            .iter()
            .chain(pass.color_inputs.iter().flatten())
            .chain(&pass.attachment_inputs)
            .chain(pass.depth_stencil_output.iter())
            .chain(pass.depth_stencil_input.iter())
        {
            attachment_owner.entry(slot(r)).or_insert(r);
            attachment_slots.push(slot(r));
        }
    }

    // Reads that must go through a sampler (or plain memory) force a pipeline
    // barrier against the group's writes.
    for &r in cand
        .texture_inputs
        .iter()
        .chain(cand.color_scale_inputs.iter().flatten())
        .chain(&cand.storage_texture_read_inputs)
        .chain(cand.storage_texture_inputs.iter().flatten())
        .chain(&cand.uniform_inputs)
        .chain(&cand.storage_read_inputs)
        .chain(cand.storage_inputs.iter().flatten())
    {
        if group_writes.contains(&slot(r)) {
            return false;
        }
    }
    // Storage writes never stay subpass-local.
    for &r in cand
        .storage_texture_outputs
        .iter()
        .chain(&cand.storage_outputs)
    {
        let s = slot(r);
        if group_writes.contains(&s) || group_sampled_reads.contains(&s) {
            return false;
        }
    }
    // Write-after-read against the group's sampled reads needs a barrier too.
    for &r in cand.color_outputs.iter().chain(cand.depth_stencil_output.iter()) {
        if group_sampled_reads.contains(&slot(r)) {
            return false;
        }
    }

    // Depth attachments must agree where both sides have one.
    let cand_depth = cand
        .depth_stencil_output
        .or(cand.depth_stencil_input)
        .map(slot);
    if let (Some(a), Some(b)) = (group_depth, cand_depth) {
        if a != b {
            return false;
        }
    }

    // Shared attachment slots must be the same logical resource.
    let mut cand_attachments: Vec<usize> = Vec::new();
    for &r in cand
        .color_outputs
        .iter()
        .chain(cand.color_inputs.iter().flatten())
        .chain(&cand.attachment_inputs)
        .chain(cand.depth_stencil_output.iter())
        .chain(cand.depth_stencil_input.iter())
    {
        let s = slot(r);
        if let Some(&owner) = attachment_owner.get(&s) {
            if owner != r {
                return false;
            }
        }
        cand_attachments.push(s);
    }

    // One render area: all attachments share their extent.
    if let Some(&first) = attachment_slots.first().or(cand_attachments.first()) {
        let reference = &dimensions[first];
        for &s in attachment_slots.iter().chain(&cand_attachments) {
            let d = &dimensions[s];
            if (d.width, d.height, d.layers) != (reference.width, reference.height, reference.layers)
            {
                return false;
            }
        }
    }

    // Merging pays off only when the candidate consumes group data
    // subpass-locally.
    let attachment_reads = cand
        .attachment_inputs
        .iter()
        .chain(cand.color_inputs.iter().flatten());
    let mut interaction = attachment_reads
        .map(|&r| slot(r))
        .any(|s| group_writes.contains(&s));
    if let (Some(d), true) = (cand_depth, group_depth_written) {
        interaction |= group_depth == Some(d);
    }
    interaction
}

/// Build each raster group's render pass descriptor: attachment slots, load
/// and store ops, subpasses, subpass dependencies, and the clear and scaled
/// blit request queues.
pub(crate) fn build_render_pass_info<D: RenderDevice>(
    passes: &[RenderPass],
    resources: &[RenderResource],
    implementations: &[Option<Box<dyn RenderPassImplementation<D>>>],
    dimensions: &[ResourceDimensions],
    has_history: &[bool],
    swapchain_physical_index: usize,
    physical_passes: &mut [PhysicalPass],
) {
    for (physical_index, physical_pass) in physical_passes.iter_mut().enumerate() {
        physical_pass.scaled_clear_requests = physical_pass
            .passes
            .iter()
            .map(|&pass| {
                passes[pass]
                    .color_scale_inputs
                    .iter()
                    .enumerate()
                    .filter_map(|(target, input)| {
                        input.map(|r| ScaledClearRequest {
                            target,
                            physical_resource: resources[r].physical_index.unwrap(),
                        })
                    })
                    .collect()
            })
            .collect();

        if !physical_pass.passes.iter().all(|&p| passes[p].is_raster()) {
            continue;
        }

        let mut color_slots: Vec<usize> = Vec::new();
        let mut depth_slot: Option<usize> = None;
        let mut subpasses: Vec<SubpassInfo> = Vec::new();
        let mut dependencies: Vec<SubpassDependency> = Vec::new();
        let mut color_loads: Vec<Option<vk::AttachmentLoadOp>> = Vec::new();
        let mut depth_load: Option<vk::AttachmentLoadOp> = None;
        let mut color_writer: HashMap<usize, u32> = HashMap::new();
        let mut depth_writer: Option<u32> = None;

        for (local, &pass_index) in physical_pass.passes.iter().enumerate() {
            let local = local as u32;
            let pass = &passes[pass_index];
            let mut subpass = SubpassInfo::default();

            for (i, &output) in pass.color_outputs.iter().enumerate() {
                let physical = resources[output].physical_index.unwrap();
                let slot = attachment_slot(&mut color_slots, &mut color_loads, physical);
                subpass.color_attachments.push(slot as u32);
                if color_loads[slot].is_none() {
                    let op = if pass.color_inputs[i].is_some() {
                        vk::AttachmentLoadOp::LOAD
                    } else if clear_color(implementations, pass_index, i).is_some() {
                        physical_pass.color_clear_requests.push(ColorClearRequest {
                            pass: pass_index,
                            index: i,
                            attachment: slot,
                        });
                        vk::AttachmentLoadOp::CLEAR
                    } else {
                        vk::AttachmentLoadOp::DONT_CARE
                    };
                    color_loads[slot] = Some(op);
                }
                color_writer.insert(physical, local);
            }

            for &input in &pass.attachment_inputs {
                let physical = resources[input].physical_index.unwrap();
                if depth_slot == Some(physical) {
                    if let Some(src) = depth_writer.filter(|&src| src != local) {
                        push_dependency(
                            &mut dependencies,
                            src,
                            local,
                            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                            vk::PipelineStageFlags::FRAGMENT_SHADER,
                            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                            vk::AccessFlags::INPUT_ATTACHMENT_READ,
                        );
                    }
                    continue;
                }
                let slot = attachment_slot(&mut color_slots, &mut color_loads, physical);
                subpass.input_attachments.push(slot as u32);
                if color_loads[slot].is_none() {
                    // Produced outside this physical pass.
                    color_loads[slot] = Some(vk::AttachmentLoadOp::LOAD);
                }
                if let Some(&src) = color_writer.get(&physical) {
                    if src != local {
                        push_dependency(
                            &mut dependencies,
                            src,
                            local,
                            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                            vk::PipelineStageFlags::FRAGMENT_SHADER,
                            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                            vk::AccessFlags::INPUT_ATTACHMENT_READ,
                        );
                    }
                }
            }

            match (pass.depth_stencil_input, pass.depth_stencil_output) {
                (input, Some(output)) => {
                    let physical = resources[output].physical_index.unwrap();
                    depth_slot = Some(physical);
                    subpass.depth = DepthMode::ReadWrite;
                    if let Some(src) = depth_writer.filter(|&src| src != local) {
                        push_dependency(
                            &mut dependencies,
                            src,
                            local,
                            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                        );
                    }
                    if depth_load.is_none() {
                        depth_load = Some(if input.is_some() {
                            vk::AttachmentLoadOp::LOAD
                        } else if clear_depth(implementations, pass_index).is_some() {
                            physical_pass.depth_clear_request =
                                Some(DepthClearRequest { pass: pass_index });
                            vk::AttachmentLoadOp::CLEAR
                        } else {
                            vk::AttachmentLoadOp::DONT_CARE
                        });
                    }
                    depth_writer = Some(local);
                }
                (Some(input), None) => {
                    let physical = resources[input].physical_index.unwrap();
                    depth_slot.get_or_insert(physical);
                    subpass.depth = DepthMode::ReadOnly;
                    depth_load.get_or_insert(vk::AttachmentLoadOp::LOAD);
                    if let Some(src) = depth_writer.filter(|&src| src != local) {
                        push_dependency(
                            &mut dependencies,
                            src,
                            local,
                            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
                        );
                    }
                }
                (None, None) => {}
            }

            subpasses.push(subpass);
        }

        let color_ops = color_slots
            .iter()
            .zip(&color_loads)
            .map(|(&slot, load)| AttachmentOps {
                load_op: load.unwrap_or(vk::AttachmentLoadOp::DONT_CARE),
                store_op: store_op(
                    resources,
                    passes,
                    dimensions,
                    has_history,
                    swapchain_physical_index,
                    physical_index,
                    slot,
                ),
            })
            .collect();
        let depth_stencil_ops = depth_slot.map(|slot| AttachmentOps {
            load_op: depth_load.unwrap_or(vk::AttachmentLoadOp::DONT_CARE),
            store_op: store_op(
                resources,
                passes,
                dimensions,
                has_history,
                swapchain_physical_index,
                physical_index,
                slot,
            ),
        });

        physical_pass.render_pass_info = Some(RenderPassInfo {
            color_ops,
            depth_stencil_ops,
            subpasses,
            dependencies,
        });
        physical_pass.physical_color_attachments = color_slots;
        physical_pass.physical_depth_stencil_attachment = depth_slot;
    }
}

fn attachment_slot(
    slots: &mut Vec<usize>,
    loads: &mut Vec<Option<vk::AttachmentLoadOp>>,
    physical: usize,
) -> usize {
    match slots.iter().position(|&s| s == physical) {
        Some(slot) => slot,
        None => {
            slots.push(physical);
            loads.push(None);
            slots.len() - 1
        }
    }
}

fn push_dependency(
    dependencies: &mut Vec<SubpassDependency>,
    src: u32,
    dst: u32,
    src_stages: vk::PipelineStageFlags,
    dst_stages: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) {
    match dependencies
        .iter_mut()
        .find(|d| d.src_subpass == src && d.dst_subpass == dst)
    {
        Some(dependency) => {
            dependency.src_stages |= src_stages;
            dependency.dst_stages |= dst_stages;
            dependency.src_access |= src_access;
            dependency.dst_access |= dst_access;
        }
        None => dependencies.push(SubpassDependency {
            src_subpass: src,
            dst_subpass: dst,
            src_stages,
            dst_stages,
            src_access,
            dst_access,
        }),
    }
}

fn clear_color<D: RenderDevice>(
    implementations: &[Option<Box<dyn RenderPassImplementation<D>>>],
    pass: usize,
    index: usize,
) -> Option<vk::ClearColorValue> {
    implementations[pass]
        .as_ref()
        .and_then(|implementation| implementation.get_clear_color(index))
}

fn clear_depth<D: RenderDevice>(
    implementations: &[Option<Box<dyn RenderPassImplementation<D>>>],
    pass: usize,
) -> Option<vk::ClearDepthStencilValue> {
    implementations[pass]
        .as_ref()
        .and_then(|implementation| implementation.get_clear_depth_stencil())
}

/// An attachment is stored when anything outside its physical pass may still
/// observe it; otherwise its contents can die on-chip.
fn store_op(
    resources: &[RenderResource],
    passes: &[RenderPass],
    dimensions: &[ResourceDimensions],
    has_history: &[bool],
    swapchain_physical_index: usize,
    physical_index: usize,
    slot: usize,
) -> vk::AttachmentStoreOp {
    if slot == swapchain_physical_index
        || dimensions[slot].persistent
        || has_history[slot]
    {
        return vk::AttachmentStoreOp::STORE;
    }
    for res in resources {
        if res.physical_index != Some(slot) {
            continue;
        }
        let read_outside = res
            .read_in_passes
            .iter()
            .any(|&reader| passes[reader].physical_pass != Some(physical_index));
        if read_outside {
            return vk::AttachmentStoreOp::STORE;
        }
    }
    vk::AttachmentStoreOp::DONT_CARE
}
