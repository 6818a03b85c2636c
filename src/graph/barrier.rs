//! Barrier planning.
//!
//! Runs in three phases over the baked plan:
//!
//! 1. Per logical pass, derive the invalidate (pre-read) and flush
//!    (post-write) state every touched resource must be in, from the pass's
//!    edge lists alone.
//! 2. Consolidate per physical pass: the first use of a resource inside a
//!    merged pass decides its external barrier, later subpass-local uses are
//!    covered by the render pass's subpass dependencies and emit nothing.
//! 3. Walk physical passes in plan order, tracking per-resource state
//!    (current layout, pending writes, visible caches) and emit the minimal
//!    set of full source→destination barriers. First uses land in the
//!    frame-boundary lists instead: an `UNDEFINED` cold-start set for the
//!    first frame after a bake, and a steady-state set that wraps the end of
//!    one frame into the start of the next.
//!
//! History images are double buffered and swapped after every frame, so their
//! transitions cannot be folded into the per-pass lists; they get dedicated
//! per-frame instructions.

use std::collections::HashMap;

use anyhow::Result;
use ash::vk;

use crate::error::Error;
use crate::graph::pass::RenderPass;
use crate::graph::physical_pass::PhysicalPass;
use crate::graph::resource::{RenderResource, ResourceDimensions};

/// Destination side of a barrier: the layout, caches and stages a physical
/// resource must be in for one pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Barrier {
    /// Physical resource index.
    pub resource: usize,
    pub layout: vk::ImageLayout,
    pub access: vk::AccessFlags,
    pub stages: vk::PipelineStageFlags,
    /// Aimed at the previous frame's image of a double-buffered resource.
    pub history: bool,
}

/// Invalidate and flush sets of one logical pass.
#[derive(Debug, Default, Clone)]
pub(crate) struct Barriers {
    pub invalidate: Vec<Barrier>,
    pub flush: Vec<Barrier>,
}

/// A fully resolved pipeline barrier in the executable plan.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BarrierInstruction {
    pub resource: usize,
    pub src_stages: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stages: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
}

/// Per-frame transition of a history image into its readable state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HistoryRead {
    pub resource: usize,
    pub old_layout: vk::ImageLayout,
    pub src_stages: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stages: vk::PipelineStageFlags,
}

/// Frame-boundary barrier sets produced by phase 3.
#[derive(Debug, Default, Clone)]
pub struct FrameBarriers {
    /// First frame after a (re)bake: every first use comes out of `UNDEFINED`.
    pub initial: Vec<BarrierInstruction>,
    /// Steady-state frames: first uses come out of last frame's final state.
    pub steady: Vec<BarrierInstruction>,
    pub history_reads: Vec<HistoryRead>,
    /// Transition of the backbuffer image to `PRESENT_SRC_KHR`, emitted after
    /// the last pass.
    pub present: Option<BarrierInstruction>,
}

fn write_access() -> vk::AccessFlags {
    vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        | vk::AccessFlags::SHADER_WRITE
        | vk::AccessFlags::TRANSFER_WRITE
        | vk::AccessFlags::MEMORY_WRITE
}

fn depth_stages() -> vk::PipelineStageFlags {
    vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
}

/// Phase 1: invalidate/flush sets for every pass in the plan, parallel to
/// `order`.
pub(crate) fn build_pass_barriers(
    passes: &[RenderPass],
    resources: &[RenderResource],
    order: &[usize],
) -> Result<Vec<Barriers>> {
    order
        .iter()
        .map(|&pass| pass_barriers(&passes[pass], resources))
        .collect()
}

fn pass_barriers(pass: &RenderPass, resources: &[RenderResource]) -> Result<Barriers> {
    let mut barriers = Barriers::default();
    let physical = |r: usize| resources[r].physical_index.unwrap();
    let name = |r: usize| resources[r].name.as_str();

    for &input in pass.color_inputs.iter().flatten() {
        add_invalidate(
            &mut barriers,
            name(input),
            Barrier {
                resource: physical(input),
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                access: vk::AccessFlags::COLOR_ATTACHMENT_READ
                    | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                stages: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                history: false,
            },
        )?;
    }
    // Scaled color inputs are consumed by a sampling blit in the fragment
    // stage before the subpass runs.
    for &input in pass.color_scale_inputs.iter().flatten() {
        add_invalidate(
            &mut barriers,
            name(input),
            Barrier {
                resource: physical(input),
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                access: vk::AccessFlags::SHADER_READ,
                stages: vk::PipelineStageFlags::FRAGMENT_SHADER,
                history: false,
            },
        )?;
    }
    for &output in &pass.color_outputs {
        add_flush(
            &mut barriers,
            name(output),
            Barrier {
                resource: physical(output),
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                stages: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                history: false,
            },
        )?;
    }

    match (pass.depth_stencil_input, pass.depth_stencil_output) {
        (Some(input), Some(output)) => {
            add_invalidate(
                &mut barriers,
                name(input),
                Barrier {
                    resource: physical(input),
                    layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    stages: depth_stages(),
                    history: false,
                },
            )?;
            add_flush(
                &mut barriers,
                name(output),
                Barrier {
                    resource: physical(output),
                    layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
                    stages: depth_stages(),
                    history: false,
                },
            )?;
        }
        (Some(input), None) => {
            add_invalidate(
                &mut barriers,
                name(input),
                Barrier {
                    resource: physical(input),
                    layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                    access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
                    stages: depth_stages(),
                    history: false,
                },
            )?;
        }
        (None, Some(output)) => {
            add_flush(
                &mut barriers,
                name(output),
                Barrier {
                    resource: physical(output),
                    layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
                    stages: depth_stages(),
                    history: false,
                },
            )?;
        }
        (None, None) => {}
    }

    for &input in &pass.attachment_inputs {
        add_invalidate(
            &mut barriers,
            name(input),
            Barrier {
                resource: physical(input),
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                access: vk::AccessFlags::INPUT_ATTACHMENT_READ,
                stages: vk::PipelineStageFlags::FRAGMENT_SHADER,
                history: false,
            },
        )?;
    }
    for &input in &pass.texture_inputs {
        add_invalidate(
            &mut barriers,
            name(input),
            Barrier {
                resource: physical(input),
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                access: vk::AccessFlags::SHADER_READ,
                stages: pass.stages,
                history: false,
            },
        )?;
    }
    for &input in &pass.history_inputs {
        add_invalidate(
            &mut barriers,
            name(input),
            Barrier {
                resource: physical(input),
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                access: vk::AccessFlags::SHADER_READ,
                stages: pass.stages,
                history: true,
            },
        )?;
    }

    for (&output, input) in pass
        .storage_texture_outputs
        .iter()
        .zip(&pass.storage_texture_inputs)
    {
        add_flush(
            &mut barriers,
            name(output),
            Barrier {
                resource: physical(output),
                layout: vk::ImageLayout::GENERAL,
                access: vk::AccessFlags::SHADER_WRITE,
                stages: pass.stages,
                history: false,
            },
        )?;
        if let &Some(input) = input {
            add_invalidate(
                &mut barriers,
                name(input),
                Barrier {
                    resource: physical(input),
                    layout: vk::ImageLayout::GENERAL,
                    access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
                    stages: pass.stages,
                    history: false,
                },
            )?;
        }
    }
    for &input in &pass.storage_texture_read_inputs {
        add_invalidate(
            &mut barriers,
            name(input),
            Barrier {
                resource: physical(input),
                layout: vk::ImageLayout::GENERAL,
                access: vk::AccessFlags::SHADER_READ,
                stages: pass.stages,
                history: false,
            },
        )?;
    }

    // Buffers carry no layout; `UNDEFINED` is used as the neutral value.
    for &input in &pass.uniform_inputs {
        add_invalidate(
            &mut barriers,
            name(input),
            Barrier {
                resource: physical(input),
                layout: vk::ImageLayout::UNDEFINED,
                access: vk::AccessFlags::UNIFORM_READ,
                stages: pass.stages,
                history: false,
            },
        )?;
    }
    for (&output, input) in pass.storage_outputs.iter().zip(&pass.storage_inputs) {
        add_flush(
            &mut barriers,
            name(output),
            Barrier {
                resource: physical(output),
                layout: vk::ImageLayout::UNDEFINED,
                access: vk::AccessFlags::SHADER_WRITE,
                stages: pass.stages,
                history: false,
            },
        )?;
        if let &Some(input) = input {
            add_invalidate(
                &mut barriers,
                name(input),
                Barrier {
                    resource: physical(input),
                    layout: vk::ImageLayout::UNDEFINED,
                    access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
                    stages: pass.stages,
                    history: false,
                },
            )?;
        }
    }
    for &input in &pass.storage_read_inputs {
        add_invalidate(
            &mut barriers,
            name(input),
            Barrier {
                resource: physical(input),
                layout: vk::ImageLayout::UNDEFINED,
                access: vk::AccessFlags::SHADER_READ,
                stages: pass.stages,
                history: false,
            },
        )?;
    }

    Ok(barriers)
}

fn add_invalidate(barriers: &mut Barriers, name: &str, barrier: Barrier) -> Result<()> {
    merge(&mut barriers.invalidate, name, barrier)
}

fn add_flush(barriers: &mut Barriers, name: &str, barrier: Barrier) -> Result<()> {
    merge(&mut barriers.flush, name, barrier)
}

fn merge(list: &mut Vec<Barrier>, name: &str, barrier: Barrier) -> Result<()> {
    match list
        .iter_mut()
        .find(|b| b.resource == barrier.resource && b.history == barrier.history)
    {
        Some(existing) => {
            if existing.layout != barrier.layout {
                return Err(Error::ConflictingLayouts(name.to_owned()).into());
            }
            existing.access |= barrier.access;
            existing.stages |= barrier.stages;
            Ok(())
        }
        None => {
            list.push(barrier);
            Ok(())
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ResourceState {
    touched: bool,
    layout: vk::ImageLayout,
    pending_flush_access: vk::AccessFlags,
    pending_flush_stages: vk::PipelineStageFlags,
    visible_access: vk::AccessFlags,
    visible_stages: vk::PipelineStageFlags,
    last_read_stages: vk::PipelineStageFlags,
    first_need: Option<Barrier>,
}

/// Phases 2 and 3. Fills each physical pass's invalidate list in place and
/// returns the frame-boundary sets.
pub(crate) fn build_physical_barriers(
    physical_passes: &mut [PhysicalPass],
    pass_barriers: &[Barriers],
    order: &[usize],
    dimensions: &[ResourceDimensions],
    has_history: &[bool],
    swapchain_physical_index: usize,
) -> Result<FrameBarriers> {
    let position: HashMap<usize, usize> =
        order.iter().enumerate().map(|(i, &p)| (p, i)).collect();

    // Phase 2: consolidate per physical pass.
    struct Consolidated {
        needs: Vec<Barrier>,
        flushes: Vec<Barrier>,
    }
    let mut consolidated = Vec::with_capacity(physical_passes.len());
    let mut history_stages: HashMap<usize, vk::PipelineStageFlags> = HashMap::new();
    for physical_pass in physical_passes.iter() {
        let mut needs: Vec<Barrier> = Vec::new();
        let mut flushes: Vec<Barrier> = Vec::new();
        let mut flushed_here: Vec<usize> = Vec::new();
        for &pass in &physical_pass.passes {
            let barriers = &pass_barriers[position[&pass]];
            for invalidate in &barriers.invalidate {
                if invalidate.history {
                    *history_stages
                        .entry(invalidate.resource)
                        .or_insert(vk::PipelineStageFlags::empty()) |= invalidate.stages;
                    continue;
                }
                // A producer inside the same physical pass is synchronized by
                // a subpass dependency, never by a pipeline barrier.
                if flushed_here.contains(&invalidate.resource) {
                    continue;
                }
                match needs.iter_mut().find(|n| n.resource == invalidate.resource) {
                    Some(need) => {
                        if need.layout != invalidate.layout {
                            return Err(Error::Uncategorized(
                                "conflicting first-use layouts inside a merged pass",
                            )
                            .into());
                        }
                        need.access |= invalidate.access;
                        need.stages |= invalidate.stages;
                    }
                    None => needs.push(*invalidate),
                }
            }
            for flush in &barriers.flush {
                if !flushed_here.contains(&flush.resource) {
                    flushed_here.push(flush.resource);
                }
                match flushes.iter_mut().find(|f| f.resource == flush.resource) {
                    Some(existing) => {
                        existing.layout = flush.layout;
                        existing.access |= flush.access;
                        existing.stages |= flush.stages;
                    }
                    None => flushes.push(*flush),
                }
            }
        }
        // Write-only resources still need a transition into their write state
        // (and protection against earlier reads and writes of an alias).
        for flush in &flushes {
            if !needs.iter().any(|n| n.resource == flush.resource) {
                needs.push(*flush);
            }
        }
        consolidated.push(Consolidated { needs, flushes });
    }

    // Phase 3: global walk emitting full barriers.
    let mut states = vec![ResourceState::default(); dimensions.len()];
    for (index, consolidated) in consolidated.iter().enumerate() {
        for need in &consolidated.needs {
            let state = &mut states[need.resource];
            let is_write = need.access.intersects(write_access());
            if !state.touched {
                state.touched = true;
                state.first_need = Some(*need);
                state.layout = need.layout;
                if !is_write {
                    state.visible_access = need.access;
                    state.visible_stages = need.stages;
                    state.last_read_stages = need.stages;
                }
                continue;
            }
            let transition = state.layout != need.layout;
            let pending = !state.pending_flush_access.is_empty();
            let missing = !state.visible_access.contains(need.access)
                || !state.visible_stages.contains(need.stages);
            let write_after_read = is_write && !state.last_read_stages.is_empty();
            let hazard = if is_write {
                transition || pending || write_after_read
            } else {
                transition || pending || missing
            };
            if hazard {
                let (src_stages, src_access) = if pending {
                    (state.pending_flush_stages, state.pending_flush_access)
                } else if !state.last_read_stages.is_empty() {
                    // Write-after-read or layout change: execution dependency
                    // against the previous readers is enough.
                    (state.last_read_stages, vk::AccessFlags::empty())
                } else {
                    (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty())
                };
                physical_passes[index].invalidate.push(BarrierInstruction {
                    resource: need.resource,
                    src_stages,
                    src_access,
                    dst_stages: need.stages,
                    dst_access: need.access,
                    old_layout: state.layout,
                    new_layout: need.layout,
                });
                state.pending_flush_access = vk::AccessFlags::empty();
                state.pending_flush_stages = vk::PipelineStageFlags::empty();
                state.layout = need.layout;
                if is_write {
                    state.visible_access = vk::AccessFlags::empty();
                    state.visible_stages = vk::PipelineStageFlags::empty();
                    state.last_read_stages = vk::PipelineStageFlags::empty();
                } else {
                    state.visible_access = need.access;
                    state.visible_stages = need.stages;
                    state.last_read_stages |= need.stages;
                }
            } else if !is_write {
                state.visible_access |= need.access;
                state.visible_stages |= need.stages;
                state.last_read_stages |= need.stages;
            }
        }
        for flush in &consolidated.flushes {
            let state = &mut states[flush.resource];
            state.touched = true;
            if state.first_need.is_none() {
                state.first_need = Some(*flush);
            }
            state.layout = flush.layout;
            state.pending_flush_access = flush.access;
            state.pending_flush_stages = flush.stages;
            state.visible_access = vk::AccessFlags::empty();
            state.visible_stages = vk::PipelineStageFlags::empty();
            state.last_read_stages = vk::PipelineStageFlags::empty();
        }
        physical_passes[index].flush = consolidated.flushes.clone();
    }

    // Frame-boundary lists.
    let mut frame = FrameBarriers::default();
    for (resource, state) in states.iter().enumerate() {
        let Some(first) = state.first_need else {
            continue;
        };
        let first_is_write = first.access.intersects(write_access());
        let cold = BarrierInstruction {
            resource,
            src_stages: vk::PipelineStageFlags::TOP_OF_PIPE,
            src_access: vk::AccessFlags::empty(),
            dst_stages: first.stages,
            dst_access: first.access,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: first.layout,
        };
        frame.initial.push(cold);

        if resource == swapchain_physical_index || (has_history[resource] && first_is_write) {
            // A freshly acquired swapchain image, and the previous history
            // image being recycled as the new write target, both start the
            // frame with discardable contents.
            frame.steady.push(cold);
            continue;
        }

        let transition = state.layout != first.layout;
        let pending = !state.pending_flush_access.is_empty();
        if transition || pending || first_is_write {
            let (src_stages, src_access) = if pending {
                (state.pending_flush_stages, state.pending_flush_access)
            } else if !state.last_read_stages.is_empty() {
                (state.last_read_stages, vk::AccessFlags::empty())
            } else {
                (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty())
            };
            let old_layout = if first_is_write && !dimensions[resource].persistent {
                // Contents are rewritten from scratch every frame.
                vk::ImageLayout::UNDEFINED
            } else {
                state.layout
            };
            frame.steady.push(BarrierInstruction {
                resource,
                src_stages,
                src_access,
                dst_stages: first.stages,
                dst_access: first.access,
                old_layout,
                new_layout: first.layout,
            });
        }
    }

    // History reads observe the image object that held this resource last
    // frame, in whatever state the plan leaves it in at end of frame.
    let mut history_resources: Vec<usize> = history_stages.keys().copied().collect();
    history_resources.sort_unstable();
    for resource in history_resources {
        let state = &states[resource];
        let src_empty = state.pending_flush_access.is_empty();
        frame.history_reads.push(HistoryRead {
            resource,
            old_layout: state.layout,
            src_stages: if src_empty {
                vk::PipelineStageFlags::TOP_OF_PIPE
            } else {
                state.pending_flush_stages
            },
            src_access: state.pending_flush_access,
            dst_stages: history_stages[&resource],
        });
    }

    let swapchain_state = &states[swapchain_physical_index];
    if swapchain_state.touched {
        let pending = !swapchain_state.pending_flush_access.is_empty();
        frame.present = Some(BarrierInstruction {
            resource: swapchain_physical_index,
            src_stages: if pending {
                swapchain_state.pending_flush_stages
            } else {
                vk::PipelineStageFlags::TOP_OF_PIPE
            },
            src_access: swapchain_state.pending_flush_access,
            dst_stages: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            dst_access: vk::AccessFlags::empty(),
            old_layout: swapchain_state.layout,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        });
    }

    Ok(frame)
}
