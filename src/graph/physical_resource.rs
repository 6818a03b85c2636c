//! Physical resource planning: resolving attachment sizes, assigning physical
//! indices, transient aliasing and history double-buffering.
//!
//! Aliasing is deterministic: logical resources are visited in creation order
//! and claim the lowest-numbered compatible physical slot. Two resources are
//! compatible when their resolved [`ResourceDimensions`] compare equal and
//! their live ranges in the baked pass order do not overlap. An input twin
//! declared on a pass output overrides the comparison entirely; the
//! declaration is the client's assertion of compatibility.

use std::collections::HashMap;

use anyhow::Result;

use crate::error::Error;
use crate::graph::pass::RenderPass;
use crate::graph::physical_pass::PhysicalPass;
use crate::graph::resource::{RenderResource, ResourceDimensions, SizeClass};

/// Output of the planner: one dimension record per physical slot.
#[derive(Debug)]
pub(crate) struct PhysicalResources {
    pub dimensions: Vec<ResourceDimensions>,
    /// Slots that are double buffered because some pass reads their history.
    pub has_history: Vec<bool>,
    /// Reserved slot bound to the swapchain image at attachment setup.
    pub swapchain_physical_index: usize,
}

struct UnionFind {
    parent: Vec<usize>,
    grouped: Vec<bool>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            grouped: vec![false; len],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        self.grouped[a] = true;
        self.grouped[b] = true;
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Root at the lower index so assignment order stays creation order.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Inclusive range of plan positions over which a resource is alive.
#[derive(Debug, Copy, Clone)]
struct LiveRange {
    first: usize,
    last: usize,
}

impl LiveRange {
    fn overlaps(&self, other: &LiveRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

pub(crate) fn build_physical_resources(
    passes: &[RenderPass],
    resources: &mut [RenderResource],
    order: &[usize],
    resource_to_index: &HashMap<String, usize>,
    swapchain_dimensions: &ResourceDimensions,
    backbuffer: usize,
) -> Result<PhysicalResources> {
    let surviving = surviving_resources(passes, resources.len(), order);
    let history_flag = history_flagged(passes, resources.len(), order);
    let ranges = live_ranges(resources, order);

    // Resolve attachment sizes up front; input-relative chains are memoized
    // and cycle-checked.
    let mut cache: Vec<Option<(u32, u32)>> = vec![None; resources.len()];
    let mut visiting = vec![false; resources.len()];
    for index in 0..resources.len() {
        if surviving[index] && resources[index].is_texture() {
            resolve_size(
                resources,
                resource_to_index,
                swapchain_dimensions,
                index,
                &mut visiting,
                &mut cache,
            )?;
        }
    }

    // Input twins force their endpoints onto one physical slot.
    let mut twins = UnionFind::new(resources.len());
    for &pass_index in order {
        let pass = &passes[pass_index];
        // Scaled color inputs resolve through a blit and are deliberately
        // absent here; they keep their own allocation.
        for (output, input) in pass
            .color_outputs
            .iter()
            .zip(&pass.color_inputs)
            .chain(pass.storage_texture_outputs.iter().zip(&pass.storage_texture_inputs))
            .chain(pass.storage_outputs.iter().zip(&pass.storage_inputs))
        {
            if let Some(input) = input {
                twins.union(*output, *input);
            }
        }
        // Depth read-modify-write pairs input and output onto one slot.
        if let (Some(input), Some(output)) = (pass.depth_stencil_input, pass.depth_stencil_output) {
            twins.union(output, input);
        }
    }

    let mut dimensions: Vec<ResourceDimensions> = Vec::new();
    let mut slot_ranges: Vec<Vec<LiveRange>> = Vec::new();
    let mut slot_aliasable: Vec<bool> = Vec::new();
    let mut group_slots: HashMap<usize, usize> = HashMap::new();
    let mut swapchain_physical_index = None;

    for index in 0..resources.len() {
        if !surviving[index] {
            resources[index].physical_index = None;
            continue;
        }
        let dims = resource_dimensions(
            &resources[index],
            cache[index],
            swapchain_dimensions,
            backbuffer,
        );
        let range = ranges[index];
        let group = twins.find(index);

        if let Some(&slot) = group_slots.get(&group) {
            resources[index].physical_index = Some(slot);
            slot_ranges[slot].push(range);
            slot_aliasable[slot] = false;
            if index == backbuffer {
                swapchain_physical_index = Some(slot);
            }
            continue;
        }

        let aliasable = resources[index].is_texture()
            && !dims.persistent
            && !history_flag[index]
            && index != backbuffer
            && !twins.grouped[index];

        let mut slot = None;
        if aliasable {
            slot = (0..dimensions.len()).find(|&s| {
                slot_aliasable[s]
                    && dimensions[s] == dims
                    && slot_ranges[s].iter().all(|r| !r.overlaps(&range))
            });
        }
        let slot = match slot {
            Some(slot) => {
                slot_ranges[slot].push(range);
                slot
            }
            None => {
                dimensions.push(dims);
                slot_ranges.push(vec![range]);
                slot_aliasable.push(aliasable);
                dimensions.len() - 1
            }
        };
        if index == backbuffer {
            swapchain_physical_index = Some(slot);
            slot_aliasable[slot] = false;
        }
        group_slots.insert(group, slot);
        resources[index].physical_index = Some(slot);
    }

    let mut has_history = vec![false; dimensions.len()];
    for (index, &flagged) in history_flag.iter().enumerate() {
        if flagged {
            if let Some(slot) = resources[index].physical_index {
                has_history[slot] = true;
                // History contents must survive into the next frame.
                dimensions[slot].persistent = true;
            }
        }
    }

    Ok(PhysicalResources {
        dimensions,
        has_history,
        swapchain_physical_index: swapchain_physical_index.ok_or(Error::NoBackbufferSource)?,
    })
}

/// Mark transient physical slots: attachments that are produced and consumed
/// entirely inside one physical pass and can live in lazily allocated on-chip
/// memory. Must run after physical passes are assigned.
pub(crate) fn build_transients(
    passes: &[RenderPass],
    resources: &mut [RenderResource],
    order: &[usize],
    physical_passes: &[PhysicalPass],
    physical: &mut PhysicalResources,
) {
    let slot_count = physical.dimensions.len();
    let mut attachment_pass: Vec<Option<usize>> = vec![None; slot_count];
    let mut used_as_attachment = vec![false; slot_count];
    let mut escapes = vec![false; slot_count];

    let slot_of = |resources: &[RenderResource], r: usize| resources[r].physical_index;

    for (physical_index, physical_pass) in physical_passes.iter().enumerate() {
        for &pass_index in &physical_pass.passes {
            let pass = &passes[pass_index];
            // Any non-attachment read keeps the data alive outside the pass.
            let sampled = pass
                .texture_inputs
                .iter()
                .chain(pass.color_scale_inputs.iter().flatten())
                .chain(pass.storage_texture_read_inputs.iter())
                .chain(pass.history_inputs.iter());
            for &r in sampled {
                if let Some(slot) = slot_of(resources, r) {
                    escapes[slot] = true;
                }
            }
            let attachments = pass
                .color_outputs
                .iter()
                .chain(pass.color_inputs.iter().flatten())
                .chain(pass.attachment_inputs.iter())
                .chain(pass.depth_stencil_output.iter())
                .chain(pass.depth_stencil_input.iter());
            for &r in attachments {
                let Some(slot) = slot_of(resources, r) else {
                    continue;
                };
                used_as_attachment[slot] = true;
                match attachment_pass[slot] {
                    None => attachment_pass[slot] = Some(physical_index),
                    Some(previous) if previous != physical_index => escapes[slot] = true,
                    Some(_) => {}
                }
            }
        }
    }

    for slot in 0..slot_count {
        let dims = &mut physical.dimensions[slot];
        dims.transient = used_as_attachment[slot]
            && !escapes[slot]
            && !dims.is_buffer()
            && !dims.persistent
            && !dims.storage
            && !physical.has_history[slot]
            && slot != physical.swapchain_physical_index;
    }

    // Reflect the computed state back onto the logical resources.
    for &pass_index in order {
        for r in passes[pass_index].referenced_resources() {
            if let Some(slot) = resources[r].physical_index {
                let transient = physical.dimensions[slot].transient;
                resources[r].set_transient(transient);
            }
        }
    }
}

fn surviving_resources(passes: &[RenderPass], len: usize, order: &[usize]) -> Vec<bool> {
    let mut surviving = vec![false; len];
    for &pass_index in order {
        for r in passes[pass_index].referenced_resources() {
            surviving[r] = true;
        }
    }
    surviving
}

fn history_flagged(passes: &[RenderPass], len: usize, order: &[usize]) -> Vec<bool> {
    let mut flagged = vec![false; len];
    for &pass_index in order {
        for &r in &passes[pass_index].history_inputs {
            flagged[r] = true;
        }
    }
    flagged
}

fn live_ranges(resources: &[RenderResource], order: &[usize]) -> Vec<LiveRange> {
    let position: HashMap<usize, usize> =
        order.iter().enumerate().map(|(i, &p)| (p, i)).collect();
    let mut ranges = vec![
        LiveRange {
            first: usize::MAX,
            last: 0,
        };
        resources.len()
    ];
    for res in resources {
        for pass in res.written_in_passes.iter().chain(&res.read_in_passes) {
            if let Some(&pos) = position.get(pass) {
                let range = &mut ranges[res.index];
                range.first = range.first.min(pos);
                range.last = range.last.max(pos);
            }
        }
    }
    ranges
}

fn resolve_size(
    resources: &[RenderResource],
    resource_to_index: &HashMap<String, usize>,
    swapchain_dimensions: &ResourceDimensions,
    index: usize,
    visiting: &mut Vec<bool>,
    cache: &mut Vec<Option<(u32, u32)>>,
) -> Result<(u32, u32)> {
    if let Some(size) = cache[index] {
        return Ok(size);
    }
    let res = &resources[index];
    if visiting[index] {
        return Err(Error::UnresolvedDimensions(res.name.clone()).into());
    }
    let info = res
        .attachment_info()
        .ok_or_else(|| Error::UnresolvedDimensions(res.name.clone()))?;
    visiting[index] = true;
    let size = match info.size_class {
        SizeClass::Absolute => (info.size_x.round() as u32, info.size_y.round() as u32),
        SizeClass::SwapchainRelative => (
            (info.size_x * swapchain_dimensions.width as f32) as u32,
            (info.size_y * swapchain_dimensions.height as f32) as u32,
        ),
        SizeClass::InputRelative => {
            let referent = info
                .size_relative_name
                .as_ref()
                .and_then(|name| resource_to_index.get(name))
                .copied()
                .ok_or_else(|| Error::UnresolvedDimensions(res.name.clone()))?;
            let (width, height) = resolve_size(
                resources,
                resource_to_index,
                swapchain_dimensions,
                referent,
                visiting,
                cache,
            )?;
            (
                (info.size_x * width as f32) as u32,
                (info.size_y * height as f32) as u32,
            )
        }
    };
    visiting[index] = false;
    cache[index] = Some(size);
    Ok(size)
}

fn resource_dimensions(
    res: &RenderResource,
    size: Option<(u32, u32)>,
    swapchain_dimensions: &ResourceDimensions,
    backbuffer: usize,
) -> ResourceDimensions {
    match res.buffer_info() {
        Some(info) => ResourceDimensions {
            buffer_info: *info,
            persistent: info.persistent,
            ..Default::default()
        },
        None => {
            let info = res.attachment_info().unwrap();
            let (width, height) = size.unwrap_or((0, 0));
            let mut format = info.format;
            if format == ash::vk::Format::UNDEFINED && res.index == backbuffer {
                format = swapchain_dimensions.format;
            }
            ResourceDimensions {
                format,
                width: width.max(1),
                height: height.max(1),
                layers: info.layers,
                levels: info.levels,
                persistent: info.persistent,
                storage: res.is_storage(),
                ..Default::default()
            }
        }
    }
}
