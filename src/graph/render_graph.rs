//! The render graph: resource registry, pass table, and the bake pipeline
//! turning declarations into an executable plan.
//!
//! Declaration is cheap and unordered: passes and resources are arena-backed
//! and referenced by index, names are only a client-facing lookup. All
//! validation is deferred to [`RenderGraph::bake`], which either installs a
//! complete plan or fails without leaving a partial one behind.
//!
//! # Example
//!
//! ```no_run
//! # use deimos::prelude::*;
//! # use ash::vk;
//! # fn frame<D: RenderDevice>(device: &mut D, swapchain: D::ImageView) -> anyhow::Result<()> {
//! let mut graph: RenderGraph<D> = RenderGraph::new();
//! let mut pass = graph.add_pass("lighting", vk::PipelineStageFlags::FRAGMENT_SHADER);
//! pass.add_texture_input("gbuffer-albedo")?;
//! pass.add_color_output("hdr", AttachmentInfo::with_format(vk::Format::R16G16B16A16_SFLOAT), None)?;
//! pass.set_implementation(ShaderBlit::new("quad.vert", "lighting.frag"));
//! // ... more passes ...
//! graph.set_backbuffer_source("hdr");
//! graph.bake()?;
//! graph.setup_attachments(device, swapchain)?;
//! graph.enqueue_render_passes(device)?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use anyhow::Result;
use ash::vk;
use log::{debug, info};
use petgraph::dot::Dot;

use crate::device::RenderDevice;
use crate::error::Error;
use crate::graph::barrier::{self, FrameBarriers};
use crate::graph::dependency::{self, PassDependencyGraph};
use crate::graph::pass::{PassBuilder, RenderPass, RenderPassImplementation};
use crate::graph::physical_pass::{self, PhysicalPass};
use crate::graph::physical_resource::{self, PhysicalResources};
use crate::graph::resource::{RenderResource, ResourceDimensions};

/// The executable plan installed by a successful bake. Invalidated by any
/// mutation of the graph.
pub(crate) struct BakedPlan {
    pub pass_order: Vec<usize>,
    pub physical: PhysicalResources,
    pub physical_passes: Vec<PhysicalPass>,
    pub barriers: FrameBarriers,
    pub dependency_graph: PassDependencyGraph,
}

/// A declarative render graph over a [`RenderDevice`].
///
/// Build passes with [`add_pass`](Self::add_pass), point
/// [`set_backbuffer_source`](Self::set_backbuffer_source) at the resource to
/// present, then [`bake`](Self::bake) once,
/// [`setup_attachments`](Self::setup_attachments) whenever the swapchain
/// changes, and [`enqueue_render_passes`](Self::enqueue_render_passes) every
/// frame.
pub struct RenderGraph<D: RenderDevice> {
    pub(crate) passes: Vec<RenderPass>,
    pub(crate) implementations: Vec<Option<Box<dyn RenderPassImplementation<D>>>>,
    pub(crate) resources: Vec<RenderResource>,
    pub(crate) pass_to_index: HashMap<String, usize>,
    pub(crate) resource_to_index: HashMap<String, usize>,
    pub(crate) backbuffer_source: Option<String>,
    pub(crate) swapchain_dimensions: ResourceDimensions,
    pub(crate) baked: Option<BakedPlan>,

    // Physical allocations, populated by setup_attachments.
    pub(crate) physical_attachments: Vec<Option<D::ImageView>>,
    pub(crate) physical_history_attachments: Vec<Option<D::ImageView>>,
    pub(crate) physical_buffers: Vec<Option<D::Buffer>>,
    pub(crate) allocated_dimensions: Vec<Option<ResourceDimensions>>,
    /// Slots whose image was (re)created since the last frame and therefore
    /// starts in `UNDEFINED`.
    pub(crate) attachment_cold: Vec<bool>,
    /// History slots that hold a completed previous frame.
    pub(crate) history_valid: Vec<bool>,
}

impl<D: RenderDevice> Default for RenderGraph<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: RenderDevice> RenderGraph<D> {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            implementations: Vec::new(),
            resources: Vec::new(),
            pass_to_index: HashMap::new(),
            resource_to_index: HashMap::new(),
            backbuffer_source: None,
            swapchain_dimensions: ResourceDimensions::default(),
            baked: None,
            physical_attachments: Vec::new(),
            physical_history_attachments: Vec::new(),
            physical_buffers: Vec::new(),
            allocated_dimensions: Vec::new(),
            attachment_cold: Vec::new(),
            history_valid: Vec::new(),
        }
    }

    /// Add a pass (or return the builder for an existing pass of the same
    /// name) running in the given pipeline stages.
    pub fn add_pass(&mut self, name: impl Into<String>, stages: vk::PipelineStageFlags) -> PassBuilder<'_, D> {
        self.invalidate_bake();
        let name = name.into();
        let index = match self.pass_to_index.get(&name) {
            Some(&index) => index,
            None => {
                let index = self.passes.len();
                self.passes.push(RenderPass::new(index, name.clone(), stages));
                self.implementations.push(None);
                self.pass_to_index.insert(name, index);
                index
            }
        };
        PassBuilder { graph: self, pass: index }
    }

    /// Look up (or lazily create) the image resource called `name`.
    pub fn get_texture_resource(&mut self, name: &str) -> Result<usize> {
        self.texture_resource_index(name)
    }

    /// Look up (or lazily create) the buffer resource called `name`.
    pub fn get_buffer_resource(&mut self, name: &str) -> Result<usize> {
        self.buffer_resource_index(name)
    }

    /// The resource whose final contents are presented. Its physical slot is
    /// reserved for the externally owned swapchain image.
    pub fn set_backbuffer_source(&mut self, name: impl Into<String>) {
        self.invalidate_bake();
        self.backbuffer_source = Some(name.into());
    }

    /// Dimensions (and format) of the swapchain, the base for every
    /// swapchain-relative attachment size.
    pub fn set_backbuffer_dimensions(&mut self, dimensions: ResourceDimensions) {
        self.invalidate_bake();
        self.swapchain_dimensions = dimensions;
    }

    pub fn pass(&self, name: &str) -> Option<&RenderPass> {
        self.pass_to_index.get(name).map(|&index| &self.passes[index])
    }

    pub fn resource(&self, name: &str) -> Option<&RenderResource> {
        self.resource_to_index
            .get(name)
            .map(|&index| &self.resources[index])
    }

    /// Bake the declared graph into an executable plan: dependency-order the
    /// passes, plan physical resources and aliasing, merge physical passes,
    /// and emit every barrier the frame needs.
    pub fn bake(&mut self) -> Result<()> {
        self.baked = None;
        let backbuffer_name = self
            .backbuffer_source
            .clone()
            .ok_or(Error::NoBackbufferSource)?;
        let backbuffer = *self
            .resource_to_index
            .get(&backbuffer_name)
            .ok_or_else(|| Error::UnproducedResource(backbuffer_name.clone()))?;

        for pass in &mut self.passes {
            pass.physical_pass = None;
        }

        let order = dependency::order_passes(&self.passes, &self.resources, backbuffer)?;
        let graph = dependency::build_dependency_graph(&self.passes, &self.resources, &order);
        dependency::validate_passes(&self.passes, &self.resources, &order, backbuffer, &graph)?;
        for &pass in &order {
            if self.implementations[pass].is_none() {
                return Err(Error::MissingImplementation(self.passes[pass].name.clone()).into());
            }
        }

        let mut physical = physical_resource::build_physical_resources(
            &self.passes,
            &mut self.resources,
            &order,
            &self.resource_to_index,
            &self.swapchain_dimensions,
            backbuffer,
        )?;
        let mut physical_passes = physical_pass::build_physical_passes(
            &mut self.passes,
            &self.resources,
            &order,
            &physical.dimensions,
        );
        physical_resource::build_transients(
            &self.passes,
            &mut self.resources,
            &order,
            &physical_passes,
            &mut physical,
        );
        physical_pass::build_render_pass_info(
            &self.passes,
            &self.resources,
            &self.implementations,
            &physical.dimensions,
            &physical.has_history,
            physical.swapchain_physical_index,
            &mut physical_passes,
        );
        let pass_barriers = barrier::build_pass_barriers(&self.passes, &self.resources, &order)?;
        let barriers = barrier::build_physical_barriers(
            &mut physical_passes,
            &pass_barriers,
            &order,
            &physical.dimensions,
            &physical.has_history,
            physical.swapchain_physical_index,
        )?;

        info!(
            "baked render graph: {} passes in {} physical passes over {} physical resources",
            order.len(),
            physical_passes.len(),
            physical.dimensions.len()
        );
        self.baked = Some(BakedPlan {
            pass_order: order,
            physical,
            physical_passes,
            barriers,
            dependency_graph: graph,
        });
        Ok(())
    }

    /// Tear the whole graph down: passes, resources and physical allocations.
    pub fn reset(&mut self) {
        self.passes.clear();
        self.implementations.clear();
        self.resources.clear();
        self.pass_to_index.clear();
        self.resource_to_index.clear();
        self.backbuffer_source = None;
        self.swapchain_dimensions = ResourceDimensions::default();
        self.baked = None;
        self.release_attachments();
    }

    /// Dump the baked plan through the `log` crate.
    pub fn log(&self) {
        let Some(plan) = &self.baked else {
            info!("render graph: not baked");
            return;
        };
        info!("=== render graph ===");
        for (index, dimensions) in plan.physical.dimensions.iter().enumerate() {
            let names: Vec<&str> = self
                .resources
                .iter()
                .filter(|r| r.physical_index == Some(index))
                .map(|r| r.name.as_str())
                .collect();
            if dimensions.is_buffer() {
                info!(
                    "physical buffer #{index} ({}): {} bytes, usage {:?}",
                    names.join(", "),
                    dimensions.buffer_info.size,
                    dimensions.buffer_info.usage
                );
            } else {
                info!(
                    "physical image #{index} ({}): {}x{} {:?}{}{}{}{}",
                    names.join(", "),
                    dimensions.width,
                    dimensions.height,
                    dimensions.format,
                    if dimensions.transient { ", transient" } else { "" },
                    if dimensions.persistent { ", persistent" } else { "" },
                    if dimensions.storage { ", storage" } else { "" },
                    if plan.physical.has_history[index] { ", history" } else { "" },
                );
            }
        }
        for (index, physical_pass) in plan.physical_passes.iter().enumerate() {
            let names: Vec<&str> = physical_pass
                .passes
                .iter()
                .map(|&pass| self.passes[pass].name.as_str())
                .collect();
            info!(
                "physical pass #{index}: [{}], {} color attachments, depth: {:?}",
                names.join(" -> "),
                physical_pass.physical_color_attachments.len(),
                physical_pass.physical_depth_stencil_attachment,
            );
            for barrier in &physical_pass.invalidate {
                info!("  invalidate: {barrier:?}");
            }
            for barrier in &physical_pass.flush {
                info!("  flush: {barrier:?}");
            }
        }
        debug!("dependency graph:\n{:?}", Dot::new(&plan.dependency_graph));
    }

    /// Ordered list of logical pass indices executed each frame.
    pub fn pass_order(&self) -> Result<&[usize]> {
        Ok(&self.plan()?.pass_order)
    }

    /// The merged physical passes of the baked plan, in execution order.
    pub fn physical_passes(&self) -> Result<&[PhysicalPass]> {
        Ok(&self.plan()?.physical_passes)
    }

    /// Resolved dimension records, one per physical resource.
    pub fn physical_dimensions(&self) -> Result<&[ResourceDimensions]> {
        Ok(&self.plan()?.physical.dimensions)
    }

    /// Physical slots that are double buffered for history reads.
    pub fn physical_image_has_history(&self) -> Result<&[bool]> {
        Ok(&self.plan()?.physical.has_history)
    }

    /// The reserved physical slot bound to the swapchain image.
    pub fn swapchain_physical_index(&self) -> Result<usize> {
        Ok(self.plan()?.physical.swapchain_physical_index)
    }

    /// Frame-boundary barrier sets of the baked plan.
    pub fn frame_barriers(&self) -> Result<&FrameBarriers> {
        Ok(&self.plan()?.barriers)
    }

    /// This frame's physical image for a physical index.
    pub fn get_physical_texture_resource(&self, index: usize) -> Result<&D::ImageView> {
        self.physical_attachments
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::NoResourceBound(index).into())
    }

    /// The previous frame's image for a history-enabled physical index, or
    /// `None` before the first frame completed.
    pub fn get_physical_history_texture_resource(&self, index: usize) -> Option<&D::ImageView> {
        if !self.history_valid.get(index).copied().unwrap_or(false) {
            return None;
        }
        self.physical_history_attachments
            .get(index)
            .and_then(Option::as_ref)
    }

    /// The physical buffer for a physical index.
    pub fn get_physical_buffer_resource(&self, index: usize) -> Result<&D::Buffer> {
        self.physical_buffers
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::NoResourceBound(index).into())
    }

    /// Take one persistent buffer handle out of the graph, to keep feedback
    /// data alive across a rebake.
    pub fn consume_persistent_physical_buffer_resource(&self, index: usize) -> Option<D::Buffer> {
        self.physical_buffers.get(index).and_then(Clone::clone)
    }

    /// Reinstall a buffer handle taken with
    /// [`consume_persistent_physical_buffer_resource`](Self::consume_persistent_physical_buffer_resource).
    pub fn install_persistent_physical_buffer_resource(&mut self, index: usize, buffer: D::Buffer) {
        if index >= self.physical_buffers.len() {
            self.physical_buffers.resize_with(index + 1, || None);
        }
        self.physical_buffers[index] = Some(buffer);
    }

    /// Take the whole physical buffer list out of the graph.
    pub fn consume_physical_buffers(&mut self) -> Vec<Option<D::Buffer>> {
        std::mem::take(&mut self.physical_buffers)
    }

    /// Reinstall a buffer list taken with
    /// [`consume_physical_buffers`](Self::consume_physical_buffers).
    pub fn install_physical_buffers(&mut self, buffers: Vec<Option<D::Buffer>>) {
        self.physical_buffers = buffers;
    }

    /// React to a swapchain lifecycle event.
    pub fn on_swapchain_event(&mut self, device: &mut D, event: SwapchainEvent<D>) -> Result<()> {
        match event {
            SwapchainEvent::Changed { dimensions, view } => {
                self.set_backbuffer_dimensions(dimensions);
                self.bake()?;
                self.setup_attachments(device, view)
            }
            SwapchainEvent::Destroyed => {
                self.release_attachments();
                Ok(())
            }
        }
    }

    pub(crate) fn plan(&self) -> Result<&BakedPlan> {
        self.baked.as_ref().ok_or_else(|| Error::NotBaked.into())
    }

    pub(crate) fn invalidate_bake(&mut self) {
        self.baked = None;
    }

    pub(crate) fn texture_resource_index(&mut self, name: &str) -> Result<usize> {
        match self.resource_to_index.get(name) {
            Some(&index) => {
                if !self.resources[index].is_texture() {
                    return Err(Error::ResourceTypeMismatch(name.to_owned()).into());
                }
                Ok(index)
            }
            None => {
                let index = self.resources.len();
                self.resources.push(RenderResource::texture(index, name));
                self.resource_to_index.insert(name.to_owned(), index);
                Ok(index)
            }
        }
    }

    pub(crate) fn buffer_resource_index(&mut self, name: &str) -> Result<usize> {
        match self.resource_to_index.get(name) {
            Some(&index) => {
                if !self.resources[index].is_buffer() {
                    return Err(Error::ResourceTypeMismatch(name.to_owned()).into());
                }
                Ok(index)
            }
            None => {
                let index = self.resources.len();
                self.resources.push(RenderResource::buffer(index, name));
                self.resource_to_index.insert(name.to_owned(), index);
                Ok(index)
            }
        }
    }
}

/// Swapchain lifecycle events the graph subscribes to. On a change the graph
/// rebinds the swapchain view, recomputes dependent dimensions and rebakes; on
/// destruction it releases every physical allocation.
pub enum SwapchainEvent<D: RenderDevice> {
    Changed {
        dimensions: ResourceDimensions,
        view: D::ImageView,
    },
    Destroyed,
}

/// Dot export of the baked dependency graph, for external visualization.
pub trait GraphViz {
    fn dot(&self) -> Result<String>;
}

impl<D: RenderDevice> GraphViz for RenderGraph<D> {
    fn dot(&self) -> Result<String> {
        Ok(format!("{:?}", Dot::new(&self.plan()?.dependency_graph)))
    }
}
