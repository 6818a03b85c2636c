//! Logical passes and the builder used to declare them.
//!
//! A pass is declared with [`RenderGraph::add_pass`](crate::RenderGraph::add_pass),
//! which returns a [`PassBuilder`]. The builder resolves resource names against
//! the graph's registry (creating resources lazily on first reference) and
//! records typed edges on the pass. Passes and resources only ever refer to
//! each other through arena indices; the builder is the only place holding a
//! live borrow of the graph.
//!
//! # Example
//!
//! Declaring a tonemap pass that samples an HDR image and writes the
//! backbuffer:
//! ```no_run
//! # use deimos::prelude::*;
//! # use ash::vk;
//! # fn declare<D: RenderDevice>(graph: &mut RenderGraph<D>) -> anyhow::Result<()> {
//! let mut tonemap = graph.add_pass("tonemap", vk::PipelineStageFlags::FRAGMENT_SHADER);
//! tonemap.add_texture_input("hdr")?;
//! tonemap.add_color_output("backbuffer", AttachmentInfo::default(), None)?;
//! tonemap.set_implementation(ShaderBlit::new("quad.vert", "tonemap.frag"));
//! graph.set_backbuffer_source("backbuffer");
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use ash::vk;

use crate::device::{CommandRecorder, RenderDevice, StockSampler};
use crate::error::Error;
use crate::graph::render_graph::RenderGraph;
use crate::graph::resource::{AttachmentInfo, BufferInfo, RenderResource};

/// One logical pass in the graph: a pipeline stage mask and typed edge lists
/// referencing resources by arena index.
///
/// The color output, color input and color scale input lists are parallel: the
/// entry at slot `i` of the input lists is the optional *input twin* of color
/// output `i` (a declared read-modify-write that forces both onto the same
/// physical resource), either read as an attachment or consumed through a
/// scaling blit.
#[derive(Debug)]
pub struct RenderPass {
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) stages: vk::PipelineStageFlags,
    pub(crate) physical_pass: Option<usize>,

    pub(crate) color_outputs: Vec<usize>,
    pub(crate) color_inputs: Vec<Option<usize>>,
    pub(crate) color_scale_inputs: Vec<Option<usize>>,
    pub(crate) texture_inputs: Vec<usize>,
    pub(crate) attachment_inputs: Vec<usize>,
    pub(crate) history_inputs: Vec<usize>,
    pub(crate) storage_texture_outputs: Vec<usize>,
    pub(crate) storage_texture_inputs: Vec<Option<usize>>,
    pub(crate) storage_texture_read_inputs: Vec<usize>,
    pub(crate) uniform_inputs: Vec<usize>,
    pub(crate) storage_outputs: Vec<usize>,
    pub(crate) storage_inputs: Vec<Option<usize>>,
    pub(crate) storage_read_inputs: Vec<usize>,
    pub(crate) depth_stencil_input: Option<usize>,
    pub(crate) depth_stencil_output: Option<usize>,
}

impl RenderPass {
    pub(crate) fn new(index: usize, name: impl Into<String>, stages: vk::PipelineStageFlags) -> Self {
        Self {
            index,
            name: name.into(),
            stages,
            physical_pass: None,
            color_outputs: vec![],
            color_inputs: vec![],
            color_scale_inputs: vec![],
            texture_inputs: vec![],
            attachment_inputs: vec![],
            history_inputs: vec![],
            storage_texture_outputs: vec![],
            storage_texture_inputs: vec![],
            storage_texture_read_inputs: vec![],
            uniform_inputs: vec![],
            storage_outputs: vec![],
            storage_inputs: vec![],
            storage_read_inputs: vec![],
            depth_stencil_input: None,
            depth_stencil_output: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipeline stages this pass runs in, as declared on `add_pass`.
    pub fn stages(&self) -> vk::PipelineStageFlags {
        self.stages
    }

    /// Index of the physical pass this pass was merged into by the last bake.
    pub fn physical_pass_index(&self) -> Option<usize> {
        self.physical_pass
    }

    pub fn color_outputs(&self) -> &[usize] {
        &self.color_outputs
    }

    pub fn color_inputs(&self) -> &[Option<usize>] {
        &self.color_inputs
    }

    pub fn color_scale_inputs(&self) -> &[Option<usize>] {
        &self.color_scale_inputs
    }

    pub fn texture_inputs(&self) -> &[usize] {
        &self.texture_inputs
    }

    pub fn attachment_inputs(&self) -> &[usize] {
        &self.attachment_inputs
    }

    pub fn history_inputs(&self) -> &[usize] {
        &self.history_inputs
    }

    pub fn storage_texture_outputs(&self) -> &[usize] {
        &self.storage_texture_outputs
    }

    pub fn storage_texture_read_inputs(&self) -> &[usize] {
        &self.storage_texture_read_inputs
    }

    pub fn uniform_inputs(&self) -> &[usize] {
        &self.uniform_inputs
    }

    pub fn storage_outputs(&self) -> &[usize] {
        &self.storage_outputs
    }

    pub fn storage_read_inputs(&self) -> &[usize] {
        &self.storage_read_inputs
    }

    pub fn depth_stencil_input(&self) -> Option<usize> {
        self.depth_stencil_input
    }

    pub fn depth_stencil_output(&self) -> Option<usize> {
        self.depth_stencil_output
    }

    /// A pass performs raster work if it writes any color or depth attachment.
    /// Compute-only passes never merge into multi-subpass render passes.
    pub(crate) fn is_raster(&self) -> bool {
        !self.color_outputs.is_empty() || self.depth_stencil_output.is_some()
    }

    /// All resources whose producers this pass must run after. History inputs
    /// are absent, they refer to the previous frame.
    pub(crate) fn dependency_inputs(&self) -> Vec<usize> {
        let mut inputs = Vec::new();
        inputs.extend(self.color_inputs.iter().flatten().copied());
        inputs.extend(self.color_scale_inputs.iter().flatten().copied());
        inputs.extend(self.attachment_inputs.iter().copied());
        inputs.extend(self.texture_inputs.iter().copied());
        inputs.extend(self.storage_texture_inputs.iter().flatten().copied());
        inputs.extend(self.storage_texture_read_inputs.iter().copied());
        inputs.extend(self.uniform_inputs.iter().copied());
        inputs.extend(self.storage_inputs.iter().flatten().copied());
        inputs.extend(self.storage_read_inputs.iter().copied());
        inputs.extend(self.depth_stencil_input);
        inputs
    }

    /// Every resource this pass touches in any role, history included.
    pub(crate) fn referenced_resources(&self) -> Vec<usize> {
        let mut all = self.dependency_inputs();
        all.extend(&self.color_outputs);
        all.extend(&self.storage_texture_outputs);
        all.extend(&self.storage_outputs);
        all.extend(self.depth_stencil_output);
        all.extend(&self.history_inputs);
        all
    }

    /// True if `resource` is declared as the input twin of one of this pass's
    /// outputs. Twin reads are the one sanctioned way for a pass to consume a
    /// resource aliasing its own output.
    pub(crate) fn is_input_twin(&self, resource: usize) -> bool {
        self.color_inputs.iter().flatten().any(|&r| r == resource)
            || self.color_scale_inputs.iter().flatten().any(|&r| r == resource)
            || self.storage_texture_inputs.iter().flatten().any(|&r| r == resource)
            || self.storage_inputs.iter().flatten().any(|&r| r == resource)
    }
}

/// Builder handle returned from [`RenderGraph::add_pass`]. Each edge operation
/// resolves (or lazily creates) the named resource, records the pass into its
/// read or write set, and appends the resource to the pass's typed edge list.
///
/// Re-adding the same resource on the same edge is a no-op. Using a name as an
/// image in one edge and as a buffer in another fails with
/// [`Error::ResourceTypeMismatch`].
pub struct PassBuilder<'a, D: RenderDevice> {
    pub(crate) graph: &'a mut RenderGraph<D>,
    pub(crate) pass: usize,
}

impl<'a, D: RenderDevice> PassBuilder<'a, D> {
    /// Arena index of the pass being built, usable after the builder is gone.
    pub fn index(&self) -> usize {
        self.pass
    }

    /// Declare a color attachment this pass writes. When `input` is given, the
    /// write is a read-modify-write of that resource, and both are forced onto
    /// the same physical allocation.
    pub fn add_color_output(
        &mut self,
        name: &str,
        info: AttachmentInfo,
        input: Option<&str>,
    ) -> Result<usize> {
        self.graph.invalidate_bake();
        let res = self.graph.texture_resource_index(name)?;
        self.graph.resources[res].set_attachment_info(info);
        self.graph.resources[res].written_in_pass(self.pass);
        let input_index = match input {
            Some(input_name) => {
                let idx = self.graph.texture_resource_index(input_name)?;
                self.graph.resources[idx].read_in_pass(self.pass);
                Some(idx)
            }
            None => None,
        };
        let pass = &mut self.graph.passes[self.pass];
        if !pass.color_outputs.contains(&res) {
            pass.color_outputs.push(res);
            pass.color_inputs.push(input_index);
            pass.color_scale_inputs.push(None);
        }
        Ok(res)
    }

    /// Promote the color input at `index` to a scaled input: instead of being
    /// loaded as an attachment, it is blitted into the attachment through a
    /// fullscreen sampling draw before the subpass runs. Required whenever the
    /// input's resolution differs from the output's.
    pub fn make_color_input_scaled(&mut self, index: usize) {
        self.graph.invalidate_bake();
        let pass = &mut self.graph.passes[self.pass];
        let plain = pass.color_inputs[index].take();
        let scaled = pass.color_scale_inputs[index].take();
        pass.color_inputs[index] = scaled;
        pass.color_scale_inputs[index] = plain;
    }

    /// Declare the depth/stencil attachment this pass writes.
    pub fn set_depth_stencil_output(&mut self, name: &str, info: AttachmentInfo) -> Result<usize> {
        self.graph.invalidate_bake();
        let res = self.graph.texture_resource_index(name)?;
        self.graph.resources[res].set_attachment_info(info);
        self.graph.resources[res].written_in_pass(self.pass);
        self.graph.passes[self.pass].depth_stencil_output = Some(res);
        Ok(res)
    }

    /// Declare a read-only depth/stencil attachment.
    pub fn set_depth_stencil_input(&mut self, name: &str) -> Result<usize> {
        self.graph.invalidate_bake();
        let res = self.graph.texture_resource_index(name)?;
        self.graph.resources[res].read_in_pass(self.pass);
        self.graph.passes[self.pass].depth_stencil_input = Some(res);
        Ok(res)
    }

    /// Declare an input attachment (subpass-local read). Reads through this
    /// edge allow the pass to merge with the producer into one render pass.
    pub fn add_attachment_input(&mut self, name: &str) -> Result<usize> {
        self.graph.invalidate_bake();
        let res = self.graph.texture_resource_index(name)?;
        self.graph.resources[res].read_in_pass(self.pass);
        let pass = &mut self.graph.passes[self.pass];
        if !pass.attachment_inputs.contains(&res) {
            pass.attachment_inputs.push(res);
        }
        Ok(res)
    }

    /// Declare a sampled image read.
    pub fn add_texture_input(&mut self, name: &str) -> Result<usize> {
        self.graph.invalidate_bake();
        let res = self.graph.texture_resource_index(name)?;
        self.graph.resources[res].read_in_pass(self.pass);
        let pass = &mut self.graph.passes[self.pass];
        if !pass.texture_inputs.contains(&res) {
            pass.texture_inputs.push(res);
        }
        Ok(res)
    }

    /// Declare a read of the *previous frame's* value of `name`. This does not
    /// create a dependency on this frame's producer, but forces the resource
    /// to be double buffered and excluded from aliasing.
    pub fn add_history_input(&mut self, name: &str) -> Result<usize> {
        self.graph.invalidate_bake();
        let res = self.graph.texture_resource_index(name)?;
        let pass = &mut self.graph.passes[self.pass];
        if !pass.history_inputs.contains(&res) {
            pass.history_inputs.push(res);
        }
        Ok(res)
    }

    /// Declare a storage image this pass writes, optionally as a
    /// read-modify-write of `input`.
    pub fn add_storage_texture_output(
        &mut self,
        name: &str,
        info: AttachmentInfo,
        input: Option<&str>,
    ) -> Result<usize> {
        self.graph.invalidate_bake();
        let res = self.graph.texture_resource_index(name)?;
        self.graph.resources[res].set_attachment_info(info);
        self.graph.resources[res].set_storage();
        self.graph.resources[res].written_in_pass(self.pass);
        let input_index = match input {
            Some(input_name) => {
                let idx = self.graph.texture_resource_index(input_name)?;
                self.graph.resources[idx].set_storage();
                self.graph.resources[idx].read_in_pass(self.pass);
                Some(idx)
            }
            None => None,
        };
        let pass = &mut self.graph.passes[self.pass];
        if !pass.storage_texture_outputs.contains(&res) {
            pass.storage_texture_outputs.push(res);
            pass.storage_texture_inputs.push(input_index);
        }
        Ok(res)
    }

    /// Declare a storage image read.
    pub fn add_storage_texture_input(&mut self, name: &str) -> Result<usize> {
        self.graph.invalidate_bake();
        let res = self.graph.texture_resource_index(name)?;
        self.graph.resources[res].set_storage();
        self.graph.resources[res].read_in_pass(self.pass);
        let pass = &mut self.graph.passes[self.pass];
        if !pass.storage_texture_read_inputs.contains(&res) {
            pass.storage_texture_read_inputs.push(res);
        }
        Ok(res)
    }

    /// Declare a uniform buffer read.
    pub fn add_uniform_input(&mut self, name: &str) -> Result<usize> {
        self.graph.invalidate_bake();
        let res = self.graph.buffer_resource_index(name)?;
        self.graph.resources[res].read_in_pass(self.pass);
        let pass = &mut self.graph.passes[self.pass];
        if !pass.uniform_inputs.contains(&res) {
            pass.uniform_inputs.push(res);
        }
        Ok(res)
    }

    /// Declare a storage buffer this pass writes, optionally as a
    /// read-modify-write of `input`.
    pub fn add_storage_output(
        &mut self,
        name: &str,
        info: BufferInfo,
        input: Option<&str>,
    ) -> Result<usize> {
        self.graph.invalidate_bake();
        let res = self.graph.buffer_resource_index(name)?;
        self.graph.resources[res].set_buffer_info(info);
        self.graph.resources[res].written_in_pass(self.pass);
        let input_index = match input {
            Some(input_name) => {
                let idx = self.graph.buffer_resource_index(input_name)?;
                self.graph.resources[idx].read_in_pass(self.pass);
                Some(idx)
            }
            None => None,
        };
        let pass = &mut self.graph.passes[self.pass];
        if !pass.storage_outputs.contains(&res) {
            pass.storage_outputs.push(res);
            pass.storage_inputs.push(input_index);
        }
        Ok(res)
    }

    /// Declare a read-only storage buffer input.
    pub fn add_storage_read_only_input(&mut self, name: &str) -> Result<usize> {
        self.graph.invalidate_bake();
        let res = self.graph.buffer_resource_index(name)?;
        self.graph.resources[res].read_in_pass(self.pass);
        let pass = &mut self.graph.passes[self.pass];
        if !pass.storage_read_inputs.contains(&res) {
            pass.storage_read_inputs.push(res);
        }
        Ok(res)
    }

    /// Install the implementation invoked when this pass is recorded.
    pub fn set_implementation(&mut self, implementation: impl RenderPassImplementation<D> + 'static) {
        self.graph.implementations[self.pass] = Some(Box::new(implementation));
    }
}

/// Everything a pass implementation can resolve while recording: the pass's
/// own edges mapped to this frame's physical resources.
pub struct PassContext<'a, D: RenderDevice> {
    pub(crate) pass: &'a RenderPass,
    pub(crate) resources: &'a [RenderResource],
    pub(crate) attachments: &'a [Option<D::ImageView>],
    pub(crate) history: &'a [Option<D::ImageView>],
    pub(crate) history_valid: &'a [bool],
    pub(crate) buffers: &'a [Option<D::Buffer>],
}

impl<'a, D: RenderDevice> PassContext<'a, D> {
    pub fn pass(&self) -> &RenderPass {
        self.pass
    }

    fn physical_index(&self, resource: usize) -> Result<usize> {
        self.resources[resource]
            .physical_index
            .ok_or_else(|| Error::NotBaked.into())
    }

    /// Resolve any texture resource to its physical image.
    pub fn physical_texture(&self, resource: usize) -> Result<&D::ImageView> {
        let physical = self.physical_index(resource)?;
        self.attachments[physical]
            .as_ref()
            .ok_or_else(|| Error::NoResourceBound(physical).into())
    }

    /// Resolve any buffer resource to its physical buffer.
    pub fn physical_buffer(&self, resource: usize) -> Result<&D::Buffer> {
        let physical = self.physical_index(resource)?;
        self.buffers[physical]
            .as_ref()
            .ok_or_else(|| Error::NoResourceBound(physical).into())
    }

    /// The `index`-th texture input of the pass.
    pub fn texture_input(&self, index: usize) -> Result<&D::ImageView> {
        self.physical_texture(self.pass.texture_inputs[index])
    }

    /// The `index`-th history input of the pass: the image written by the
    /// previous execution of the graph, or `None` on the first frame.
    pub fn history_input(&self, index: usize) -> Result<Option<&D::ImageView>> {
        let physical = self.physical_index(self.pass.history_inputs[index])?;
        if !self.history_valid[physical] {
            return Ok(None);
        }
        Ok(Some(self.history[physical]
            .as_ref()
            .ok_or(Error::NoResourceBound(physical))?))
    }

    /// The `index`-th uniform input of the pass.
    pub fn uniform_input(&self, index: usize) -> Result<&D::Buffer> {
        self.physical_buffer(self.pass.uniform_inputs[index])
    }

    /// Bind all texture inputs of the pass to consecutive bindings starting at
    /// `start_binding`, sampled with `sampler`.
    pub fn set_texture_inputs(
        &self,
        cmd: &mut D::Recorder,
        set: u32,
        start_binding: u32,
        sampler: StockSampler,
    ) -> Result<()> {
        for (i, &resource) in self.pass.texture_inputs.iter().enumerate() {
            let view = self.physical_texture(resource)?;
            cmd.bind_sampled_image(set, start_binding + i as u32, view, sampler);
        }
        Ok(())
    }
}

/// Client-provided recording callback for one logical pass, with optional
/// clear value queries. The clear queries are consulted at bake time to pick
/// load ops, and again at record time for the actual values.
pub trait RenderPassImplementation<D: RenderDevice> {
    /// Clear value for the pass's `index`-th color output, or `None` to keep
    /// or discard previous contents.
    fn get_clear_color(&self, _index: usize) -> Option<vk::ClearColorValue> {
        None
    }

    /// Clear value for the depth/stencil output, if any.
    fn get_clear_depth_stencil(&self) -> Option<vk::ClearDepthStencilValue> {
        None
    }

    /// Record the pass's commands. For raster passes the command buffer is
    /// inside the proper subpass when this is invoked.
    fn build_render_pass(&mut self, ctx: &PassContext<D>, cmd: &mut D::Recorder) -> Result<()>;
}

/// Implementation that records nothing. Useful for passes that only exist for
/// their synchronization effects, and in tests.
#[derive(Debug, Default, Copy, Clone)]
pub struct EmptyPassImplementation;

impl<D: RenderDevice> RenderPassImplementation<D> for EmptyPassImplementation {
    fn build_render_pass(&mut self, _ctx: &PassContext<D>, _cmd: &mut D::Recorder) -> Result<()> {
        Ok(())
    }
}

/// Fullscreen shader blit: binds the given vertex/fragment program, samples
/// the pass's texture inputs on consecutive bindings and draws a fullscreen
/// triangle over the pass's attachments.
#[derive(Debug, Clone)]
pub struct ShaderBlit {
    vertex: String,
    fragment: String,
    sampler: StockSampler,
    defines: Vec<(String, i32)>,
}

impl ShaderBlit {
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
            sampler: StockSampler::LinearClamp,
            defines: vec![],
        }
    }

    pub fn set_defines(&mut self, defines: Vec<(String, i32)>) {
        self.defines = defines;
    }

    pub fn set_sampler(&mut self, sampler: StockSampler) {
        self.sampler = sampler;
    }
}

impl<D: RenderDevice> RenderPassImplementation<D> for ShaderBlit {
    fn build_render_pass(&mut self, ctx: &PassContext<D>, cmd: &mut D::Recorder) -> Result<()> {
        cmd.bind_blit_program(&self.vertex, &self.fragment, &self.defines);
        ctx.set_texture_inputs(cmd, 0, 0, self.sampler)?;
        cmd.draw_fullscreen();
        Ok(())
    }
}
