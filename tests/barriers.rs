//! Barrier planning and subpass dependency tests against the baked plan.

mod framework;

use anyhow::Result;
use ash::vk;
use deimos::prelude::*;
use framework::*;

type Graph = RenderGraph<MockDevice>;

const FRAGMENT: vk::PipelineStageFlags = vk::PipelineStageFlags::FRAGMENT_SHADER;
const COMPUTE: vk::PipelineStageFlags = vk::PipelineStageFlags::COMPUTE_SHADER;

fn slot(graph: &Graph, name: &str) -> usize {
    graph.resource(name).unwrap().physical_index().unwrap()
}

fn passthrough_graph() -> Result<Graph> {
    let mut graph: Graph = RenderGraph::new();
    graph.set_backbuffer_dimensions(swapchain_dimensions(1280, 720));
    {
        let mut scene = graph.add_pass("scene", FRAGMENT);
        scene.add_color_output("in", scratch_attachment(vk::Format::R8G8B8A8_UNORM), None)?;
        scene.set_implementation(EmptyPassImplementation);
    }
    {
        let mut blit = graph.add_pass("blit", FRAGMENT);
        blit.add_texture_input("in")?;
        blit.add_color_output("back", AttachmentInfo::default(), None)?;
        blit.set_implementation(ShaderBlit::new("blit.vert", "blit.frag"));
    }
    graph.set_backbuffer_source("back");
    graph.bake()?;
    Ok(graph)
}

#[test]
fn passthrough_blit_barriers() -> Result<()> {
    let graph = passthrough_graph()?;
    let physical_passes = graph.physical_passes()?;
    assert_eq!(physical_passes.len(), 2);

    // One physical pass per logical pass, one color attachment each.
    let blit_pass = &physical_passes[1];
    assert_eq!(blit_pass.physical_color_attachments.len(), 1);
    assert_eq!(
        blit_pass.physical_color_attachments[0],
        graph.swapchain_physical_index()?
    );

    // The sampled input is invalidated into SHADER_READ_ONLY against the
    // producer's color write.
    let input = slot(&graph, "in");
    assert_eq!(blit_pass.invalidate.len(), 1);
    let barrier = &blit_pass.invalidate[0];
    assert_eq!(barrier.resource, input);
    assert_eq!(barrier.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!(
        barrier.src_stages,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
    );
    assert_eq!(barrier.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    assert_eq!(barrier.dst_stages, FRAGMENT);
    assert_eq!(barrier.dst_access, vk::AccessFlags::SHADER_READ);

    // The producer's own first use is a frame-boundary transition, not an
    // inline barrier.
    assert!(physical_passes[0].invalidate.is_empty());
    assert!(graph
        .frame_barriers()?
        .initial
        .iter()
        .any(|barrier| barrier.resource == input
            && barrier.old_layout == vk::ImageLayout::UNDEFINED
            && barrier.new_layout == vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));

    // The backbuffer flushes to PRESENT after the last pass.
    let present = graph.frame_barriers()?.present.unwrap();
    assert_eq!(present.resource, graph.swapchain_physical_index()?);
    assert_eq!(present.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    assert_eq!(
        present.src_stages,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
    );
    assert_eq!(present.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    Ok(())
}

#[test]
fn merged_passes_use_subpass_dependencies() -> Result<()> {
    let mut graph: Graph = RenderGraph::new();
    graph.set_backbuffer_dimensions(swapchain_dimensions(1280, 720));
    {
        let mut geometry = graph.add_pass("geometry", FRAGMENT);
        geometry.add_color_output("c0", scratch_attachment(vk::Format::R8G8B8A8_UNORM), None)?;
        geometry.set_depth_stencil_output("d", scratch_attachment(vk::Format::D32_SFLOAT))?;
        geometry.set_implementation(EmptyPassImplementation);
    }
    {
        let mut lighting = graph.add_pass("lighting", FRAGMENT);
        lighting.add_attachment_input("c0")?;
        lighting.set_depth_stencil_input("d")?;
        lighting.add_color_output("back", AttachmentInfo::default(), None)?;
        lighting.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("back");
    graph.bake()?;

    let physical_passes = graph.physical_passes()?;
    assert_eq!(physical_passes.len(), 1);
    let merged = &physical_passes[0];
    let info = merged.render_pass_info.as_ref().unwrap();
    assert_eq!(info.subpasses.len(), 2);

    // The color read is a subpass dependency, not a pipeline barrier.
    let dependency = info
        .dependencies
        .iter()
        .find(|dependency| dependency.src_subpass == 0 && dependency.dst_subpass == 1)
        .unwrap();
    assert!(dependency
        .src_stages
        .contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
    assert!(dependency.dst_stages.contains(FRAGMENT));
    assert!(dependency
        .dst_access
        .contains(vk::AccessFlags::INPUT_ATTACHMENT_READ));

    let c0 = slot(&graph, "c0");
    let d = slot(&graph, "d");
    assert!(merged
        .invalidate
        .iter()
        .all(|barrier| barrier.resource != c0 && barrier.resource != d));
    Ok(())
}

#[test]
fn unrelated_raster_passes_do_not_merge() -> Result<()> {
    let mut graph: Graph = RenderGraph::new();
    graph.set_backbuffer_dimensions(swapchain_dimensions(1280, 720));
    {
        let mut a = graph.add_pass("a", FRAGMENT);
        a.add_color_output("first", scratch_attachment(vk::Format::R8G8B8A8_UNORM), None)?;
        a.set_implementation(EmptyPassImplementation);
    }
    {
        let mut b = graph.add_pass("b", FRAGMENT);
        b.add_texture_input("first")?;
        b.add_color_output("back", AttachmentInfo::default(), None)?;
        b.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("back");
    graph.bake()?;
    assert_eq!(graph.physical_passes()?.len(), 2);
    Ok(())
}

#[test]
fn visible_reads_are_not_rebarriered() -> Result<()> {
    let mut graph: Graph = RenderGraph::new();
    graph.set_backbuffer_dimensions(swapchain_dimensions(1280, 720));
    {
        let mut writer = graph.add_pass("writer", FRAGMENT);
        writer.add_color_output("t", scratch_attachment(vk::Format::R8G8B8A8_UNORM), None)?;
        writer.set_implementation(EmptyPassImplementation);
    }
    {
        let mut first = graph.add_pass("first-reader", FRAGMENT);
        first.add_texture_input("t")?;
        first.add_color_output("x", scratch_attachment(vk::Format::R8G8B8A8_UNORM), None)?;
        first.set_implementation(EmptyPassImplementation);
    }
    {
        let mut second = graph.add_pass("second-reader", FRAGMENT);
        second.add_texture_input("t")?;
        second.add_texture_input("x")?;
        second.add_color_output("back", AttachmentInfo::default(), None)?;
        second.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("back");
    graph.bake()?;

    let physical_passes = graph.physical_passes()?;
    assert_eq!(physical_passes.len(), 3);
    let t = slot(&graph, "t");
    let x = slot(&graph, "x");

    // first-reader pays for the transition of t.
    assert!(physical_passes[1]
        .invalidate
        .iter()
        .any(|barrier| barrier.resource == t));
    // second-reader only needs x; t is already visible in the fragment stage.
    assert_eq!(physical_passes[2].invalidate.len(), 1);
    assert_eq!(physical_passes[2].invalidate[0].resource, x);
    Ok(())
}

#[test]
fn aliased_slot_gets_hazard_barriers() -> Result<()> {
    let mut graph: Graph = RenderGraph::new();
    graph.set_backbuffer_dimensions(swapchain_dimensions(1280, 720));
    let scratch = scratch_attachment(vk::Format::R16G16B16A16_SFLOAT);
    {
        let mut generate = graph.add_pass("generate", COMPUTE);
        generate.add_storage_texture_output("s0", scratch.clone(), None)?;
        generate.set_implementation(EmptyPassImplementation);
    }
    {
        let mut blur = graph.add_pass("blur", COMPUTE);
        blur.add_storage_texture_input("s0")?;
        blur.add_storage_texture_output("mid", scratch.clone(), None)?;
        blur.set_implementation(EmptyPassImplementation);
    }
    {
        let mut sharpen = graph.add_pass("sharpen", COMPUTE);
        sharpen.add_storage_texture_input("mid")?;
        sharpen.add_storage_texture_output("s1", scratch.clone(), None)?;
        sharpen.set_implementation(EmptyPassImplementation);
    }
    {
        let mut present = graph.add_pass("present", FRAGMENT);
        present.add_texture_input("s1")?;
        present.add_color_output("back", AttachmentInfo::default(), None)?;
        present.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("back");
    graph.bake()?;

    let shared = slot(&graph, "s0");
    assert_eq!(shared, slot(&graph, "s1"));
    let physical_passes = graph.physical_passes()?;

    // blur reads what generate wrote through the shared slot.
    let read = physical_passes[1]
        .invalidate
        .iter()
        .find(|barrier| barrier.resource == shared)
        .unwrap();
    assert_eq!(read.src_access, vk::AccessFlags::SHADER_WRITE);
    assert_eq!(read.dst_access, vk::AccessFlags::SHADER_READ);

    // sharpen recycles the slot for s1: write-after-read needs an execution
    // dependency against blur.
    let war = physical_passes[2]
        .invalidate
        .iter()
        .find(|barrier| barrier.resource == shared)
        .unwrap();
    assert_eq!(war.src_stages, COMPUTE);
    assert_eq!(war.src_access, vk::AccessFlags::empty());
    assert_eq!(war.dst_access, vk::AccessFlags::SHADER_WRITE);
    assert_eq!(war.old_layout, vk::ImageLayout::GENERAL);
    assert_eq!(war.new_layout, vk::ImageLayout::GENERAL);
    Ok(())
}

#[test]
fn history_reads_are_planned_per_frame() -> Result<()> {
    let mut graph: Graph = RenderGraph::new();
    graph.set_backbuffer_dimensions(swapchain_dimensions(1280, 720));
    let scratch = scratch_attachment(vk::Format::R16G16B16A16_SFLOAT);
    {
        let mut scene = graph.add_pass("scene", FRAGMENT);
        scene.add_color_output("scene", scratch.clone(), None)?;
        scene.set_implementation(EmptyPassImplementation);
    }
    {
        let mut taa = graph.add_pass("taa", FRAGMENT);
        taa.add_texture_input("scene")?;
        taa.add_history_input("taa-out")?;
        taa.add_color_output("taa-out", scratch.clone(), None)?;
        taa.set_implementation(EmptyPassImplementation);
    }
    {
        let mut post = graph.add_pass("post", FRAGMENT);
        post.add_texture_input("taa-out")?;
        post.add_color_output("back", AttachmentInfo::default(), None)?;
        post.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("back");
    graph.bake()?;

    let taa_slot = slot(&graph, "taa-out");
    let barriers = graph.frame_barriers()?;
    let read = barriers
        .history_reads
        .iter()
        .find(|read| read.resource == taa_slot)
        .unwrap();
    assert_eq!(read.dst_stages, FRAGMENT);
    // End of frame, the timeline leaves the image in its sampled state.
    assert_eq!(read.old_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

    // The write target is recycled with discarded contents every frame.
    assert!(barriers
        .steady
        .iter()
        .any(|barrier| barrier.resource == taa_slot
            && barrier.old_layout == vk::ImageLayout::UNDEFINED));
    Ok(())
}

#[test]
fn persistent_feedback_wraps_between_frames() -> Result<()> {
    let graph = passthrough_graph()?;
    // "in" is non-persistent: rewritten from scratch each frame.
    let input = slot(&graph, "in");
    let steady = &graph.frame_barriers()?.steady;
    let wrap = steady
        .iter()
        .find(|barrier| barrier.resource == input)
        .unwrap();
    assert_eq!(wrap.old_layout, vk::ImageLayout::UNDEFINED);
    assert_eq!(wrap.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    // Reads from last frame still fence the new write.
    assert_eq!(wrap.src_stages, FRAGMENT);
    Ok(())
}
