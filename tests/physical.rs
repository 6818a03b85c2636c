//! Physical resource planning tests: dimension resolution, aliasing,
//! transients and history double-buffering.

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

#[test]
fn size_classes_resolve_transitively() -> Result<()> {
    let mut graph: Graph = RenderGraph::new();
    graph.set_backbuffer_dimensions(swapchain_dimensions(1280, 720));
    {
        let mut fixed = graph.add_pass("fixed", FRAGMENT);
        fixed.add_color_output(
            "absolute",
            AttachmentInfo {
                size_class: SizeClass::Absolute,
                size_x: 320.0,
                size_y: 240.0,
                format: vk::Format::R8G8B8A8_UNORM,
                persistent: false,
                ..Default::default()
            },
            None,
        )?;
        fixed.set_implementation(EmptyPassImplementation);
    }
    {
        let mut half = graph.add_pass("half", FRAGMENT);
        half.add_color_output(
            "half-res",
            AttachmentInfo {
                size_x: 0.5,
                size_y: 0.5,
                format: vk::Format::R8G8B8A8_UNORM,
                persistent: false,
                ..Default::default()
            },
            None,
        )?;
        half.set_implementation(EmptyPassImplementation);
    }
    {
        let mut derived = graph.add_pass("derived", FRAGMENT);
        derived.add_color_output(
            "doubled",
            AttachmentInfo {
                size_class: SizeClass::InputRelative,
                size_x: 2.0,
                size_y: 2.0,
                format: vk::Format::R8G8B8A8_UNORM,
                size_relative_name: Some(String::from("absolute")),
                persistent: false,
                ..Default::default()
            },
            None,
        )?;
        derived.set_implementation(EmptyPassImplementation);
    }
    {
        let mut compose = graph.add_pass("compose", FRAGMENT);
        compose.add_texture_input("absolute")?;
        compose.add_texture_input("half-res")?;
        compose.add_texture_input("doubled")?;
        compose.add_color_output("backbuffer", AttachmentInfo::default(), None)?;
        compose.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("backbuffer");
    graph.bake()?;

    let dimensions = graph.physical_dimensions()?;
    let absolute = &dimensions[slot(&graph, "absolute")];
    assert_eq!((absolute.width, absolute.height), (320, 240));
    let half_res = &dimensions[slot(&graph, "half-res")];
    assert_eq!((half_res.width, half_res.height), (640, 360));
    let doubled = &dimensions[slot(&graph, "doubled")];
    assert_eq!((doubled.width, doubled.height), (640, 480));
    // The backbuffer picks up the swapchain format when left UNDEFINED.
    let back = &dimensions[graph.swapchain_physical_index()?];
    assert_eq!(back.format, vk::Format::B8G8R8A8_SRGB);
    assert_eq!((back.width, back.height), (1280, 720));
    Ok(())
}

#[test]
fn size_relation_cycle_is_rejected() -> Result<()> {
    let mut graph: Graph = RenderGraph::new();
    graph.set_backbuffer_dimensions(swapchain_dimensions(1280, 720));
    let relative = |to: &str| AttachmentInfo {
        size_class: SizeClass::InputRelative,
        size_relative_name: Some(to.to_owned()),
        format: vk::Format::R8G8B8A8_UNORM,
        persistent: false,
        ..Default::default()
    };
    {
        let mut a = graph.add_pass("a", FRAGMENT);
        a.add_color_output("ping", relative("pong"), None)?;
        a.set_implementation(EmptyPassImplementation);
    }
    {
        let mut b = graph.add_pass("b", FRAGMENT);
        b.add_color_output("pong", relative("ping"), None)?;
        b.set_implementation(EmptyPassImplementation);
    }
    {
        let mut compose = graph.add_pass("compose", FRAGMENT);
        compose.add_texture_input("ping")?;
        compose.add_texture_input("pong")?;
        compose.add_color_output("backbuffer", AttachmentInfo::default(), None)?;
        compose.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("backbuffer");
    let error = graph.bake().unwrap_err();
    assert!(matches!(graph_error(&error), Error::UnresolvedDimensions(_)));
    Ok(())
}

#[test]
fn disjoint_scratch_images_share_one_allocation() -> Result<()> {
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
        present.add_color_output("backbuffer", AttachmentInfo::default(), None)?;
        present.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("backbuffer");
    graph.bake()?;

    // s0 is dead by the time s1 is written; one image backs both.
    assert_eq!(slot(&graph, "s0"), slot(&graph, "s1"));
    // mid overlaps both and needs its own allocation.
    assert_ne!(slot(&graph, "mid"), slot(&graph, "s0"));
    Ok(())
}

#[test]
fn overlapping_lifetimes_do_not_alias() -> Result<()> {
    let mut graph: Graph = RenderGraph::new();
    graph.set_backbuffer_dimensions(swapchain_dimensions(1280, 720));
    let scratch = scratch_attachment(vk::Format::R8G8B8A8_UNORM);
    {
        let mut a = graph.add_pass("a", FRAGMENT);
        a.add_color_output("first", scratch.clone(), None)?;
        a.set_implementation(EmptyPassImplementation);
    }
    {
        let mut b = graph.add_pass("b", FRAGMENT);
        b.add_color_output("second", scratch.clone(), None)?;
        b.set_implementation(EmptyPassImplementation);
    }
    {
        let mut compose = graph.add_pass("compose", FRAGMENT);
        compose.add_texture_input("first")?;
        compose.add_texture_input("second")?;
        compose.add_color_output("backbuffer", AttachmentInfo::default(), None)?;
        compose.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("backbuffer");
    graph.bake()?;
    assert_ne!(slot(&graph, "first"), slot(&graph, "second"));
    Ok(())
}

#[test]
fn input_twin_forces_shared_allocation_and_load() -> Result<()> {
    let mut graph: Graph = RenderGraph::new();
    graph.set_backbuffer_dimensions(swapchain_dimensions(1280, 720));
    {
        let mut paint = graph.add_pass("paint", FRAGMENT);
        paint.add_color_output("a", scratch_attachment(vk::Format::R8G8B8A8_UNORM), None)?;
        paint.set_implementation(EmptyPassImplementation);
    }
    {
        let mut compose = graph.add_pass("compose", FRAGMENT);
        compose.add_color_output(
            "b",
            scratch_attachment(vk::Format::R8G8B8A8_UNORM),
            Some("a"),
        )?;
        compose.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("b");
    graph.bake()?;

    assert_eq!(slot(&graph, "a"), slot(&graph, "b"));

    // The read-modify-write loads the previous contents.
    let compose_pass = graph.pass("compose").unwrap().physical_pass_index().unwrap();
    let physical = &graph.physical_passes()?[compose_pass];
    let info = physical.render_pass_info.as_ref().unwrap();
    assert_eq!(info.color_ops[0].load_op, vk::AttachmentLoadOp::LOAD);
    Ok(())
}

#[test]
fn history_input_double_buffers_and_never_aliases() -> Result<()> {
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
        post.add_color_output("backbuffer", AttachmentInfo::default(), None)?;
        post.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("backbuffer");
    graph.bake()?;

    let taa_slot = slot(&graph, "taa-out");
    assert!(graph.physical_image_has_history()?[taa_slot]);
    // Same dimensions as "scene", but history resources never alias.
    assert_ne!(taa_slot, slot(&graph, "scene"));
    Ok(())
}

#[test]
fn subpass_local_attachments_become_transient() -> Result<()> {
    let mut graph: Graph = RenderGraph::new();
    graph.set_backbuffer_dimensions(swapchain_dimensions(1280, 720));
    {
        let mut geometry = graph.add_pass("geometry", FRAGMENT);
        geometry.add_color_output("c0", scratch_attachment(vk::Format::R8G8B8A8_UNORM), None)?;
        geometry.set_depth_stencil_output("depth", scratch_attachment(vk::Format::D32_SFLOAT))?;
        geometry.set_implementation(EmptyPassImplementation);
    }
    {
        let mut lighting = graph.add_pass("lighting", FRAGMENT);
        lighting.add_attachment_input("c0")?;
        lighting.set_depth_stencil_input("depth")?;
        lighting.add_color_output("backbuffer", AttachmentInfo::default(), None)?;
        lighting.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("backbuffer");
    graph.bake()?;

    let dimensions = graph.physical_dimensions()?;
    assert!(dimensions[slot(&graph, "c0")].transient);
    assert!(dimensions[slot(&graph, "depth")].transient);
    assert!(!dimensions[graph.swapchain_physical_index()?].transient);
    Ok(())
}

#[test]
fn sampled_attachments_are_not_transient() -> Result<()> {
    let mut graph: Graph = RenderGraph::new();
    graph.set_backbuffer_dimensions(swapchain_dimensions(1280, 720));
    {
        let mut scene = graph.add_pass("scene", FRAGMENT);
        scene.add_color_output("hdr", scratch_attachment(vk::Format::R16G16B16A16_SFLOAT), None)?;
        scene.set_implementation(EmptyPassImplementation);
    }
    {
        let mut blit = graph.add_pass("blit", FRAGMENT);
        blit.add_texture_input("hdr")?;
        blit.add_color_output("backbuffer", AttachmentInfo::default(), None)?;
        blit.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("backbuffer");
    graph.bake()?;
    assert!(!graph.physical_dimensions()?[slot(&graph, "hdr")].transient);
    Ok(())
}

#[test]
fn buffers_carry_their_descriptor() -> Result<()> {
    let mut graph: Graph = RenderGraph::new();
    graph.set_backbuffer_dimensions(swapchain_dimensions(1280, 720));
    let particles = BufferInfo {
        size: 65536,
        usage: vk::BufferUsageFlags::STORAGE_BUFFER,
        persistent: true,
    };
    {
        let mut simulate = graph.add_pass("simulate", COMPUTE);
        simulate.add_storage_output("particles", particles, None)?;
        simulate.set_implementation(EmptyPassImplementation);
    }
    {
        let mut draw = graph.add_pass("draw", FRAGMENT);
        draw.add_storage_read_only_input("particles")?;
        draw.add_color_output("backbuffer", AttachmentInfo::default(), None)?;
        draw.set_implementation(EmptyPassImplementation);
    }
    graph.set_backbuffer_source("backbuffer");
    graph.bake()?;

    let dimensions = &graph.physical_dimensions()?[slot(&graph, "particles")];
    assert!(dimensions.is_buffer());
    assert_eq!(dimensions.buffer_info, particles);
    assert!(dimensions.persistent);
    Ok(())
}
