//! Unit tests for the renderpass derivation rules
//!
//! `RenderpassPlan` is pure over POD Vulkan types, so attachment
//! descriptions, dependency chains and clear-value derivation are all
//! verifiable without a device.

use ash::vk;
use nebula_engine::nebula::render::{
    AttachmentUsage, ImageFormat, SubpassAttachment, SubpassDesc,
};
use nebula_engine::nebula::Error;

use crate::vulkan_render_pass::RenderpassPlan;

const CLEAR: [f32; 4] = [0.025, 0.025, 0.025, 1.0];
const SWAPCHAIN_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

fn color_subpass(slots: &[u32]) -> SubpassDesc {
    SubpassDesc {
        color_attachments: slots
            .iter()
            .map(|&s| SubpassAttachment::color(s, ImageFormat::Rgba8))
            .collect(),
        ..Default::default()
    }
}

// ============================================================================
// ATTACHMENT DESCRIPTION TESTS
// ============================================================================

#[test]
fn test_color_attachment_description_defaults() {
    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&color_subpass(&[0]), vk::Format::UNDEFINED)
        .unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    let desc = plan.attachments[0].unwrap();
    assert_eq!(desc.format, vk::Format::R8G8B8A8_UNORM);
    assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_1);
    assert_eq!(desc.load_op, vk::AttachmentLoadOp::CLEAR);
    assert_eq!(desc.store_op, vk::AttachmentStoreOp::STORE);
    assert_eq!(desc.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
    assert_eq!(desc.initial_layout, vk::ImageLayout::UNDEFINED);
    assert_eq!(desc.final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
}

#[test]
fn test_renderpass_input_color_gets_shader_read_final_layout() {
    let subpass = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(0, ImageFormat::Rgba8)
            .with_usage(AttachmentUsage::RENDERPASS_INPUT)],
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&subpass, vk::Format::UNDEFINED).unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    assert_eq!(
        plan.attachments[0].unwrap().final_layout,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
}

#[test]
fn test_later_subpass_promotes_slot_to_sampled_output() {
    // Subpass 0 declares slot 0 plain; subpass 1 re-declares it sampled.
    // The final layout must reflect any declaration, not just the first.
    let second = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(0, ImageFormat::Rgba8)
            .with_usage(AttachmentUsage::RENDERPASS_INPUT)],
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&color_subpass(&[0]), vk::Format::UNDEFINED)
        .unwrap();
    plan.add_subpass(&second, vk::Format::UNDEFINED).unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    assert_eq!(
        plan.attachments[0].unwrap().final_layout,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );

    // The external tail dependency keys off the promoted layout
    let tail = plan.dependencies().last().unwrap();
    assert_eq!(tail.dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
    assert_eq!(tail.dst_access_mask, vk::AccessFlags::SHADER_READ);
}

#[test]
fn test_depth_attachment_description() {
    let subpass = SubpassDesc {
        depth_attachment: Some(SubpassAttachment::depth(0, ImageFormat::Depth32Float)),
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&subpass, vk::Format::D32_SFLOAT).unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    let desc = plan.attachments[0].unwrap();
    assert_eq!(desc.format, vk::Format::D32_SFLOAT);
    assert_eq!(desc.load_op, vk::AttachmentLoadOp::CLEAR);
    // Depth contents are not needed after the pass
    assert_eq!(desc.store_op, vk::AttachmentStoreOp::DONT_CARE);
    assert_eq!(
        desc.final_layout,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    );
}

#[test]
fn test_sampled_depth_gets_shader_read_final_layout() {
    let subpass = SubpassDesc {
        depth_attachment: Some(
            SubpassAttachment::depth(0, ImageFormat::Depth32Float)
                .with_usage(AttachmentUsage::RENDERPASS_INPUT),
        ),
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&subpass, vk::Format::D32_SFLOAT).unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    assert_eq!(
        plan.attachments[0].unwrap().final_layout,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
}

#[test]
fn test_framebuffer_layers_carry_through() {
    let mut plan = RenderpassPlan::new(true, false);
    assert_eq!(plan.framebuffer_layers(), 1);

    plan.set_framebuffer_layers(4);
    assert_eq!(plan.framebuffer_layers(), 4);

    // Zero is not a valid layer count
    plan.set_framebuffer_layers(0);
    assert_eq!(plan.framebuffer_layers(), 1);
}

#[test]
fn test_unspecified_format_resolves_to_swapchain() {
    let subpass = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(0, ImageFormat::None)],
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&subpass, vk::Format::UNDEFINED).unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    assert_eq!(plan.attachments[0].unwrap().format, SWAPCHAIN_FORMAT);
}

// ============================================================================
// DEPENDENCY CHAIN TESTS
// ============================================================================

#[test]
fn test_k_subpasses_yield_k_plus_one_dependencies() {
    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&color_subpass(&[0]), vk::Format::UNDEFINED)
        .unwrap();
    plan.add_subpass(&color_subpass(&[1]), vk::Format::UNDEFINED)
        .unwrap();
    plan.add_subpass(&color_subpass(&[2]), vk::Format::UNDEFINED)
        .unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    assert_eq!(plan.dependencies().len(), 4);

    let deps = plan.dependencies();
    assert_eq!(deps[0].src_subpass, vk::SUBPASS_EXTERNAL);
    assert_eq!(deps[0].dst_subpass, 0);
    assert_eq!(deps[1].src_subpass, 0);
    assert_eq!(deps[1].dst_subpass, 1);
    assert_eq!(deps[2].src_subpass, 1);
    assert_eq!(deps[2].dst_subpass, 2);
    assert_eq!(deps[3].src_subpass, 2);
    assert_eq!(deps[3].dst_subpass, vk::SUBPASS_EXTERNAL);

    for dep in deps {
        assert_eq!(dep.dependency_flags, vk::DependencyFlags::BY_REGION);
    }
}

#[test]
fn test_color_dependency_masks() {
    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&color_subpass(&[0]), vk::Format::UNDEFINED)
        .unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    let dep = plan.dependencies()[0];
    assert_eq!(
        dep.src_stage_mask,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
    );
    assert_eq!(dep.src_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    assert_eq!(
        dep.dst_stage_mask,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
    );
    assert_eq!(
        dep.dst_access_mask,
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::COLOR_ATTACHMENT_READ
    );
}

#[test]
fn test_depth_dependency_masks() {
    let subpass = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(0, ImageFormat::Rgba8)],
        depth_attachment: Some(SubpassAttachment::depth(1, ImageFormat::Depth32Float)),
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&subpass, vk::Format::D32_SFLOAT).unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    let dep = plan.dependencies()[0];
    assert!(dep
        .src_stage_mask
        .contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
    assert!(dep
        .src_access_mask
        .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    assert!(dep.dst_stage_mask.contains(
        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
    ));
    assert!(dep.dst_access_mask.contains(
        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
    ));
}

#[test]
fn test_input_attachment_dependency_masks() {
    let geometry = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(0, ImageFormat::Rgba8)
            .with_usage(AttachmentUsage::SUBPASS_INPUT)],
        ..Default::default()
    };
    let lighting = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(1, ImageFormat::Rgba8)],
        input_attachment_refs: vec![0],
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&geometry, vk::Format::UNDEFINED).unwrap();
    plan.add_subpass(&lighting, vk::Format::UNDEFINED).unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    // Subpass 1 reads slot 0 in the fragment shader
    let dep = plan.dependencies()[1];
    assert!(dep
        .src_stage_mask
        .contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
    assert!(dep
        .src_access_mask
        .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    assert!(dep
        .dst_stage_mask
        .contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
    assert!(dep
        .dst_access_mask
        .contains(vk::AccessFlags::INPUT_ATTACHMENT_READ));

    // The consuming subpass carries the reference in shader layout
    assert_eq!(plan.subpasses()[1].input_refs.len(), 1);
    assert_eq!(plan.subpasses()[1].input_refs[0].attachment, 0);
    assert_eq!(
        plan.subpasses()[1].input_refs[0].layout,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    );
}

#[test]
fn test_depth_producer_input_dependency_uses_late_fragment_tests() {
    let geometry = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(0, ImageFormat::Rgba8)],
        depth_attachment: Some(
            SubpassAttachment::depth(1, ImageFormat::Depth32Float)
                .with_usage(AttachmentUsage::SUBPASS_INPUT),
        ),
        ..Default::default()
    };
    let lighting = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(2, ImageFormat::Rgba8)],
        input_attachment_refs: vec![1],
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&geometry, vk::Format::D32_SFLOAT).unwrap();
    plan.add_subpass(&lighting, vk::Format::UNDEFINED).unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    let dep = plan.dependencies()[1];
    assert!(dep
        .src_stage_mask
        .contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
    assert!(dep
        .src_access_mask
        .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
}

// ============================================================================
// EXTERNAL TAIL DEPENDENCY TESTS
// ============================================================================

#[test]
fn test_tail_dependency_mirrors_last_subpass_for_first_renderpass() {
    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&color_subpass(&[0]), vk::Format::UNDEFINED)
        .unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    let tail = plan.dependencies()[1];
    assert_eq!(tail.dst_subpass, vk::SUBPASS_EXTERNAL);
    assert_eq!(
        tail.src_stage_mask,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
    );
    assert_eq!(tail.src_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
}

#[test]
fn test_tail_dependency_src_overridden_for_later_renderpasses() {
    let mut plan = RenderpassPlan::new(false, false);
    plan.add_subpass(&color_subpass(&[0]), vk::Format::UNDEFINED)
        .unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    let tail = plan.dependencies()[1];
    assert_eq!(tail.src_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
    assert_eq!(tail.src_access_mask, vk::AccessFlags::SHADER_READ);
}

#[test]
fn test_tail_dependency_dst_overridden_when_outputs_are_sampled() {
    let subpass = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(0, ImageFormat::Rgba8)
            .with_usage(AttachmentUsage::RENDERPASS_INPUT)],
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&subpass, vk::Format::UNDEFINED).unwrap();
    plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    let tail = plan.dependencies()[1];
    assert_eq!(tail.dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
    assert_eq!(tail.dst_access_mask, vk::AccessFlags::SHADER_READ);
}

// ============================================================================
// CONTRACT VIOLATION TESTS
// ============================================================================

#[test]
fn test_attachment_slot_overflow_rejected() {
    let mut plan = RenderpassPlan::new(true, false);
    let result = plan.add_subpass(&color_subpass(&[5]), vk::Format::UNDEFINED);
    assert!(matches!(result, Err(Error::InvalidResource(_))));
}

#[test]
fn test_input_attachment_in_subpass_zero_rejected() {
    let subpass = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(0, ImageFormat::Rgba8)],
        input_attachment_refs: vec![0],
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    let result = plan.add_subpass(&subpass, vk::Format::UNDEFINED);
    assert!(matches!(result, Err(Error::InvalidResource(_))));
}

#[test]
fn test_unproduced_input_slot_rejected() {
    let lighting = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(1, ImageFormat::Rgba8)],
        input_attachment_refs: vec![3],
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&color_subpass(&[0]), vk::Format::UNDEFINED)
        .unwrap();
    let result = plan.add_subpass(&lighting, vk::Format::UNDEFINED);
    assert!(matches!(result, Err(Error::InvalidResource(_))));
}

#[test]
fn test_input_slot_without_subpass_input_usage_rejected() {
    // Slot 0 is written but never marked SUBPASS_INPUT
    let lighting = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(1, ImageFormat::Rgba8)],
        input_attachment_refs: vec![0],
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&color_subpass(&[0]), vk::Format::UNDEFINED)
        .unwrap();
    assert!(plan
        .add_subpass(&lighting, vk::Format::UNDEFINED)
        .is_err());
}

#[test]
fn test_empty_renderpass_rejected() {
    let mut plan = RenderpassPlan::new(true, false);
    assert!(plan.finalize(SWAPCHAIN_FORMAT, CLEAR).is_err());
}

// ============================================================================
// CLEAR VALUE TESTS
// ============================================================================

#[test]
fn test_clear_bits_and_values() {
    let subpass = SubpassDesc {
        color_attachments: vec![
            SubpassAttachment::color(0, ImageFormat::Rgba8),
            SubpassAttachment::color(1, ImageFormat::Rgba32Float),
        ],
        depth_attachment: Some(SubpassAttachment::depth(2, ImageFormat::Depth32Float)),
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&subpass, vk::Format::D32_SFLOAT).unwrap();
    let clear_values = plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    // Color slots 0 and 1 clear with the shared color, depth slot does not
    assert_eq!(plan.clear_bits(), 0b011);
    assert_eq!(clear_values.len(), 3);
    assert_eq!(plan.attachment_count(), 3);

    unsafe {
        assert_eq!(clear_values[0].color.float32, CLEAR);
        assert_eq!(clear_values[2].depth_stencil.depth, 1.0);
        assert_eq!(clear_values[2].depth_stencil.stencil, 0);
    }
}

// ============================================================================
// SWAPCHAIN TARGET INJECTION TESTS
// ============================================================================

#[test]
fn test_swapchain_target_appends_to_last_subpass() {
    let mut plan = RenderpassPlan::new(true, true);
    plan.add_subpass(&color_subpass(&[0]), vk::Format::UNDEFINED)
        .unwrap();
    let clear_values = plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    // No new subpass; the target rides on the existing one
    assert_eq!(plan.subpass_count(), 1);
    assert_eq!(plan.subpasses()[0].color_refs.len(), 2);
    assert_eq!(plan.swapchain_slot(), Some(1));
    assert_eq!(plan.attachment_count(), 2);
    assert_eq!(clear_values.len(), 2);
    assert_eq!(plan.clear_bits(), 0b11);

    let desc = plan.attachments[1].unwrap();
    assert_eq!(desc.format, SWAPCHAIN_FORMAT);
    assert_eq!(desc.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);

    // Per-subpass dep + injected EXTERNAL dep + tail
    assert_eq!(plan.dependencies().len(), 3);
    let injected = plan.dependencies()[1];
    assert_eq!(injected.src_subpass, vk::SUBPASS_EXTERNAL);
    assert_eq!(injected.dst_subpass, 0);
}

#[test]
fn test_swapchain_target_creates_subpass_when_none_exist() {
    let mut plan = RenderpassPlan::new(true, true);
    let clear_values = plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    assert_eq!(plan.subpass_count(), 1);
    assert_eq!(plan.subpasses()[0].color_refs.len(), 1);
    assert_eq!(plan.swapchain_slot(), Some(0));
    assert_eq!(clear_values.len(), 1);
    // Injected EXTERNAL dep + tail
    assert_eq!(plan.dependencies().len(), 2);
}

#[test]
fn test_two_subpass_deferred_layout() {
    // Geometry writes G-buffer slots, lighting consumes them and writes the
    // final color
    let geometry = SubpassDesc {
        color_attachments: vec![
            SubpassAttachment::color(0, ImageFormat::Rgba32Float)
                .with_usage(AttachmentUsage::SUBPASS_INPUT),
            SubpassAttachment::color(1, ImageFormat::Rgba8)
                .with_usage(AttachmentUsage::SUBPASS_INPUT),
        ],
        depth_attachment: Some(SubpassAttachment::depth(2, ImageFormat::Depth32Float)),
        ..Default::default()
    };
    let lighting = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(3, ImageFormat::Rgba8)],
        input_attachment_refs: vec![0, 1],
        ..Default::default()
    };

    let mut plan = RenderpassPlan::new(true, false);
    plan.add_subpass(&geometry, vk::Format::D32_SFLOAT).unwrap();
    plan.add_subpass(&lighting, vk::Format::UNDEFINED).unwrap();
    let clear_values = plan.finalize(SWAPCHAIN_FORMAT, CLEAR).unwrap();

    assert_eq!(plan.subpass_count(), 2);
    assert_eq!(plan.attachment_count(), 4);
    assert_eq!(clear_values.len(), 4);
    assert_eq!(plan.dependencies().len(), 3);
    assert_eq!(plan.subpasses()[1].input_refs.len(), 2);
    // Slots 0, 1 and 3 are color; slot 2 is depth
    assert_eq!(plan.clear_bits(), 0b1011);
}
