//! Integration tests for the public rendering API types
//!
//! Exercises the declarative renderpass configuration and the reflection
//! merge rules through the public crate surface. No GPU required.
//!
//! Run with: cargo test --test render_api_integration_tests

use nebula_engine::glam::Vec4;
use nebula_engine::nebula::render::{
    AttachmentUsage, ImageFormat, PipelineReflection, PipelineStages, ReflectedBinding,
    ReflectedPushConstant, RenderpassConfig, ShaderStageFlags, SubpassAttachment, SubpassDesc,
    BindingType, MAX_FRAMES_IN_FLIGHT, MAX_SUBPASS_ATTACHMENTS,
};

// ============================================================================
// RENDERPASS CONFIGURATION
// ============================================================================

#[test]
fn test_integration_renderpass_config_defaults() {
    let config = RenderpassConfig::default();

    assert!(config.subpasses.is_empty());
    assert_eq!(config.clear_color, Vec4::new(0.025, 0.025, 0.025, 1.0));
    assert_eq!(config.framebuffer.layers, 1);
    assert_eq!(config.framebuffer.samples, 1);
    assert!(!config.first_renderpass);
    assert!(!config.swapchain_target);
}

#[test]
fn test_integration_deferred_style_config() {
    // Geometry subpass writes two color targets + depth, lighting subpass
    // reads them back as input attachments
    let geometry = SubpassDesc {
        color_attachments: vec![
            SubpassAttachment::color(0, ImageFormat::Rgba8)
                .with_usage(AttachmentUsage::SUBPASS_INPUT),
            SubpassAttachment::color(1, ImageFormat::Rgba32Float)
                .with_usage(AttachmentUsage::SUBPASS_INPUT),
        ],
        depth_attachment: Some(SubpassAttachment::depth(2, ImageFormat::Depth32Float)),
        input_attachment_refs: Vec::new(),
    };
    let lighting = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(3, ImageFormat::Rgba8)
            .with_usage(AttachmentUsage::RENDERPASS_INPUT)],
        depth_attachment: None,
        input_attachment_refs: vec![0, 1],
    };

    let config = RenderpassConfig {
        subpasses: vec![geometry, lighting],
        first_renderpass: true,
        ..Default::default()
    };

    assert_eq!(config.subpasses.len(), 2);
    assert!(config.subpasses[0].color_attachments[0]
        .usage
        .contains(AttachmentUsage::COLOR_ATTACHMENT | AttachmentUsage::SUBPASS_INPUT));
    assert!(config.subpasses[0]
        .depth_attachment
        .unwrap()
        .usage
        .contains(AttachmentUsage::DEPTH_ATTACHMENT));
    assert_eq!(config.subpasses[1].input_attachment_refs, vec![0, 1]);
}

#[test]
fn test_integration_attachment_helpers_set_base_usage() {
    let color = SubpassAttachment::color(0, ImageFormat::Rgba8);
    assert_eq!(color.usage, AttachmentUsage::COLOR_ATTACHMENT);
    assert_eq!(color.attachment_ref, 0);

    let depth = SubpassAttachment::depth(4, ImageFormat::Depth24Stencil8);
    assert_eq!(depth.usage, AttachmentUsage::DEPTH_ATTACHMENT);
    assert_eq!(depth.attachment_ref, 4);
    assert!(depth.format.is_depth());
}

#[test]
fn test_integration_capacity_constants() {
    assert_eq!(MAX_SUBPASS_ATTACHMENTS, 5);
    assert_eq!(MAX_FRAMES_IN_FLIGHT, 2);
}

// ============================================================================
// REFLECTION MERGE
// ============================================================================

fn binding(set: u32, slot: u32, name: &str, stages: ShaderStageFlags) -> ReflectedBinding {
    ReflectedBinding {
        set,
        binding: slot,
        name: name.to_string(),
        binding_type: BindingType::UniformBuffer,
        count: 1,
        stages,
    }
}

#[test]
fn test_integration_reflection_merge_combines_stages() {
    let mut vertex = PipelineReflection {
        bindings: vec![binding(0, 0, "camera", ShaderStageFlags::VERTEX)],
        push_constants: vec![],
    };
    let fragment = PipelineReflection {
        bindings: vec![
            binding(0, 0, "camera", ShaderStageFlags::FRAGMENT),
            binding(0, 1, "material", ShaderStageFlags::FRAGMENT),
        ],
        push_constants: vec![],
    };

    vertex.merge(&fragment);

    assert_eq!(vertex.bindings.len(), 2);
    assert_eq!(
        vertex.bindings[0].stages,
        ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT
    );
    assert_eq!(vertex.bindings[1].stages, ShaderStageFlags::FRAGMENT);
}

#[test]
fn test_integration_reflection_merge_push_constants() {
    let mut vertex = PipelineReflection {
        bindings: vec![],
        push_constants: vec![ReflectedPushConstant {
            offset: 0,
            size: 64,
            stages: ShaderStageFlags::VERTEX,
        }],
    };
    let fragment = PipelineReflection {
        bindings: vec![],
        push_constants: vec![ReflectedPushConstant {
            offset: 0,
            size: 80,
            stages: ShaderStageFlags::FRAGMENT,
        }],
    };

    vertex.merge(&fragment);

    assert_eq!(vertex.push_constants.len(), 1);
    assert_eq!(vertex.push_constants[0].size, 80);
    assert_eq!(
        vertex.push_constants[0].stages,
        ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT
    );
}

#[test]
fn test_integration_reflection_max_set() {
    let reflection = PipelineReflection {
        bindings: vec![
            binding(0, 0, "camera", ShaderStageFlags::VERTEX),
            binding(2, 0, "material", ShaderStageFlags::FRAGMENT),
        ],
        push_constants: vec![],
    };
    assert_eq!(reflection.max_set(), Some(2));
    assert_eq!(PipelineReflection::empty().max_set(), None);
}

// ============================================================================
// STAGE FLAGS
// ============================================================================

#[test]
fn test_integration_pipeline_stage_flags_compose() {
    let stages = PipelineStages::VERTEX_INPUT | PipelineStages::COMPUTE_SHADER;
    assert!(stages.contains(PipelineStages::VERTEX_INPUT));
    assert!(stages.contains(PipelineStages::COMPUTE_SHADER));
    assert!(!stages.contains(PipelineStages::TRANSFER));
}
