//! Unit tests for pipeline reflection data
//!
//! Tests PipelineReflection merging (vertex + fragment stages) without a GPU.

use crate::renderer::pipeline::{
    BindingType, PipelineReflection, ReflectedBinding, ReflectedPushConstant, ShaderStageFlags,
    MAX_DESCRIPTOR_SETS,
};

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

// ============================================================================
// BINDING MERGE TESTS
// ============================================================================

#[test]
fn test_merge_disjoint_bindings_appends() {
    let mut vertex = PipelineReflection {
        bindings: vec![binding(0, 0, "u_camera", ShaderStageFlags::VERTEX)],
        push_constants: vec![],
    };
    let fragment = PipelineReflection {
        bindings: vec![binding(1, 0, "u_material", ShaderStageFlags::FRAGMENT)],
        push_constants: vec![],
    };

    vertex.merge(&fragment);
    assert_eq!(vertex.bindings.len(), 2);
    assert_eq!(vertex.max_set(), Some(1));
}

#[test]
fn test_merge_shared_binding_unions_stages() {
    let mut vertex = PipelineReflection {
        bindings: vec![binding(0, 2, "u_scene", ShaderStageFlags::VERTEX)],
        push_constants: vec![],
    };
    let fragment = PipelineReflection {
        bindings: vec![binding(0, 2, "u_scene", ShaderStageFlags::FRAGMENT)],
        push_constants: vec![],
    };

    vertex.merge(&fragment);
    assert_eq!(vertex.bindings.len(), 1);
    assert_eq!(
        vertex.bindings[0].stages,
        ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT
    );
}

// ============================================================================
// PUSH CONSTANT MERGE TESTS
// ============================================================================

#[test]
fn test_merge_push_constants_same_offset_keeps_larger_size() {
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
fn test_empty_reflection_has_no_sets() {
    let reflection = PipelineReflection::empty();
    assert!(reflection.bindings.is_empty());
    assert_eq!(reflection.max_set(), None);
}

#[test]
fn test_descriptor_set_capacity_constant() {
    // Pipelines address at most 4 descriptor sets
    assert_eq!(MAX_DESCRIPTOR_SETS, 4);
}
