//! Unit tests for the mock renderer
//!
//! Exercises the frame driver and multi-queue sync semantics on plain data:
//! frame cycling, fence discipline, idempotent sync registration, queue
//! ownership transfer symmetry, and the contract checks shared with the real
//! backend.

use std::sync::Arc;

use crate::error::Error;
use crate::renderer::mock_renderer::{MockCmdBuffer, MockComputePipeline, MockRenderer, MockStorageBuffer};
use crate::renderer::{
    AccessFlags, AttachmentUsage, BufferDesc, BufferUsage, CmdBuffer, ComputePipeline,
    ImageFormat, PipelineReflection, PipelineStages, Renderer, RenderpassConfig, StorageBuffer,
    SubpassAttachment, SubpassDesc, MAX_FRAMES_IN_FLIGHT,
};

fn storage_buffer() -> Arc<dyn StorageBuffer> {
    Arc::new(MockStorageBuffer { size: 1024 })
}

fn compute_pipeline() -> Arc<dyn ComputePipeline> {
    Arc::new(MockComputePipeline {
        reflection: PipelineReflection::empty(),
    })
}

// ============================================================================
// FRAME CYCLING + FENCE DISCIPLINE
// ============================================================================

#[test]
fn test_frame_index_alternates_across_presents() {
    let mut cmd = MockCmdBuffer::new(0, 1);
    assert_eq!(MAX_FRAMES_IN_FLIGHT, 2);

    for expected in [0u32, 1, 0, 1] {
        assert_eq!(cmd.current_frame(), expected);
        cmd.begin().unwrap();
        cmd.end().unwrap();
        cmd.submit().unwrap();
        cmd.queue_present().unwrap();
    }
}

#[test]
fn test_begin_waits_on_the_current_frames_fence() {
    let mut cmd = MockCmdBuffer::new(0, 1);
    for _ in 0..4 {
        cmd.begin().unwrap();
        cmd.end().unwrap();
        cmd.submit().unwrap();
        cmd.queue_present().unwrap();
    }
    assert_eq!(cmd.fence_waits, vec![0, 1, 0, 1]);
}

#[test]
fn test_failed_acquire_leaves_frame_fence_reusable() {
    let mut cmd = MockCmdBuffer::new(0, 1);
    cmd.fail_next_acquire = true;
    assert!(cmd.begin().is_err());

    // The frame slot must still be usable once the swapchain recovers
    cmd.begin().unwrap();
    cmd.end().unwrap();
    cmd.submit().unwrap();
    cmd.queue_present().unwrap();
    assert_eq!(cmd.fence_waits, vec![0, 0]);
}

#[test]
fn test_suboptimal_acquire_finishes_frame_and_schedules_recreation() {
    let mut cmd = MockCmdBuffer::new(0, 1);
    cmd.suboptimal_next_acquire = true;

    cmd.begin().unwrap();
    cmd.end().unwrap();
    cmd.submit().unwrap();
    cmd.queue_present().unwrap();

    assert!(cmd.events.contains(&"schedule_recreate".to_string()));
    assert_eq!(cmd.current_frame(), 1);
}

#[test]
fn test_recording_state_guards() {
    let mut cmd = MockCmdBuffer::new(0, 1);

    assert!(cmd.end().is_err());
    cmd.begin().unwrap();
    assert!(cmd.begin().is_err());
    assert!(cmd.end_render_pass().is_err());
    cmd.end().unwrap();
    assert!(cmd.submit().is_ok());
}

// ============================================================================
// SYNC REGISTRATION (idempotent, lazy)
// ============================================================================

#[test]
fn test_initial_sync_lists_are_seeded() {
    let cmd = MockCmdBuffer::new(0, 1);
    for frame in 0..MAX_FRAMES_IN_FLIGHT {
        assert_eq!(cmd.wait_semaphores[frame].len(), 1);
        assert!(cmd.wait_semaphores[frame][0].starts_with("image_available"));
        assert_eq!(cmd.signal_semaphores[frame].len(), 1);
        assert!(cmd.signal_semaphores[frame][0].starts_with("render_complete"));
    }
    assert_eq!(cmd.wait_stages, vec![PipelineStages::COLOR_ATTACHMENT_OUTPUT]);
}

#[test]
fn test_sync_with_compute_queue_registers_once() {
    let mut cmd = MockCmdBuffer::new(0, 1);

    cmd.sync_with_compute_queue(PipelineStages::VERTEX_INPUT, PipelineStages::COMPUTE_SHADER);
    cmd.sync_with_compute_queue(PipelineStages::VERTEX_INPUT, PipelineStages::COMPUTE_SHADER);
    cmd.sync_with_compute_queue(PipelineStages::FRAGMENT_SHADER, PipelineStages::COMPUTE_SHADER);

    for frame in 0..MAX_FRAMES_IN_FLIGHT {
        // image_available + compute_complete
        assert_eq!(cmd.wait_semaphores[frame].len(), 2);
        assert_eq!(
            cmd.wait_semaphores[frame][1],
            format!("compute_complete[{}]", frame)
        );
        // render_complete + compute_ready
        assert_eq!(cmd.signal_semaphores[frame].len(), 2);
        assert_eq!(
            cmd.signal_semaphores[frame][1],
            format!("compute_ready[{}]", frame)
        );
    }
    // The first call's stage won
    assert_eq!(
        cmd.wait_stages,
        vec![
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            PipelineStages::VERTEX_INPUT
        ]
    );
}

#[test]
fn test_sync_with_transfer_queue_registers_once() {
    let mut cmd = MockCmdBuffer::new(0, 1);

    cmd.sync_with_transfer_queue(PipelineStages::VERTEX_INPUT, PipelineStages::empty());
    cmd.sync_with_transfer_queue(PipelineStages::VERTEX_INPUT, PipelineStages::empty());

    for frame in 0..MAX_FRAMES_IN_FLIGHT {
        assert_eq!(cmd.wait_semaphores[frame].len(), 2);
        assert_eq!(cmd.wait_semaphores[frame][1], format!("transfer[{}]", frame));
        // Transfer does not add graphics-side signals
        assert_eq!(cmd.signal_semaphores[frame].len(), 1);
    }
}

// ============================================================================
// OWNERSHIP TRANSFER BARRIERS
// ============================================================================

#[test]
fn test_release_acquire_pair_is_symmetric() {
    let mut cmd = MockCmdBuffer::new(0, 1);
    let buffer = storage_buffer();

    cmd.release_to_compute_queue(
        &buffer,
        PipelineStages::VERTEX_INPUT,
        AccessFlags::VERTEX_ATTRIBUTE_READ,
    )
    .unwrap();
    cmd.acquire_from_graphics_queue(
        &buffer,
        PipelineStages::COMPUTE_SHADER,
        AccessFlags::SHADER_WRITE,
    )
    .unwrap();

    assert_eq!(cmd.barriers.len(), 2);
    let release = &cmd.barriers[0];
    let acquire = &cmd.barriers[1];

    // Same family pair on both sides of the transfer
    assert_eq!(release.src_family, acquire.src_family);
    assert_eq!(release.dst_family, acquire.dst_family);
    assert_eq!(release.src_family, 0);
    assert_eq!(release.dst_family, 1);

    // Release masks out destination access, acquire masks out source access
    assert_eq!(release.dst_access, AccessFlags::empty());
    assert_eq!(acquire.src_access, AccessFlags::empty());
    assert_eq!(release.recorded_on, "graphics");
    assert_eq!(acquire.recorded_on, "compute");
}

#[test]
fn test_ownership_transfer_noop_with_unified_queues() {
    let mut cmd = MockCmdBuffer::new(0, 0);
    let buffer = storage_buffer();

    cmd.release_to_compute_queue(&buffer, PipelineStages::VERTEX_INPUT, AccessFlags::VERTEX_ATTRIBUTE_READ)
        .unwrap();
    cmd.acquire_from_graphics_queue(&buffer, PipelineStages::COMPUTE_SHADER, AccessFlags::SHADER_WRITE)
        .unwrap();

    assert!(cmd.barriers.is_empty());
}

// ============================================================================
// SCENARIO: compute-then-graphics frame
// ============================================================================

#[test]
fn test_compute_then_graphics_frame() {
    let mut cmd = MockCmdBuffer::new(0, 1);
    let pipe = compute_pipeline();
    let buffer = storage_buffer();

    cmd.begin_compute(&pipe, 0, None).unwrap();
    cmd.acquire_from_graphics_queue(&buffer, PipelineStages::COMPUTE_SHADER, AccessFlags::SHADER_WRITE)
        .unwrap();
    cmd.dispatch(64, 1, 1).unwrap();
    cmd.release_to_graphics_queue(&buffer, PipelineStages::COMPUTE_SHADER, AccessFlags::SHADER_WRITE)
        .unwrap();
    cmd.submit_compute(PipelineStages::VERTEX_INPUT).unwrap();

    cmd.begin().unwrap();
    cmd.acquire_from_compute_queue(&buffer, PipelineStages::VERTEX_INPUT, AccessFlags::VERTEX_ATTRIBUTE_READ)
        .unwrap();
    cmd.end().unwrap();
    cmd.submit().unwrap();
    cmd.queue_present().unwrap();

    // Compute submission waits on the ready semaphore and signals completion
    assert!(cmd
        .events
        .iter()
        .any(|e| e.starts_with("submit_compute:frame=0:waits=compute_ready[0]")));
    // Graphics waits on compute completion and re-signals readiness
    assert!(cmd.wait_semaphores[0].contains(&"compute_complete[0]".to_string()));
    assert!(cmd.signal_semaphores[0].contains(&"compute_ready[0]".to_string()));
    assert_eq!(cmd.barriers.len(), 3);
}

#[test]
fn test_dispatch_requires_begin_compute() {
    let mut cmd = MockCmdBuffer::new(0, 1);
    assert!(cmd.dispatch(1, 1, 1).is_err());
    assert!(cmd.submit_compute(PipelineStages::VERTEX_INPUT).is_err());
}

// ============================================================================
// SCENARIO: overlay submission chained by semaphore
// ============================================================================

#[test]
fn test_submit_emits_scene_and_overlay_batches() {
    let mut cmd = MockCmdBuffer::new(0, 1);
    cmd.begin().unwrap();
    cmd.end().unwrap();
    cmd.submit().unwrap();

    let scene = cmd.events.iter().find(|e| e.starts_with("submit:frame=0")).unwrap();
    assert!(scene.contains("waits=image_available[0]"));
    assert!(scene.contains("signals=render_complete[0]"));

    let overlay = cmd
        .events
        .iter()
        .find(|e| e.starts_with("submit_overlay:frame=0"))
        .unwrap();
    assert!(overlay.contains("waits=render_complete[0]"));

    cmd.queue_present().unwrap();
    let present = cmd.events.iter().find(|e| e.starts_with("present:frame=0")).unwrap();
    assert!(present.contains("waits=overlay_complete[0]"));
}

// ============================================================================
// RENDERPASS CONTRACT CHECKS
// ============================================================================

#[test]
fn test_renderpass_rejects_input_read_in_subpass_zero() {
    let renderer = MockRenderer::new();
    let config = RenderpassConfig {
        subpasses: vec![SubpassDesc {
            color_attachments: vec![SubpassAttachment::color(0, ImageFormat::Rgba8)],
            depth_attachment: None,
            input_attachment_refs: vec![0],
        }],
        ..Default::default()
    };

    match renderer.create_renderpass(&config) {
        Err(Error::InvalidResource(msg)) => assert!(msg.contains("subpass 0")),
        other => panic!("expected InvalidResource, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_renderpass_rejects_out_of_range_slot() {
    let renderer = MockRenderer::new();
    let config = RenderpassConfig {
        subpasses: vec![SubpassDesc {
            color_attachments: vec![SubpassAttachment::color(9, ImageFormat::Rgba8)],
            depth_attachment: None,
            input_attachment_refs: vec![],
        }],
        ..Default::default()
    };

    assert!(matches!(
        renderer.create_renderpass(&config),
        Err(Error::InvalidResource(_))
    ));
}

#[test]
fn test_renderpass_accepts_geometry_lighting_inputs() {
    let renderer = MockRenderer::new();
    let geometry = SubpassDesc {
        color_attachments: vec![
            SubpassAttachment::color(0, ImageFormat::Rgba8).with_usage(AttachmentUsage::SUBPASS_INPUT),
            SubpassAttachment::color(1, ImageFormat::Rgba32Float)
                .with_usage(AttachmentUsage::SUBPASS_INPUT),
        ],
        depth_attachment: Some(SubpassAttachment::depth(2, ImageFormat::Depth32Float)),
        input_attachment_refs: vec![],
    };
    let lighting = SubpassDesc {
        color_attachments: vec![SubpassAttachment::color(3, ImageFormat::Rgba8)],
        depth_attachment: None,
        input_attachment_refs: vec![0, 1],
    };

    let config = RenderpassConfig {
        subpasses: vec![geometry, lighting],
        ..Default::default()
    };
    let pass = renderer.create_renderpass(&config).unwrap();
    assert_eq!(pass.subpass_count(), 2);
}

#[test]
fn test_unified_queue_renderer_reports_no_dedicated_families() {
    let renderer = MockRenderer::with_unified_queues();
    assert!(!renderer.has_dedicated_compute_queue());
    assert!(!renderer.has_dedicated_transfer_queue());
}

#[test]
fn test_storage_buffer_factory() {
    let renderer = MockRenderer::new();
    let buffer = renderer
        .create_storage_buffer(&BufferDesc {
            size: 4096,
            element_count: 0,
            usage: BufferUsage::Storage,
        })
        .unwrap();
    assert_eq!(buffer.size(), 4096);
    assert!(renderer.has_dedicated_compute_queue());
    assert!(renderer.has_dedicated_transfer_queue());
}
