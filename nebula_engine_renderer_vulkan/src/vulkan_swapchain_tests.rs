//! Unit tests for swapchain parameter selection
//!
//! The format, present mode, image count and extent choices are pure over
//! queried surface data and testable without a device.

use ash::vk;

use crate::vulkan_swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
};

fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
        min_image_count: min,
        max_image_count: max,
        current_extent: vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        },
        min_image_extent: vk::Extent2D {
            width: 1,
            height: 1,
        },
        max_image_extent: vk::Extent2D {
            width: 4096,
            height: 2160,
        },
        ..Default::default()
    }
}

// ============================================================================
// FORMAT AND PRESENT MODE TESTS
// ============================================================================

#[test]
fn test_preferred_surface_format_wins() {
    let formats = [
        vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        },
        vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        },
    ];

    let chosen = choose_surface_format(&formats);
    assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
}

#[test]
fn test_surface_format_falls_back_to_first() {
    let formats = [
        vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        },
        vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        },
    ];

    assert_eq!(choose_surface_format(&formats).format, vk::Format::B8G8R8A8_UNORM);
}

#[test]
fn test_present_mode_prefers_mailbox() {
    let modes = [
        vk::PresentModeKHR::FIFO,
        vk::PresentModeKHR::MAILBOX,
        vk::PresentModeKHR::IMMEDIATE,
    ];
    assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
}

#[test]
fn test_present_mode_defaults_to_fifo() {
    let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
    assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
}

// ============================================================================
// IMAGE COUNT AND EXTENT TESTS
// ============================================================================

#[test]
fn test_image_count_is_min_plus_one() {
    assert_eq!(choose_image_count(&caps(2, 8)), 3);
}

#[test]
fn test_image_count_clamps_to_surface_maximum() {
    assert_eq!(choose_image_count(&caps(3, 3)), 3);
}

#[test]
fn test_image_count_unbounded_maximum() {
    // max_image_count == 0 means no upper bound
    assert_eq!(choose_image_count(&caps(2, 0)), 3);
}

#[test]
fn test_extent_uses_pinned_current_extent() {
    let mut capabilities = caps(2, 8);
    capabilities.current_extent = vk::Extent2D {
        width: 1280,
        height: 720,
    };

    let extent = choose_extent(&capabilities, 1920, 1080);
    assert_eq!(extent.width, 1280);
    assert_eq!(extent.height, 720);
}

#[test]
fn test_extent_clamps_width_and_height_independently() {
    // A tall window must clamp height against the height limit, not the
    // width limit
    let extent = choose_extent(&caps(2, 8), 800, 3000);
    assert_eq!(extent.width, 800);
    assert_eq!(extent.height, 2160);
}

#[test]
fn test_extent_respects_minimum() {
    let extent = choose_extent(&caps(2, 8), 0, 0);
    assert_eq!(extent.width, 1);
    assert_eq!(extent.height, 1);
}
