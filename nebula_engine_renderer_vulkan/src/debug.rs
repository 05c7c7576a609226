/// Vulkan Debug Messenger - validation layer output
///
/// Formats validation-layer messages with colored console output. Compiled
/// only with the `vulkan-validation` feature and installed when
/// `RendererConfig::enable_validation` is set.

use std::ffi::CStr;

use ash::vk;
use colored::*;

/// Vulkan debug messenger callback
///
/// Called by the validation layers; prints errors and warnings, drops
/// informational chatter.
pub unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = *p_callback_data;
    let message_id_name = if callback_data.p_message_id_name.is_null() {
        "Unknown"
    } else {
        CStr::from_ptr(callback_data.p_message_id_name)
            .to_str()
            .unwrap_or("Invalid UTF-8")
    };
    let message = if callback_data.p_message.is_null() {
        "No message"
    } else {
        CStr::from_ptr(callback_data.p_message)
            .to_str()
            .unwrap_or("Invalid UTF-8")
    };

    let severity_colored =
        if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            "ERROR".red().bold()
        } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            "WARNING".yellow().bold()
        } else {
            // Info and verbose messages are noise during normal operation
            return vk::FALSE;
        };

    let type_str = if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "Validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "Performance"
    } else {
        "General"
    };

    eprint!(
        "{} {} [{}]\n  ├─ {}: {}\n  └─ {}\n",
        "[VULKAN".bright_blue().bold(),
        format!("{}]", severity_colored).bright_blue().bold(),
        type_str.bright_black(),
        "Message ID".bright_black(),
        message_id_name.white(),
        message.white()
    );

    vk::FALSE // Never abort Vulkan execution from the callback
}
