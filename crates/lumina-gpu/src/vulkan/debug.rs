//! Validation message routing.

use crate::error::Result;
use ash::vk;
use std::borrow::Cow;
use std::ffi::{c_void, CStr};

/// Forwards validation layer messages into `tracing`.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Install the messenger.
    ///
    /// # Safety
    /// The instance must have been created with the debug utils extension.
    pub unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));
        let messenger = loader.create_debug_utils_messenger(&create_info, None)?;
        Ok(Self { loader, messenger })
    }

    /// Remove the messenger.
    ///
    /// # Safety
    /// Must be called before the instance is destroyed.
    pub unsafe fn destroy(&self) {
        self.loader
            .destroy_debug_utils_messenger(self.messenger, None);
    }
}

/// Log level a validation message maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    Error,
    Warning,
    Info,
    Verbose,
}

impl ValidationLevel {
    pub fn from_severity(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            Self::Error
        } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            Self::Warning
        } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            Self::Info
        } else {
            Self::Verbose
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if data.is_null() || (*data).p_message.is_null() {
        Cow::Borrowed("")
    } else {
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };

    match ValidationLevel::from_severity(severity) {
        ValidationLevel::Error => tracing::error!(target: "vulkan", "[{kind:?}] {message}"),
        ValidationLevel::Warning => tracing::warn!(target: "vulkan", "[{kind:?}] {message}"),
        ValidationLevel::Info => tracing::info!(target: "vulkan", "[{kind:?}] {message}"),
        ValidationLevel::Verbose => tracing::trace!(target: "vulkan", "[{kind:?}] {message}"),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_classification() {
        assert_eq!(
            ValidationLevel::from_severity(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR),
            ValidationLevel::Error
        );
        assert_eq!(
            ValidationLevel::from_severity(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING),
            ValidationLevel::Warning
        );
        assert_eq!(
            ValidationLevel::from_severity(vk::DebugUtilsMessageSeverityFlagsEXT::INFO),
            ValidationLevel::Info
        );
        assert_eq!(
            ValidationLevel::from_severity(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE),
            ValidationLevel::Verbose
        );
    }
}
