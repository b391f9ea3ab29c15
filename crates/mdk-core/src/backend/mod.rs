//! Vendor backend layer module.

#[cfg(target_os = "macos")]
pub mod framework;
pub mod mock;
pub mod traits;

#[cfg(target_os = "macos")]
pub use framework::{DeviceRef, MobileDeviceFramework};
pub use mock::{MockBackend, MockCall, MockDevice, MockHandle, OperationScript, ScriptStep};
pub use traits::{
    DeviceNotification, InterfaceFilter, MobileDeviceBackend, NotificationCallback,
    StatusCallback,
};
