//! Vendor SDK abstraction.
//!
//! Defines the `MobileDeviceBackend` trait, one method per vendor entry
//! point the crate drives, allowing different implementations
//! (the MobileDevice framework, mock, etc.).

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::DeviceInterface;
use crate::error::BackendError;
use crate::install::PackageType;
use crate::status::StatusPayload;

/// Progress callback handed to a blocking vendor operation.
///
/// Invoked on the vendor's own thread, possibly many times.
pub type StatusCallback = Arc<dyn Fn(StatusPayload) + Send + Sync>;

/// Device notification callback, invoked on the vendor's delivery thread.
pub type NotificationCallback<H> = Arc<dyn Fn(DeviceNotification<H>) + Send + Sync>;

/// Raw device notification as delivered by the vendor.
#[derive(Debug, Clone)]
pub enum DeviceNotification<H> {
    Connected(H),
    Disconnected(H),
    /// The vendor ended the subscription.
    Unsubscribed,
}

/// Transport filter for enumeration and notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceFilter {
    #[default]
    Any,
    Wired,
    Wireless,
}

impl InterfaceFilter {
    pub fn matches(&self, interface: DeviceInterface) -> bool {
        match self {
            InterfaceFilter::Any => true,
            InterfaceFilter::Wired => interface == DeviceInterface::Wired,
            InterfaceFilter::Wireless => interface == DeviceInterface::Wireless,
        }
    }
}

/// Abstract vendor SDK interface.
///
/// Every call is blocking. Long-running operations report progress through
/// the supplied [`StatusCallback`] before they return.
pub trait MobileDeviceBackend: Send + Sync + 'static {
    /// Vendor reference to one attached device.
    type Handle: Clone + fmt::Debug + Send + Sync + 'static;
    /// Token for a live notification registration.
    type Subscription: Send + 'static;

    /// Handles of all currently attached devices. Empty when the query fails.
    fn device_list(&self) -> Vec<Self::Handle>;

    /// Vendor UDID. Readable without a connection.
    fn device_identifier(&self, device: &Self::Handle) -> Option<String>;

    /// Read a string property. Requires an active session for most keys.
    fn copy_value(&self, device: &Self::Handle, key: &str) -> Option<String>;

    /// Transport the device is attached over, `None` when unknown.
    fn interface_type(&self, device: &Self::Handle) -> Option<DeviceInterface>;

    fn developer_mode_status(&self, device: &Self::Handle) -> Result<bool, BackendError>;

    fn connect(&self, device: &Self::Handle) -> Result<(), BackendError>;

    fn disconnect(&self, device: &Self::Handle) -> Result<(), BackendError>;

    fn start_session(&self, device: &Self::Handle) -> Result<(), BackendError>;

    fn stop_session(&self, device: &Self::Handle) -> Result<(), BackendError>;

    /// Start a named lockdown service on the device.
    fn start_service(&self, device: &Self::Handle, service_name: &str)
    -> Result<(), BackendError>;

    /// Copy an application bundle to the device's staging area.
    fn transfer_path(
        &self,
        device: &Self::Handle,
        bundle: &Path,
        package_type: PackageType,
        callback: StatusCallback,
    ) -> Result<(), BackendError>;

    /// Install a previously transferred application bundle.
    fn install_application(
        &self,
        device: &Self::Handle,
        bundle: &Path,
        package_type: PackageType,
        callback: StatusCallback,
    ) -> Result<(), BackendError>;

    /// Mount a developer disk image using its detached signature.
    fn mount_image(
        &self,
        device: &Self::Handle,
        image: &Path,
        signature: &[u8],
        callback: StatusCallback,
    ) -> Result<(), BackendError>;

    /// Install a device notification registration.
    fn subscribe(
        &self,
        interface: InterfaceFilter,
        callback: NotificationCallback<Self::Handle>,
    ) -> Result<Self::Subscription, BackendError>;

    /// Remove a registration returned by [`subscribe`](Self::subscribe).
    fn unsubscribe(&self, subscription: Self::Subscription) -> Result<(), BackendError>;
}
