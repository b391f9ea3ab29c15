//! Device snapshot and identity.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::backend::MobileDeviceBackend;
use crate::error::DeviceError;
use crate::session::{Lifecycle, SessionGuard, SessionState};

/// Lockdown property keys read when a device is constructed.
pub mod keys {
    pub const DEVICE_NAME: &str = "DeviceName";
    pub const BUILD_VERSION: &str = "BuildVersion";
    pub const PRODUCT_TYPE: &str = "ProductType";
    pub const PRODUCT_VERSION: &str = "ProductVersion";
    pub const DEVICE_CLASS: &str = "DeviceClass";

    // Not lockdown values, used to name failed reads.
    pub const UNIQUE_DEVICE_ID: &str = "UniqueDeviceID";
    pub const INTERFACE_TYPE: &str = "InterfaceType";
    pub const DEVELOPER_MODE_STATUS: &str = "DeveloperModeStatus";
}

/// Transport a device is attached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceInterface {
    Wired,
    Wireless,
}

impl fmt::Display for DeviceInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceInterface::Wired => write!(f, "USB"),
            DeviceInterface::Wireless => write!(f, "Wi-Fi"),
        }
    }
}

/// A connected device, with properties captured at construction time.
///
/// Two devices are equal when their identifiers are equal. Clones share the
/// same session state.
pub struct Device<B: MobileDeviceBackend> {
    id: String,
    name: String,
    build_version: String,
    product_type: String,
    product_version: String,
    device_class: String,
    interface: DeviceInterface,
    developer_mode_enabled: bool,
    lifecycle: Lifecycle<B>,
}

impl<B: MobileDeviceBackend> Device<B> {
    /// Build a snapshot from a vendor handle.
    ///
    /// Opens a transient session to read the properties and releases it
    /// before returning, whether or not the reads succeed.
    #[instrument(level = "debug", skip(backend))]
    pub fn from_handle(backend: Arc<B>, handle: B::Handle) -> Result<Self, DeviceError> {
        let id = backend
            .device_identifier(&handle)
            .ok_or(DeviceError::PropertyUnavailable {
                key: keys::UNIQUE_DEVICE_ID,
            })?;
        let interface = backend
            .interface_type(&handle)
            .ok_or(DeviceError::PropertyUnavailable {
                key: keys::INTERFACE_TYPE,
            })?;

        let lifecycle = Lifecycle::new(backend, handle);
        let session = lifecycle.open_session()?;

        let read = |key: &'static str| {
            lifecycle
                .backend()
                .copy_value(lifecycle.handle(), key)
                .ok_or(DeviceError::PropertyUnavailable { key })
        };
        let name = read(keys::DEVICE_NAME)?;
        let build_version = read(keys::BUILD_VERSION)?;
        let product_type = read(keys::PRODUCT_TYPE)?;
        let product_version = read(keys::PRODUCT_VERSION)?;
        let device_class = read(keys::DEVICE_CLASS)?;
        let developer_mode_enabled = lifecycle
            .backend()
            .developer_mode_status(lifecycle.handle())
            .map_err(|e| {
                warn!(device = %id, error = %e, "Failed to read developer mode status");
                DeviceError::PropertyUnavailable {
                    key: keys::DEVELOPER_MODE_STATUS,
                }
            })?;

        // The snapshot is complete; a failed teardown is only logged.
        drop(session);

        debug!(device = %id, name = %name, interface = %interface, "Device snapshot captured");
        Ok(Self {
            id,
            name,
            build_version,
            product_type,
            product_version,
            device_class,
            interface,
            developer_mode_enabled,
            lifecycle,
        })
    }

    /// Vendor UDID.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build_version(&self) -> &str {
        &self.build_version
    }

    pub fn product_type(&self) -> &str {
        &self.product_type
    }

    pub fn product_version(&self) -> &str {
        &self.product_version
    }

    pub fn device_class(&self) -> &str {
        &self.device_class
    }

    pub fn interface(&self) -> DeviceInterface {
        self.interface
    }

    pub fn developer_mode_enabled(&self) -> bool {
        self.developer_mode_enabled
    }

    pub fn session_state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn connect(&self) -> Result<(), DeviceError> {
        self.lifecycle.connect()
    }

    pub fn disconnect(&self) -> Result<(), DeviceError> {
        self.lifecycle.disconnect()
    }

    pub fn start_session(&self) -> Result<(), DeviceError> {
        self.lifecycle.start_session()
    }

    pub fn stop_session(&self) -> Result<(), DeviceError> {
        self.lifecycle.stop_session()
    }

    /// Connect and start a session, released when the guard drops.
    pub fn open_session(&self) -> Result<SessionGuard<B>, DeviceError> {
        self.lifecycle.open_session()
    }

    pub(crate) fn backend(&self) -> &Arc<B> {
        self.lifecycle.backend()
    }

    pub(crate) fn handle(&self) -> &B::Handle {
        self.lifecycle.handle()
    }

    /// Fail unless a session is active.
    pub(crate) fn require_session(&self, operation: &'static str) -> Result<(), DeviceError> {
        match self.session_state() {
            SessionState::SessionActive => Ok(()),
            state => Err(DeviceError::InvalidSessionState { operation, state }),
        }
    }
}

impl<B: MobileDeviceBackend> Clone for Device<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            build_version: self.build_version.clone(),
            product_type: self.product_type.clone(),
            product_version: self.product_version.clone(),
            device_class: self.device_class.clone(),
            interface: self.interface,
            developer_mode_enabled: self.developer_mode_enabled,
            lifecycle: self.lifecycle.clone(),
        }
    }
}

impl<B: MobileDeviceBackend> PartialEq for Device<B> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<B: MobileDeviceBackend> Eq for Device<B> {}

impl<B: MobileDeviceBackend> Hash for Device<B> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<B: MobileDeviceBackend> fmt::Debug for Device<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("product_type", &self.product_type)
            .field("product_version", &self.product_version)
            .field("interface", &self.interface)
            .field("session_state", &self.session_state())
            .finish()
    }
}

impl<B: MobileDeviceBackend> fmt::Display for Device<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, UDID: {}, Type: {}, Version: {}, Interface: {}",
            self.name, self.id, self.product_type, self.product_version, self.interface
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockCall, MockDevice};
    use crate::error::BackendError;
    use std::collections::HashSet;

    fn device(mock: &Arc<MockBackend>, udid: &str) -> Device<MockBackend> {
        let handle = mock.attach(MockDevice::new(udid));
        Device::from_handle(mock.clone(), handle).unwrap()
    }

    #[test]
    fn test_snapshot_properties() {
        let mock = Arc::new(MockBackend::new());
        let device = device(&mock, "00008110-001A");

        assert_eq!(device.id(), "00008110-001A");
        assert_eq!(device.name(), "Test iPhone");
        assert_eq!(device.build_version(), "21A329");
        assert_eq!(device.product_type(), "iPhone15,2");
        assert_eq!(device.product_version(), "17.0");
        assert_eq!(device.device_class(), "iPhone");
        assert_eq!(device.interface(), DeviceInterface::Wired);
        assert!(device.developer_mode_enabled());
    }

    #[test]
    fn test_construction_session_is_released() {
        let mock = Arc::new(MockBackend::new());
        let device = device(&mock, "A");

        assert_eq!(device.session_state(), SessionState::Disconnected);
        assert_eq!(mock.calls(MockCall::Connect), 1);
        assert_eq!(mock.calls(MockCall::StartSession), 1);
        assert_eq!(mock.calls(MockCall::StopSession), 1);
        assert_eq!(mock.calls(MockCall::Disconnect), 1);
    }

    #[test]
    fn test_missing_property_fails_and_releases() {
        let mock = Arc::new(MockBackend::new());
        let handle = mock.attach(MockDevice::new("A").without_property(keys::PRODUCT_TYPE));

        let err = Device::from_handle(mock.clone(), handle).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::PropertyUnavailable {
                key: keys::PRODUCT_TYPE
            }
        ));
        assert_eq!(mock.calls(MockCall::StopSession), 1);
        assert_eq!(mock.calls(MockCall::Disconnect), 1);
    }

    #[test]
    fn test_unknown_interface_fails_without_connecting() {
        let mock = Arc::new(MockBackend::new());
        let handle = mock.attach(MockDevice::new("A").with_interface(None));

        let err = Device::from_handle(mock.clone(), handle).unwrap_err();
        assert!(matches!(err, DeviceError::PropertyUnavailable { .. }));
        assert_eq!(mock.calls(MockCall::Connect), 0);
    }

    #[test]
    fn test_developer_mode_failure_is_construction_failure() {
        let mock = Arc::new(MockBackend::new());
        let handle = mock.attach(MockDevice::new("A"));
        mock.fail(MockCall::DeveloperModeStatus, BackendError::new(-1, "nope"));

        assert!(Device::from_handle(mock.clone(), handle).is_err());
        assert_eq!(mock.calls(MockCall::Disconnect), 1);
    }

    #[test]
    fn test_session_failure_is_construction_failure() {
        let mock = Arc::new(MockBackend::new());
        let handle = mock.attach(MockDevice::new("A"));
        mock.fail(MockCall::StartSession, BackendError::new(-1, "locked"));

        let err = Device::from_handle(mock.clone(), handle).unwrap_err();
        assert!(matches!(err, DeviceError::SessionStartFailure { .. }));
        assert_eq!(mock.calls(MockCall::Disconnect), 1);
    }

    #[test]
    fn test_identity_is_the_identifier() {
        let mock = Arc::new(MockBackend::new());
        let a = device(&mock, "A");
        let a_again = device(&mock, "A");
        let b = device(&mock, "B");

        assert_eq!(a, a_again);
        assert_ne!(a, b);

        let set: HashSet<_> = [a, a_again, b].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display() {
        let mock = Arc::new(MockBackend::new());
        let handle = mock.attach(
            MockDevice::new("00008030-AB")
                .with_property(keys::DEVICE_NAME, "Office iPad")
                .with_property(keys::PRODUCT_TYPE, "iPad13,4")
                .with_property(keys::PRODUCT_VERSION, "16.4")
                .with_interface(Some(DeviceInterface::Wireless)),
        );
        let device = Device::from_handle(mock, handle).unwrap();

        assert_eq!(
            device.to_string(),
            "Office iPad, UDID: 00008030-AB, Type: iPad13,4, Version: 16.4, Interface: Wi-Fi"
        );
    }

    #[test]
    fn test_clones_share_session_state() {
        let mock = Arc::new(MockBackend::new());
        let device = device(&mock, "A");
        let other = device.clone();

        device.connect().unwrap();
        assert_eq!(other.session_state(), SessionState::Connected);
        assert!(other.connect().is_err());
        device.disconnect().unwrap();
    }
}
