//! Device attach/detach events delivered by the discovery hub.

use std::fmt;

use crate::backend::MobileDeviceBackend;
use crate::device::Device;

/// A change in the set of attached devices.
pub enum DiscoveryEvent<B: MobileDeviceBackend> {
    /// A device attached; its properties were read on arrival.
    Connected(Device<B>),
    /// A device detached. Only the identifier is known at this point.
    Disconnected(String),
}

impl<B: MobileDeviceBackend> DiscoveryEvent<B> {
    /// Identifier of the device the event is about.
    pub fn device_id(&self) -> &str {
        match self {
            DiscoveryEvent::Connected(device) => device.id(),
            DiscoveryEvent::Disconnected(id) => id,
        }
    }
}

impl<B: MobileDeviceBackend> Clone for DiscoveryEvent<B> {
    fn clone(&self) -> Self {
        match self {
            DiscoveryEvent::Connected(device) => DiscoveryEvent::Connected(device.clone()),
            DiscoveryEvent::Disconnected(id) => DiscoveryEvent::Disconnected(id.clone()),
        }
    }
}

impl<B: MobileDeviceBackend> fmt::Debug for DiscoveryEvent<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryEvent::Connected(device) => f.debug_tuple("Connected").field(device).finish(),
            DiscoveryEvent::Disconnected(id) => f.debug_tuple("Disconnected").field(id).finish(),
        }
    }
}

impl<B: MobileDeviceBackend> fmt::Display for DiscoveryEvent<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryEvent::Connected(device) => write!(f, "Connected: {device}"),
            DiscoveryEvent::Disconnected(id) => write!(f, "Disconnected: {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockDevice};
    use std::sync::Arc;

    #[test]
    fn test_event_display() {
        let mock = Arc::new(MockBackend::new());
        let handle = mock.attach(MockDevice::new("00008030-01"));
        let device = Device::from_handle(mock, handle).unwrap();

        let connected = DiscoveryEvent::Connected(device);
        assert_eq!(connected.device_id(), "00008030-01");
        assert_eq!(
            connected.to_string(),
            "Connected: Test iPhone, UDID: 00008030-01, Type: iPhone15,2, Version: 17.0, Interface: USB"
        );

        let disconnected = DiscoveryEvent::<MockBackend>::Disconnected("00008030-01".into());
        assert_eq!(disconnected.to_string(), "Disconnected: 00008030-01");
    }
}
