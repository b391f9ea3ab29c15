//! Live list of attached devices, kept current from discovery events.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::MobileDeviceBackend;
use crate::device::Device;
use crate::discovery::{DeviceDiscovery, DeviceEventStream};
use crate::events::DiscoveryEvent;

type Devices<B> = watch::Sender<Vec<Device<B>>>;

/// The devices currently attached, in attach order.
///
/// Holds one logical event subscription for its whole lifetime. A connect
/// for an identifier already present is ignored; a disconnect removes the
/// entry with that identifier.
pub struct DeviceSet<B: MobileDeviceBackend> {
    devices: Arc<Devices<B>>,
    tracker: JoinHandle<()>,
}

impl<B: MobileDeviceBackend> DeviceSet<B> {
    /// Start tracking. Must be called from within a tokio runtime.
    ///
    /// The set is seeded with a snapshot taken after the event subscription
    /// is in place, so no attach between the two is missed.
    pub fn watch(discovery: &DeviceDiscovery<B>) -> Self {
        let events = discovery.device_events();
        let (devices, _) = watch::channel(Vec::new());
        let devices = Arc::new(devices);

        for device in discovery.list_devices() {
            apply(&devices, DiscoveryEvent::Connected(device));
        }

        let tracker = tokio::spawn(track(events, devices.clone()));
        Self { devices, tracker }
    }

    /// Snapshot of the current list.
    pub fn devices(&self) -> Vec<Device<B>> {
        self.devices.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.devices.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.borrow().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.borrow().iter().any(|device| device.id() == id)
    }

    /// Receiver notified whenever the list changes.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Device<B>>> {
        self.devices.subscribe()
    }
}

impl<B: MobileDeviceBackend> Drop for DeviceSet<B> {
    fn drop(&mut self) {
        self.tracker.abort();
    }
}

async fn track<B: MobileDeviceBackend>(mut events: DeviceEventStream<B>, devices: Arc<Devices<B>>) {
    while let Some(event) = events.next().await {
        apply(&devices, event);
    }
    info!("Device event stream ended; device list is no longer updated");
}

/// Returns whether the list changed.
fn apply<B: MobileDeviceBackend>(devices: &Devices<B>, event: DiscoveryEvent<B>) -> bool {
    devices.send_if_modified(|list| match event {
        DiscoveryEvent::Connected(device) => {
            if list.iter().any(|known| known.id() == device.id()) {
                debug!(device = %device.id(), "Device already listed");
                return false;
            }
            list.push(device);
            true
        }
        DiscoveryEvent::Disconnected(id) => {
            let before = list.len();
            list.retain(|known| known.id() != id);
            list.len() != before
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockCall, MockDevice};
    use crate::config::ToolConfig;

    fn ids<B: MobileDeviceBackend>(devices: &[Device<B>]) -> Vec<String> {
        devices.iter().map(|d| d.id().to_string()).collect()
    }

    fn device(mock: &Arc<MockBackend>, id: &str) -> Device<MockBackend> {
        Device::from_handle(mock.clone(), mock.attach(MockDevice::new(id))).unwrap()
    }

    #[test]
    fn test_duplicate_connect_is_ignored() {
        let mock = Arc::new(MockBackend::new());
        let (devices, _) = watch::channel(Vec::new());

        assert!(apply(&devices, DiscoveryEvent::Connected(device(&mock, "A"))));
        assert!(apply(&devices, DiscoveryEvent::Connected(device(&mock, "B"))));
        assert!(!apply(&devices, DiscoveryEvent::Connected(device(&mock, "A"))));

        assert_eq!(ids(&devices.borrow()), vec!["A", "B"]);
    }

    #[test]
    fn test_disconnect_removes_by_id() {
        let mock = Arc::new(MockBackend::new());
        let (devices, _) = watch::channel(Vec::new());
        apply(&devices, DiscoveryEvent::Connected(device(&mock, "A")));
        apply(&devices, DiscoveryEvent::Connected(device(&mock, "B")));

        assert!(apply(&devices, DiscoveryEvent::Disconnected("A".into())));
        assert!(!apply(&devices, DiscoveryEvent::Disconnected("A".into())));
        assert!(!apply(&devices, DiscoveryEvent::Disconnected("unknown".into())));

        assert_eq!(ids(&devices.borrow()), vec!["B"]);
    }

    #[tokio::test]
    async fn test_tracks_attach_and_detach() {
        let mock = Arc::new(MockBackend::new());
        mock.attach(MockDevice::new("A"));
        let discovery = DeviceDiscovery::new(mock.clone(), ToolConfig::default());

        let set = DeviceSet::watch(&discovery);
        assert_eq!(ids(&set.devices()), vec!["A"]);
        assert_eq!(mock.active_subscriptions(), 1);
        let mut changes = set.subscribe();

        // Already listed from the initial snapshot
        mock.emit_connected("A");
        mock.attach(MockDevice::new("B"));
        mock.emit_connected("B");
        changes.changed().await.unwrap();
        assert_eq!(ids(&changes.borrow_and_update()), vec!["A", "B"]);

        mock.emit_disconnected("A");
        changes.changed().await.unwrap();
        assert_eq!(ids(&set.devices()), vec!["B"]);
        assert!(set.contains("B"));
        assert!(!set.contains("A"));
        assert_eq!(set.len(), 1);
        assert_eq!(mock.calls(MockCall::Subscribe), 1);
    }

    #[tokio::test]
    async fn test_empty_until_attach() {
        let mock = Arc::new(MockBackend::new());
        let discovery = DeviceDiscovery::new(mock.clone(), ToolConfig::default());

        let set = DeviceSet::watch(&discovery);
        assert!(set.is_empty());
        let mut changes = set.subscribe();

        mock.attach(MockDevice::new("A"));
        mock.emit_connected("A");
        changes.changed().await.unwrap();
        assert_eq!(ids(&set.devices()), vec!["A"]);
    }
}
