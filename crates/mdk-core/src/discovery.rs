//! Device enumeration and the shared attach/detach notification hub.
//!
//! Every [`DeviceEventStream`] is a logical subscriber to one vendor
//! registration. The first subscriber installs it and the last one to drop
//! removes it. Events are fanned out through a broadcast channel; the vendor
//! callback only ever touches that channel, never the hub state.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    DeviceNotification, InterfaceFilter, MobileDeviceBackend, NotificationCallback,
};
use crate::config::ToolConfig;
use crate::device::Device;
use crate::error::{BackendError, DeviceError};
use crate::events::DiscoveryEvent;

type EventSender<B> = Arc<Mutex<Option<broadcast::Sender<DiscoveryEvent<B>>>>>;

/// Entry point for finding devices and watching them come and go.
pub struct DeviceDiscovery<B: MobileDeviceBackend> {
    hub: Arc<Hub<B>>,
}

impl<B: MobileDeviceBackend> Clone for DeviceDiscovery<B> {
    fn clone(&self) -> Self {
        Self {
            hub: self.hub.clone(),
        }
    }
}

struct Hub<B: MobileDeviceBackend> {
    backend: Arc<B>,
    config: ToolConfig,
    state: Mutex<HubState<B>>,
}

struct HubState<B: MobileDeviceBackend> {
    /// Bumped whenever a registration is replaced under live subscribers.
    generation: u64,
    subscribers: usize,
    registration: Option<Registration<B>>,
}

struct Registration<B: MobileDeviceBackend> {
    subscription: B::Subscription,
    sender: EventSender<B>,
}

impl<B: MobileDeviceBackend> Registration<B> {
    /// The vendor signalled the end of this registration.
    fn is_ended(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl<B: MobileDeviceBackend> DeviceDiscovery<B> {
    pub fn new(backend: Arc<B>, config: ToolConfig) -> Self {
        Self {
            hub: Arc::new(Hub {
                backend,
                config,
                state: Mutex::new(HubState {
                    generation: 0,
                    subscribers: 0,
                    registration: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.hub.config
    }

    /// Fresh snapshot of the attached devices.
    ///
    /// Devices that cannot be read are skipped; so are devices on an
    /// interface the configuration filters out.
    #[instrument(skip(self))]
    pub fn list_devices(&self) -> Vec<Device<B>> {
        let backend = &self.hub.backend;
        let handles = backend.device_list();
        debug!(count = handles.len(), "Enumerated device handles");

        handles
            .into_iter()
            .filter_map(|handle| match Device::from_handle(backend.clone(), handle) {
                Ok(device) => Some(device),
                Err(e) => {
                    warn!(error = %e, "Skipping device that could not be read");
                    None
                }
            })
            .filter(|device| self.hub.config.interface.matches(device.interface()))
            .collect()
    }

    /// Look up an attached device by identifier.
    ///
    /// Only the matching device is read, so no other device is connected to.
    #[instrument(skip(self))]
    pub fn find_device(&self, id: &str) -> Result<Device<B>, DeviceError> {
        let backend = &self.hub.backend;
        let handle = backend
            .device_list()
            .into_iter()
            .find(|handle| backend.device_identifier(handle).as_deref() == Some(id))
            .ok_or_else(|| DeviceError::DeviceNotFound(id.to_string()))?;

        let device = Device::from_handle(backend.clone(), handle)?;
        if !self.hub.config.interface.matches(device.interface()) {
            debug!(interface = %device.interface(), "Device is filtered out by interface");
            return Err(DeviceError::DeviceNotFound(id.to_string()));
        }
        Ok(device)
    }

    /// Subscribe to attach/detach events.
    ///
    /// If the vendor registration cannot be installed the returned stream is
    /// already finished.
    pub fn device_events(&self) -> DeviceEventStream<B> {
        let mut state = self.hub.state.lock();

        if state.registration.as_ref().is_some_and(Registration::is_ended) {
            // Ended by the vendor while older streams are still held.
            if let Some(ended) = state.registration.take() {
                self.hub.release(ended);
            }
            state.generation += 1;
            state.subscribers = 0;
        }

        if state.registration.is_none() {
            match self.hub.register() {
                Ok(registration) => state.registration = Some(registration),
                Err(e) => {
                    warn!(error = %e, "Failed to subscribe to device notifications");
                    return DeviceEventStream::finished();
                }
            }
        }

        let receiver = state
            .registration
            .as_ref()
            .and_then(|registration| registration.sender.lock().as_ref().map(|tx| tx.subscribe()));
        let Some(receiver) = receiver else {
            return DeviceEventStream::finished();
        };

        state.subscribers += 1;
        debug!(subscribers = state.subscribers, "Device event subscriber added");
        DeviceEventStream {
            events: BroadcastStream::new(receiver),
            _subscriber: Some(Subscriber {
                hub: self.hub.clone(),
                generation: state.generation,
            }),
        }
    }
}

#[cfg(target_os = "macos")]
impl DeviceDiscovery<crate::backend::MobileDeviceFramework> {
    /// Process-wide instance bound to the MobileDevice framework.
    pub fn system() -> &'static Self {
        Self::init_system(ToolConfig::default())
    }

    /// Like [`system`](Self::system), but applies `config` if this is the
    /// first call in the process.
    pub fn init_system(config: ToolConfig) -> &'static Self {
        static SYSTEM: std::sync::OnceLock<
            DeviceDiscovery<crate::backend::MobileDeviceFramework>,
        > = std::sync::OnceLock::new();

        SYSTEM.get_or_init(|| {
            DeviceDiscovery::new(Arc::new(crate::backend::MobileDeviceFramework::new()), config)
        })
    }
}

impl<B: MobileDeviceBackend> Hub<B> {
    fn register(&self) -> Result<Registration<B>, BackendError> {
        let (tx, _) = broadcast::channel(self.config.event_capacity.max(1));
        let sender: EventSender<B> = Arc::new(Mutex::new(Some(tx)));
        let callback = notification_callback(
            self.backend.clone(),
            sender.clone(),
            self.config.interface,
        );

        let subscription = self.backend.subscribe(self.config.interface, callback)?;
        info!(interface = ?self.config.interface, "Installed device notification registration");
        Ok(Registration {
            subscription,
            sender,
        })
    }

    fn release(&self, registration: Registration<B>) {
        registration.sender.lock().take();
        match self.backend.unsubscribe(registration.subscription) {
            Ok(()) => info!("Removed device notification registration"),
            Err(e) => warn!(error = %e, "Failed to remove device notification registration"),
        }
    }
}

impl<B: MobileDeviceBackend> Drop for Hub<B> {
    fn drop(&mut self) {
        if let Some(registration) = self.state.get_mut().registration.take() {
            self.release(registration);
        }
    }
}

/// Runs on the vendor's delivery thread.
fn notification_callback<B: MobileDeviceBackend>(
    backend: Arc<B>,
    sender: EventSender<B>,
    interface: InterfaceFilter,
) -> NotificationCallback<B::Handle> {
    Arc::new(move |notification: DeviceNotification<B::Handle>| match notification {
        DeviceNotification::Connected(handle) => {
            let listening = sender
                .lock()
                .as_ref()
                .is_some_and(|tx| tx.receiver_count() > 0);
            if !listening {
                return;
            }
            match Device::from_handle(backend.clone(), handle) {
                Ok(device) if interface.matches(device.interface()) => {
                    debug!(device = %device.id(), "Device attached");
                    publish(&sender, DiscoveryEvent::Connected(device));
                }
                Ok(device) => {
                    debug!(device = %device.id(), interface = %device.interface(), "Ignoring device on filtered interface");
                }
                Err(e) => warn!(error = %e, "Dropping attach of device that could not be read"),
            }
        }
        DeviceNotification::Disconnected(handle) => match backend.device_identifier(&handle) {
            Some(id) => {
                debug!(device = %id, "Device detached");
                publish(&sender, DiscoveryEvent::Disconnected(id));
            }
            None => warn!("Dropping detach of device without an identifier"),
        },
        DeviceNotification::Unsubscribed => {
            if sender.lock().take().is_some() {
                info!("Device notifications ended by the vendor");
            }
        }
    })
}

fn publish<B: MobileDeviceBackend>(sender: &EventSender<B>, event: DiscoveryEvent<B>) {
    if let Some(tx) = sender.lock().as_ref() {
        // No receivers is fine: subscribers may have just gone away.
        let _ = tx.send(event);
    }
}

/// Keeps the registration alive; the last one dropped removes it.
struct Subscriber<B: MobileDeviceBackend> {
    hub: Arc<Hub<B>>,
    generation: u64,
}

impl<B: MobileDeviceBackend> Drop for Subscriber<B> {
    fn drop(&mut self) {
        let mut state = self.hub.state.lock();
        if state.generation != self.generation {
            // Its registration was already released and replaced
            return;
        }
        state.subscribers = state.subscribers.saturating_sub(1);
        debug!(subscribers = state.subscribers, "Device event subscriber removed");
        if state.subscribers == 0 {
            if let Some(registration) = state.registration.take() {
                self.hub.release(registration);
            }
        }
    }
}

/// Stream of attach/detach events for one logical subscriber.
///
/// Dropping it unsubscribes. A subscriber that falls more than the
/// configured capacity behind skips the missed events.
#[must_use = "streams do nothing unless polled"]
pub struct DeviceEventStream<B: MobileDeviceBackend> {
    events: BroadcastStream<DiscoveryEvent<B>>,
    _subscriber: Option<Subscriber<B>>,
}

impl<B: MobileDeviceBackend> DeviceEventStream<B> {
    fn finished() -> Self {
        let (_, receiver) = broadcast::channel(1);
        Self {
            events: BroadcastStream::new(receiver),
            _subscriber: None,
        }
    }
}

impl<B: MobileDeviceBackend> Stream for DeviceEventStream<B> {
    type Item = DiscoveryEvent<B>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.events).poll_next(cx)) {
                Some(Ok(event)) => return Poll::Ready(Some(event)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "Device event subscriber lagged behind; skipping missed events");
                }
                None => return Poll::Ready(None),
            }
        }
    }
}
