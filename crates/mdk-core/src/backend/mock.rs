//! Mock vendor backend for testing.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::mpsc;

use parking_lot::Mutex;

use super::traits::{
    DeviceNotification, InterfaceFilter, MobileDeviceBackend, NotificationCallback,
    StatusCallback,
};
use crate::device::DeviceInterface;
use crate::device::keys;
use crate::error::BackendError;
use crate::install::PackageType;
use crate::status::{OperationKind, StatusPayload};

/// Vendor calls recorded by [`MockBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    DeviceList,
    DeveloperModeStatus,
    Connect,
    Disconnect,
    StartSession,
    StopSession,
    StartService,
    TransferPath,
    InstallApplication,
    MountImage,
    Subscribe,
    Unsubscribe,
}

impl MockCall {
    fn for_operation(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Transfer => MockCall::TransferPath,
            OperationKind::Install => MockCall::InstallApplication,
            OperationKind::Mount => MockCall::MountImage,
        }
    }
}

/// Handle to a simulated device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MockHandle {
    pub udid: String,
}

/// Simulated device properties.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub udid: String,
    pub properties: HashMap<String, String>,
    pub interface: Option<DeviceInterface>,
    pub developer_mode: bool,
}

impl MockDevice {
    /// Device with every required property populated.
    pub fn new(udid: impl Into<String>) -> Self {
        let properties = [
            (keys::DEVICE_NAME, "Test iPhone"),
            (keys::BUILD_VERSION, "21A329"),
            (keys::PRODUCT_TYPE, "iPhone15,2"),
            (keys::PRODUCT_VERSION, "17.0"),
            (keys::DEVICE_CLASS, "iPhone"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            udid: udid.into(),
            properties,
            interface: Some(DeviceInterface::Wired),
            developer_mode: true,
        }
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn without_property(mut self, key: &str) -> Self {
        self.properties.remove(key);
        self
    }

    pub fn with_interface(mut self, interface: Option<DeviceInterface>) -> Self {
        self.interface = interface;
        self
    }

    pub fn with_developer_mode(mut self, enabled: bool) -> Self {
        self.developer_mode = enabled;
        self
    }
}

/// One step of a scripted operation.
pub enum ScriptStep {
    /// Deliver a payload to the callback.
    Emit(StatusPayload),
    /// Block the vendor call until the sender fires or is dropped.
    WaitFor(mpsc::Receiver<()>),
}

/// Scripted behaviour of one blocking operation call.
pub struct OperationScript {
    pub steps: Vec<ScriptStep>,
    pub result: Result<(), BackendError>,
}

impl OperationScript {
    pub fn succeeding(payloads: impl IntoIterator<Item = StatusPayload>) -> Self {
        Self {
            steps: payloads.into_iter().map(ScriptStep::Emit).collect(),
            result: Ok(()),
        }
    }

    pub fn failing(payloads: impl IntoIterator<Item = StatusPayload>, error: BackendError) -> Self {
        Self {
            steps: payloads.into_iter().map(ScriptStep::Emit).collect(),
            result: Err(error),
        }
    }

    pub fn then_wait(mut self, gate: mpsc::Receiver<()>) -> Self {
        self.steps.push(ScriptStep::WaitFor(gate));
        self
    }

    pub fn then_emit(mut self, payload: StatusPayload) -> Self {
        self.steps.push(ScriptStep::Emit(payload));
        self
    }
}

/// Mock backend for unit testing sessions, discovery and operations.
#[derive(Default)]
pub struct MockBackend {
    /// Every device the mock knows about, attached or not.
    known: Mutex<HashMap<String, MockDevice>>,
    /// Attached devices in enumeration order.
    attached: Mutex<Vec<String>>,
    failures: Mutex<HashMap<MockCall, BackendError>>,
    scripts: Mutex<HashMap<OperationKind, VecDeque<OperationScript>>>,
    calls: Mutex<HashMap<MockCall, usize>>,
    subscriptions: Mutex<HashMap<u64, NotificationCallback<MockHandle>>>,
    next_subscription: Mutex<u64>,
    /// Callbacks of finished operations, kept to simulate late delivery.
    retained: Mutex<Vec<StatusCallback>>,
    services: Mutex<Vec<String>>,
    mounted_signatures: Mutex<Vec<Vec<u8>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device so it is enumerated.
    pub fn attach(&self, device: MockDevice) -> MockHandle {
        let handle = MockHandle {
            udid: device.udid.clone(),
        };
        let mut attached = self.attached.lock();
        if !attached.contains(&device.udid) {
            attached.push(device.udid.clone());
        }
        self.known.lock().insert(device.udid.clone(), device);
        handle
    }

    /// Detach a device. Its identifier stays readable.
    pub fn detach(&self, udid: &str) {
        self.attached.lock().retain(|id| id != udid);
    }

    pub fn handle(&self, udid: &str) -> MockHandle {
        MockHandle {
            udid: udid.to_string(),
        }
    }

    /// Make every subsequent `call` fail with `error`.
    pub fn fail(&self, call: MockCall, error: BackendError) {
        self.failures.lock().insert(call, error);
    }

    pub fn clear_failure(&self, call: MockCall) {
        self.failures.lock().remove(&call);
    }

    /// Queue the behaviour of the next call of the given kind.
    pub fn script(&self, kind: OperationKind, script: OperationScript) {
        self.scripts.lock().entry(kind).or_default().push_back(script);
    }

    /// Number of times `call` was issued.
    pub fn calls(&self, call: MockCall) -> usize {
        self.calls.lock().get(&call).copied().unwrap_or(0)
    }

    /// Number of live notification registrations.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Services started so far, in order.
    pub fn started_services(&self) -> Vec<String> {
        self.services.lock().clone()
    }

    pub fn mounted_signatures(&self) -> Vec<Vec<u8>> {
        self.mounted_signatures.lock().clone()
    }

    /// Deliver a connect notification to every registration.
    pub fn emit_connected(&self, udid: &str) {
        self.notify(DeviceNotification::Connected(self.handle(udid)));
    }

    /// Deliver a disconnect notification to every registration.
    pub fn emit_disconnected(&self, udid: &str) {
        self.notify(DeviceNotification::Disconnected(self.handle(udid)));
    }

    /// Deliver the vendor's end-of-subscription signal.
    pub fn emit_unsubscribed(&self) {
        self.notify(DeviceNotification::Unsubscribed);
    }

    /// Invoke the callbacks of already finished operations again.
    pub fn replay_late(&self, payload: StatusPayload) {
        let retained: Vec<StatusCallback> = self.retained.lock().clone();
        for callback in retained {
            callback(payload.clone());
        }
    }

    fn notify(&self, notification: DeviceNotification<MockHandle>) {
        // Callbacks run outside the lock, like a vendor delivery thread.
        let callbacks: Vec<_> = self.subscriptions.lock().values().cloned().collect();
        for callback in callbacks {
            callback(notification.clone());
        }
    }

    fn record(&self, call: MockCall) -> Result<(), BackendError> {
        *self.calls.lock().entry(call).or_insert(0) += 1;
        match self.failures.lock().get(&call) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn device(&self, handle: &MockHandle) -> Option<MockDevice> {
        self.known.lock().get(&handle.udid).cloned()
    }

    fn run_operation(
        &self,
        kind: OperationKind,
        callback: StatusCallback,
    ) -> Result<(), BackendError> {
        self.record(MockCall::for_operation(kind))?;

        let script = self
            .scripts
            .lock()
            .get_mut(&kind)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| OperationScript::succeeding(Vec::<StatusPayload>::new()));

        for step in script.steps {
            match step {
                ScriptStep::Emit(payload) => callback(payload),
                ScriptStep::WaitFor(gate) => {
                    let _ = gate.recv();
                }
            }
        }

        self.retained.lock().push(callback);
        script.result
    }
}

impl MobileDeviceBackend for MockBackend {
    type Handle = MockHandle;
    type Subscription = u64;

    fn device_list(&self) -> Vec<MockHandle> {
        if self.record(MockCall::DeviceList).is_err() {
            return Vec::new();
        }
        self.attached
            .lock()
            .iter()
            .map(|udid| self.handle(udid))
            .collect()
    }

    fn device_identifier(&self, device: &MockHandle) -> Option<String> {
        Some(device.udid.clone())
    }

    fn copy_value(&self, device: &MockHandle, key: &str) -> Option<String> {
        self.device(device)?.properties.get(key).cloned()
    }

    fn interface_type(&self, device: &MockHandle) -> Option<DeviceInterface> {
        self.device(device)?.interface
    }

    fn developer_mode_status(&self, device: &MockHandle) -> Result<bool, BackendError> {
        self.record(MockCall::DeveloperModeStatus)?;
        self.device(device)
            .map(|d| d.developer_mode)
            .ok_or_else(|| BackendError::new(-402653183, "The device is no longer attached"))
    }

    fn connect(&self, _device: &MockHandle) -> Result<(), BackendError> {
        self.record(MockCall::Connect)
    }

    fn disconnect(&self, _device: &MockHandle) -> Result<(), BackendError> {
        self.record(MockCall::Disconnect)
    }

    fn start_session(&self, _device: &MockHandle) -> Result<(), BackendError> {
        self.record(MockCall::StartSession)
    }

    fn stop_session(&self, _device: &MockHandle) -> Result<(), BackendError> {
        self.record(MockCall::StopSession)
    }

    fn start_service(&self, _device: &MockHandle, service_name: &str) -> Result<(), BackendError> {
        self.record(MockCall::StartService)?;
        self.services.lock().push(service_name.to_string());
        Ok(())
    }

    fn transfer_path(
        &self,
        _device: &MockHandle,
        _bundle: &Path,
        _package_type: PackageType,
        callback: StatusCallback,
    ) -> Result<(), BackendError> {
        self.run_operation(OperationKind::Transfer, callback)
    }

    fn install_application(
        &self,
        _device: &MockHandle,
        _bundle: &Path,
        _package_type: PackageType,
        callback: StatusCallback,
    ) -> Result<(), BackendError> {
        self.run_operation(OperationKind::Install, callback)
    }

    fn mount_image(
        &self,
        _device: &MockHandle,
        _image: &Path,
        signature: &[u8],
        callback: StatusCallback,
    ) -> Result<(), BackendError> {
        self.mounted_signatures.lock().push(signature.to_vec());
        self.run_operation(OperationKind::Mount, callback)
    }

    fn subscribe(
        &self,
        _interface: InterfaceFilter,
        callback: NotificationCallback<MockHandle>,
    ) -> Result<u64, BackendError> {
        self.record(MockCall::Subscribe)?;
        let mut next = self.next_subscription.lock();
        *next += 1;
        self.subscriptions.lock().insert(*next, callback);
        Ok(*next)
    }

    fn unsubscribe(&self, subscription: u64) -> Result<(), BackendError> {
        self.subscriptions.lock().remove(&subscription);
        self.record(MockCall::Unsubscribe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_mock_enumeration() {
        let mock = MockBackend::new();
        mock.attach(MockDevice::new("A"));
        mock.attach(MockDevice::new("B"));
        assert_eq!(mock.device_list().len(), 2);

        mock.detach("A");
        let list = mock.device_list();
        assert_eq!(list, vec![mock.handle("B")]);
        // Identifier of a detached device is still readable
        assert_eq!(mock.device_identifier(&mock.handle("A")).as_deref(), Some("A"));
        assert_eq!(mock.calls(MockCall::DeviceList), 2);
    }

    #[test]
    fn test_mock_failure_injection() {
        let mock = MockBackend::new();
        let handle = mock.attach(MockDevice::new("A"));
        mock.fail(MockCall::Connect, BackendError::new(1, "boom"));

        assert_eq!(mock.connect(&handle), Err(BackendError::new(1, "boom")));
        mock.clear_failure(MockCall::Connect);
        assert!(mock.connect(&handle).is_ok());
        assert_eq!(mock.calls(MockCall::Connect), 2);
    }

    #[test]
    fn test_mock_script_and_late_replay() {
        let mock = MockBackend::new();
        let handle = mock.attach(MockDevice::new("A"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: StatusCallback = Arc::new(move |p: StatusPayload| sink.lock().push(p));

        mock.script(
            OperationKind::Transfer,
            OperationScript::succeeding([StatusPayload::new().with("Status", "A")]),
        );
        mock.transfer_path(&handle, Path::new("x.app"), PackageType::Developer, callback)
            .unwrap();
        assert_eq!(seen.lock().len(), 1);

        mock.replay_late(StatusPayload::new().with("Status", "B"));
        assert_eq!(seen.lock().len(), 2);
    }
}
