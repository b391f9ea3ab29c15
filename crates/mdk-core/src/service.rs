//! Named on-device services.

use std::fmt;

use tracing::{debug, instrument};

use crate::backend::MobileDeviceBackend;
use crate::device::Device;
use crate::error::DeviceError;

/// Services the crate knows how to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// File conduit used to stage application bundles.
    AppleFileConduit,
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Service::AppleFileConduit => "com.apple.afc",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl<B: MobileDeviceBackend> Device<B> {
    /// Start `service` on the device. Requires an active session.
    #[instrument(skip(self), fields(device = %self.id()))]
    pub fn start_service(&self, service: Service) -> Result<(), DeviceError> {
        self.require_session("start a service")?;
        self.backend()
            .start_service(self.handle(), service.name())
            .map_err(|e| DeviceError::ServiceStartFailure {
                service: service.name().to_string(),
                message: e.message,
            })?;
        debug!(service = %service, "Service started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockCall, MockDevice};
    use crate::error::BackendError;
    use crate::session::SessionState;
    use std::sync::Arc;

    fn device(mock: &Arc<MockBackend>) -> Device<MockBackend> {
        let handle = mock.attach(MockDevice::new("A"));
        Device::from_handle(mock.clone(), handle).unwrap()
    }

    #[test]
    fn test_service_name() {
        assert_eq!(Service::AppleFileConduit.name(), "com.apple.afc");
        assert_eq!(Service::AppleFileConduit.to_string(), "com.apple.afc");
    }

    #[test]
    fn test_start_service_requires_session() {
        let mock = Arc::new(MockBackend::new());
        let device = device(&mock);

        let err = device.start_service(Service::AppleFileConduit).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::InvalidSessionState {
                state: SessionState::Disconnected,
                ..
            }
        ));
        assert_eq!(mock.calls(MockCall::StartService), 0);
    }

    #[test]
    fn test_start_service_in_session() {
        let mock = Arc::new(MockBackend::new());
        let device = device(&mock);
        let session = device.open_session().unwrap();

        device.start_service(Service::AppleFileConduit).unwrap();
        assert_eq!(mock.started_services(), vec!["com.apple.afc".to_string()]);
        session.close().unwrap();
    }

    #[test]
    fn test_start_service_failure() {
        let mock = Arc::new(MockBackend::new());
        let device = device(&mock);
        let _session = device.open_session().unwrap();
        mock.fail(MockCall::StartService, BackendError::new(-1, "denied"));

        match device.start_service(Service::AppleFileConduit) {
            Err(DeviceError::ServiceStartFailure { service, message }) => {
                assert_eq!(service, "com.apple.afc");
                assert_eq!(message, "denied");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
