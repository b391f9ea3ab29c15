//! mdk-core: Apple mobile device sessions, discovery and progress streaming.
//!
//! Wraps the blocking, callback-driven MobileDevice framework in a typed,
//! async-friendly API.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Backend**: vendor SDK abstraction (MobileDevice framework, mock)
//! - **Status**: raw status payloads and the phase decoder
//! - **Device / Session**: identity snapshot and connect/session lifecycle
//! - **Operation**: blocking vendor call -> async progress stream adapter
//! - **Install**: app transfer, app install, developer disk image mount
//! - **Discovery**: enumeration and the shared attach/detach event hub
//! - **Device set**: live, deduplicated list of attached devices
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(target_os = "macos")]
//! # async fn deploy() -> Result<(), mdk_core::DeviceError> {
//! use futures::StreamExt;
//! use mdk_core::{AppInstallable, AppTransferrable, DeviceDiscovery};
//! use std::path::Path;
//!
//! let device = DeviceDiscovery::system().find_device("00008030-001A2B3C4D5E802E")?;
//! let session = device.open_session()?;
//!
//! let bundle = Path::new("Demo.app");
//! let mut transfer = device.transfer_app(bundle);
//! while let Some(status) = transfer.next().await {
//!     println!("{}", status?.phase);
//! }
//! device.install_app(bundle).complete().await?;
//!
//! session.close()
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod device;
pub mod device_set;
pub mod discovery;
pub mod error;
pub mod events;
pub mod install;
pub mod operation;
pub mod service;
pub mod session;
pub mod status;

// Re-exports for convenience
#[cfg(target_os = "macos")]
pub use backend::MobileDeviceFramework;
pub use backend::{InterfaceFilter, MobileDeviceBackend, MockBackend};
pub use config::ToolConfig;
pub use device::{Device, DeviceInterface};
pub use device_set::DeviceSet;
pub use discovery::{DeviceDiscovery, DeviceEventStream};
pub use error::{BackendError, DeviceError};
pub use events::DiscoveryEvent;
pub use install::{AppInstallable, AppTransferrable, PackageType};
pub use operation::OperationStream;
pub use service::Service;
pub use session::{SessionGuard, SessionState};
pub use status::{
    FileCopyProgress, InstallPhase, MountPhase, OperationKind, OperationStatus, ProgressStatus,
    TransferPhase,
};
