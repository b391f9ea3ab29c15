//! Error types for device operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionState;

/// Failure reported by a vendor entry point.
///
/// `message` is the diagnostic text the vendor SDK associates with `code`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (0x{code:08X})")]
pub struct BackendError {
    pub code: i32,
    pub message: String,
}

impl BackendError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to connect to device: {message}")]
    ConnectFailure { message: String },

    #[error("Failed to disconnect from device: {message}")]
    DisconnectFailure { message: String },

    #[error("Failed to start session: {message}")]
    SessionStartFailure { message: String },

    #[error("Failed to stop session: {message}")]
    SessionStopFailure { message: String },

    #[error("Failed to start service {service}: {message}")]
    ServiceStartFailure { service: String, message: String },

    #[error("Failed to transfer app: {message}")]
    TransferFailure { message: String },

    #[error("Failed to install app: {message}")]
    InstallFailure { message: String },

    #[error("Failed to load disk image signature from {}: {source}", path.display())]
    DiskImageSignatureLoadFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to mount disk image: {message}")]
    DiskImageMountFailure { message: String },

    #[error("Unsupported package type: {} (expected .app or .ipa)", path.display())]
    InvalidPackageType { path: PathBuf },

    #[error("Device with identifier {0} not found")]
    DeviceNotFound(String),

    #[error("Cannot {operation} while {state}")]
    InvalidSessionState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Device property {key} is unavailable")]
    PropertyUnavailable { key: &'static str },

    #[error("{operation} ended without reporting a result")]
    OperationInterrupted { operation: &'static str },
}
