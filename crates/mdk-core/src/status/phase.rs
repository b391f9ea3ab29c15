//! Typed progress phases for transfer, install and mount operations.

use std::fmt;
use std::path::{Path, PathBuf};

use super::payload::StatusPayload;

/// Kind of long-running device operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Transfer,
    Install,
    Mount,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Transfer => "app transfer",
            OperationKind::Install => "app install",
            OperationKind::Mount => "disk image mount",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a file copy stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCopyProgress {
    /// Total number of files being copied to the destination.
    pub total_files: u64,
    /// Total number of bytes being copied to the destination.
    pub total_bytes: u64,
    /// Number of files copied so far.
    pub copied_files: u64,
    /// Number of bytes copied so far.
    pub copied_bytes: u64,
    /// Path of the file currently being copied.
    pub current_file_path: PathBuf,
}

impl FileCopyProgress {
    /// Last path component of the file being copied.
    pub fn current_file_name(&self) -> String {
        file_name(&self.current_file_path)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A decoded progress update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressStatus<P> {
    /// Percentage from 0 to 100.
    pub percent_complete: u8,
    pub phase: P,
}

impl<P> ProgressStatus<P> {
    pub fn new(percent_complete: u8, phase: P) -> Self {
        Self {
            percent_complete: percent_complete.min(100),
            phase,
        }
    }
}

/// Phase enumeration of one operation kind.
///
/// Implementors map a raw callback payload onto their closed set of
/// stages; see [`crate::status::decode`].
pub trait OperationPhase: fmt::Debug + fmt::Display + Clone + Send + 'static {
    const KIND: OperationKind;

    /// Decode a payload, `None` if it is not a well-formed status for this kind.
    fn decode(payload: &StatusPayload) -> Option<ProgressStatus<Self>>;
}

/// Stages of copying an application bundle onto the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferPhase {
    PreflightingTransfer,
    TransferringPackage,
    CopyingFile(FileCopyProgress),
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferPhase::PreflightingTransfer => write!(f, "Preflighting transfer"),
            TransferPhase::TransferringPackage => write!(f, "Transferring package"),
            TransferPhase::CopyingFile(progress) => {
                write!(f, "Copying {}", progress.current_file_name())
            }
        }
    }
}

/// Stages of installing a transferred application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    CreatingStagingDirectory,
    ExtractingPackage,
    InspectingPackage,
    PreflightingApplication,
    VerifyingApplication,
    CreatingContainer,
    InstallingApplication,
    PostflightingApplication,
    SandboxingApplication,
    GeneratingApplicationMap,
    InstallComplete,
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InstallPhase::CreatingStagingDirectory => "Creating staging directory",
            InstallPhase::ExtractingPackage => "Extracting package",
            InstallPhase::InspectingPackage => "Inspecting package",
            InstallPhase::PreflightingApplication => "Preflighting application",
            InstallPhase::VerifyingApplication => "Verifying application",
            InstallPhase::CreatingContainer => "Creating container",
            InstallPhase::InstallingApplication => "Installing application",
            InstallPhase::PostflightingApplication => "Postflighting application",
            InstallPhase::SandboxingApplication => "Sandboxing application",
            InstallPhase::GeneratingApplicationMap => "Generating application map",
            InstallPhase::InstallComplete => "Install complete",
        };
        f.write_str(text)
    }
}

/// Stages of mounting a developer disk image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountPhase {
    LookingUpImage,
    StreamingImage,
    CopyingFile(FileCopyProgress),
    MountingImage,
}

impl fmt::Display for MountPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountPhase::LookingUpImage => write!(f, "Looking up image"),
            MountPhase::StreamingImage => write!(f, "Streaming image"),
            MountPhase::CopyingFile(progress) => {
                write!(f, "Copying {}", progress.current_file_name())
            }
            MountPhase::MountingImage => write!(f, "Mounting image"),
        }
    }
}
