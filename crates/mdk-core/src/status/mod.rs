//! Progress status model and phase decoding.

pub mod decode;
pub mod payload;
pub mod phase;

pub use decode::{OperationStatus, decode};
pub use payload::{PayloadValue, StatusPayload};
pub use phase::{
    FileCopyProgress, InstallPhase, MountPhase, OperationKind, OperationPhase, ProgressStatus,
    TransferPhase,
};
