//! Phase decoder: untyped callback payload -> typed progress status.
//!
//! Decoding is pure. A payload whose `Status` is unknown, or that is
//! missing a field its phase requires, decodes to `None`; a partially
//! filled status is never produced.

use std::path::PathBuf;

use super::payload::*;
use super::phase::{
    FileCopyProgress, InstallPhase, MountPhase, OperationKind, OperationPhase, ProgressStatus,
    TransferPhase,
};

/// A decoded status of any operation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Transfer(ProgressStatus<TransferPhase>),
    Install(ProgressStatus<InstallPhase>),
    Mount(ProgressStatus<MountPhase>),
}

impl OperationStatus {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationStatus::Transfer(_) => OperationKind::Transfer,
            OperationStatus::Install(_) => OperationKind::Install,
            OperationStatus::Mount(_) => OperationKind::Mount,
        }
    }

    pub fn percent_complete(&self) -> u8 {
        match self {
            OperationStatus::Transfer(s) => s.percent_complete,
            OperationStatus::Install(s) => s.percent_complete,
            OperationStatus::Mount(s) => s.percent_complete,
        }
    }
}

/// Decode `payload` as a status of the given operation kind.
pub fn decode(payload: &StatusPayload, kind: OperationKind) -> Option<OperationStatus> {
    match kind {
        OperationKind::Transfer => TransferPhase::decode(payload).map(OperationStatus::Transfer),
        OperationKind::Install => InstallPhase::decode(payload).map(OperationStatus::Install),
        OperationKind::Mount => MountPhase::decode(payload).map(OperationStatus::Mount),
    }
}

fn clamp_percent(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// `PercentComplete` of transfer and install payloads.
///
/// Absent means 0; present with a non-integer value is malformed.
fn reported_percent(payload: &StatusPayload) -> Option<u8> {
    match payload.get(KEY_PERCENT_COMPLETE) {
        None => Some(0),
        Some(PayloadValue::Integer(n)) => Some(clamp_percent(*n)),
        Some(_) => None,
    }
}

/// The five fields shared by every "CopyingFile" status.
fn file_copy_progress(payload: &StatusPayload) -> Option<FileCopyProgress> {
    Some(FileCopyProgress {
        total_files: payload.get_u64(KEY_TOTAL_FILES)?,
        total_bytes: payload.get_u64(KEY_TOTAL_BYTES)?,
        copied_files: payload.get_u64(KEY_NUM_FILES)?,
        copied_bytes: payload.get_u64(KEY_NUM_BYTES)?,
        current_file_path: PathBuf::from(payload.get_str(KEY_PATH)?),
    })
}

impl OperationPhase for TransferPhase {
    const KIND: OperationKind = OperationKind::Transfer;

    fn decode(payload: &StatusPayload) -> Option<ProgressStatus<Self>> {
        let phase = match payload.get_str(KEY_STATUS)? {
            "PreflightingTransfer" => TransferPhase::PreflightingTransfer,
            "TransferringPackage" => TransferPhase::TransferringPackage,
            "CopyingFile" => TransferPhase::CopyingFile(file_copy_progress(payload)?),
            _ => return None,
        };
        Some(ProgressStatus::new(reported_percent(payload)?, phase))
    }
}

impl OperationPhase for InstallPhase {
    const KIND: OperationKind = OperationKind::Install;

    fn decode(payload: &StatusPayload) -> Option<ProgressStatus<Self>> {
        let phase = match payload.get_str(KEY_STATUS)? {
            "CreatingStagingDirectory" => InstallPhase::CreatingStagingDirectory,
            "ExtractingPackage" => InstallPhase::ExtractingPackage,
            "InspectingPackage" => InstallPhase::InspectingPackage,
            "PreflightingApplication" => InstallPhase::PreflightingApplication,
            "VerifyingApplication" => InstallPhase::VerifyingApplication,
            "CreatingContainer" => InstallPhase::CreatingContainer,
            "InstallingApplication" => InstallPhase::InstallingApplication,
            "PostflightingApplication" => InstallPhase::PostflightingApplication,
            "SandboxingApplication" => InstallPhase::SandboxingApplication,
            "GeneratingApplicationMap" => InstallPhase::GeneratingApplicationMap,
            "InstallComplete" => InstallPhase::InstallComplete,
            _ => return None,
        };
        Some(ProgressStatus::new(reported_percent(payload)?, phase))
    }
}

impl OperationPhase for MountPhase {
    const KIND: OperationKind = OperationKind::Mount;

    /// Mount payloads rarely carry a usable percentage, so it is derived
    /// from the phase: lookup 0, streaming 1, copying as reported, mounting 100.
    fn decode(payload: &StatusPayload) -> Option<ProgressStatus<Self>> {
        let (phase, percent) = match payload.get_str(KEY_STATUS)? {
            "LookingUpImage" => (MountPhase::LookingUpImage, 0),
            "StreamingImage" => (MountPhase::StreamingImage, 1),
            "CopyingFile" => {
                let progress = file_copy_progress(payload)?;
                let percent = payload
                    .get_i64(KEY_PERCENT_COMPLETE)
                    .map(clamp_percent)
                    .unwrap_or(0);
                (MountPhase::CopyingFile(progress), percent)
            }
            "MountingImage" => (MountPhase::MountingImage, 100),
            _ => return None,
        };
        Some(ProgressStatus::new(percent, phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copying_file_payload() -> StatusPayload {
        StatusPayload::new()
            .with(KEY_STATUS, "CopyingFile")
            .with(KEY_TOTAL_FILES, 10i64)
            .with(KEY_TOTAL_BYTES, 1000i64)
            .with(KEY_NUM_FILES, 3i64)
            .with(KEY_NUM_BYTES, 300i64)
            .with(KEY_PATH, "/a/b.app")
    }

    fn expected_copy_progress() -> FileCopyProgress {
        FileCopyProgress {
            total_files: 10,
            total_bytes: 1000,
            copied_files: 3,
            copied_bytes: 300,
            current_file_path: PathBuf::from("/a/b.app"),
        }
    }

    #[test]
    fn test_transferring_package() {
        let payload = StatusPayload::new()
            .with(KEY_STATUS, "TransferringPackage")
            .with(KEY_PERCENT_COMPLETE, 40i64);

        assert_eq!(
            TransferPhase::decode(&payload),
            Some(ProgressStatus::new(40, TransferPhase::TransferringPackage))
        );
    }

    #[test]
    fn test_transfer_copying_file() {
        let status = TransferPhase::decode(&copying_file_payload()).unwrap();
        assert_eq!(status.percent_complete, 0);
        assert_eq!(
            status.phase,
            TransferPhase::CopyingFile(expected_copy_progress())
        );

        let payload = copying_file_payload().with(KEY_PERCENT_COMPLETE, 15i64);
        assert_eq!(TransferPhase::decode(&payload).unwrap().percent_complete, 15);
    }

    #[test]
    fn test_copying_file_requires_every_field() {
        for missing in [
            KEY_TOTAL_FILES,
            KEY_TOTAL_BYTES,
            KEY_NUM_FILES,
            KEY_NUM_BYTES,
            KEY_PATH,
        ] {
            let payload: StatusPayload = [
                (KEY_STATUS, PayloadValue::from("CopyingFile")),
                (KEY_TOTAL_FILES, 10i64.into()),
                (KEY_TOTAL_BYTES, 1000i64.into()),
                (KEY_NUM_FILES, 3i64.into()),
                (KEY_NUM_BYTES, 300i64.into()),
                (KEY_PATH, "/a/b.app".into()),
            ]
            .into_iter()
            .filter(|(key, _)| *key != missing)
            .collect();

            assert_eq!(TransferPhase::decode(&payload), None, "missing {missing}");
            assert_eq!(MountPhase::decode(&payload), None, "missing {missing}");
        }
    }

    #[test]
    fn test_ill_typed_fields_are_rejected() {
        let payload = copying_file_payload().with(KEY_NUM_BYTES, "300");
        assert_eq!(TransferPhase::decode(&payload), None);

        let payload = copying_file_payload().with(KEY_TOTAL_FILES, -1i64);
        assert_eq!(TransferPhase::decode(&payload), None);

        let payload = StatusPayload::new()
            .with(KEY_STATUS, "InstallComplete")
            .with(KEY_PERCENT_COMPLETE, "100");
        assert_eq!(InstallPhase::decode(&payload), None);

        let payload = StatusPayload::new().with(KEY_STATUS, 7i64);
        assert_eq!(InstallPhase::decode(&payload), None);
    }

    #[test]
    fn test_unknown_status_and_empty_payload() {
        let payload = StatusPayload::new().with(KEY_STATUS, "Teleporting");
        assert_eq!(TransferPhase::decode(&payload), None);
        assert_eq!(InstallPhase::decode(&payload), None);
        assert_eq!(MountPhase::decode(&payload), None);

        let empty = StatusPayload::new();
        for kind in [OperationKind::Transfer, OperationKind::Install, OperationKind::Mount] {
            assert_eq!(decode(&empty, kind), None);
        }
    }

    #[test]
    fn test_statuses_are_kind_specific() {
        let payload = StatusPayload::new().with(KEY_STATUS, "InstallComplete");
        assert!(decode(&payload, OperationKind::Install).is_some());
        assert_eq!(decode(&payload, OperationKind::Transfer), None);
        assert_eq!(decode(&payload, OperationKind::Mount), None);
    }

    #[test]
    fn test_every_install_status() {
        let table = [
            ("CreatingStagingDirectory", InstallPhase::CreatingStagingDirectory),
            ("ExtractingPackage", InstallPhase::ExtractingPackage),
            ("InspectingPackage", InstallPhase::InspectingPackage),
            ("PreflightingApplication", InstallPhase::PreflightingApplication),
            ("VerifyingApplication", InstallPhase::VerifyingApplication),
            ("CreatingContainer", InstallPhase::CreatingContainer),
            ("InstallingApplication", InstallPhase::InstallingApplication),
            ("PostflightingApplication", InstallPhase::PostflightingApplication),
            ("SandboxingApplication", InstallPhase::SandboxingApplication),
            ("GeneratingApplicationMap", InstallPhase::GeneratingApplicationMap),
            ("InstallComplete", InstallPhase::InstallComplete),
        ];

        for (status, phase) in table {
            let payload = StatusPayload::new()
                .with(KEY_STATUS, status)
                .with(KEY_PERCENT_COMPLETE, 55i64);
            assert_eq!(
                InstallPhase::decode(&payload),
                Some(ProgressStatus::new(55, phase))
            );
        }
    }

    #[test]
    fn test_mount_percent_is_derived_from_phase() {
        // Reported percentages are ignored outside the copy phase
        let with_percent = |status: &str| {
            StatusPayload::new()
                .with(KEY_STATUS, status)
                .with(KEY_PERCENT_COMPLETE, 42i64)
        };

        assert_eq!(
            MountPhase::decode(&with_percent("LookingUpImage")).unwrap().percent_complete,
            0
        );
        assert_eq!(
            MountPhase::decode(&with_percent("StreamingImage")).unwrap().percent_complete,
            1
        );
        assert_eq!(
            MountPhase::decode(&with_percent("MountingImage")).unwrap().percent_complete,
            100
        );

        let copying = MountPhase::decode(&copying_file_payload()).unwrap();
        assert_eq!(copying.percent_complete, 0);
        assert_eq!(copying.phase, MountPhase::CopyingFile(expected_copy_progress()));

        let copying = copying_file_payload().with(KEY_PERCENT_COMPLETE, 73i64);
        assert_eq!(MountPhase::decode(&copying).unwrap().percent_complete, 73);
    }

    #[test]
    fn test_out_of_range_percent_is_clamped() {
        let payload = StatusPayload::new()
            .with(KEY_STATUS, "TransferringPackage")
            .with(KEY_PERCENT_COMPLETE, 180i64);
        assert_eq!(TransferPhase::decode(&payload).unwrap().percent_complete, 100);

        let payload = payload.with(KEY_PERCENT_COMPLETE, -5i64);
        assert_eq!(TransferPhase::decode(&payload).unwrap().percent_complete, 0);
    }

    #[test]
    fn test_decode_is_idempotent() {
        let payloads = [
            copying_file_payload(),
            StatusPayload::new().with(KEY_STATUS, "StreamingImage"),
            StatusPayload::new().with(KEY_STATUS, "Bogus"),
        ];

        for payload in &payloads {
            for kind in [OperationKind::Transfer, OperationKind::Install, OperationKind::Mount] {
                assert_eq!(decode(payload, kind), decode(payload, kind));
            }
        }
    }

    #[test]
    fn test_operation_status_accessors() {
        let status = decode(&copying_file_payload(), OperationKind::Mount).unwrap();
        assert_eq!(status.kind(), OperationKind::Mount);
        assert_eq!(status.percent_complete(), 0);
    }
}
