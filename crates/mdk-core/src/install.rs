//! Application transfer, installation and developer disk image mounting.

use std::fs;
use std::path::Path;

use tracing::{debug, info, instrument};

use crate::backend::MobileDeviceBackend;
use crate::device::Device;
use crate::error::DeviceError;
use crate::operation::{OperationStream, spawn_operation};
use crate::service::Service;
use crate::status::{InstallPhase, MountPhase, TransferPhase};

/// Package type option passed along with a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageType {
    /// An unpacked `.app` bundle.
    Developer,
    /// An `.ipa` archive.
    Customer,
}

impl PackageType {
    /// Resolve the package type from the bundle's extension.
    pub fn from_path(path: &Path) -> Result<Self, DeviceError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("app") => Ok(PackageType::Developer),
            Some("ipa") => Ok(PackageType::Customer),
            _ => Err(DeviceError::InvalidPackageType {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn as_vendor_str(&self) -> &'static str {
        match self {
            PackageType::Developer => "Developer",
            PackageType::Customer => "Customer",
        }
    }
}

/// Something that can copy an application bundle onto a device.
pub trait AppTransferrable {
    fn transfer_app(&self, bundle: &Path) -> OperationStream<TransferPhase>;
}

/// Something that can install a transferred application bundle.
pub trait AppInstallable {
    fn install_app(&self, bundle: &Path) -> OperationStream<InstallPhase>;
}

impl<B: MobileDeviceBackend> AppTransferrable for Device<B> {
    /// Requires an active session.
    #[instrument(skip(self, bundle), fields(device = %self.id(), bundle = %bundle.display()))]
    fn transfer_app(&self, bundle: &Path) -> OperationStream<TransferPhase> {
        let package_type = match PackageType::from_path(bundle) {
            Ok(package_type) => package_type,
            Err(e) => return OperationStream::failed(e),
        };
        if let Err(e) = self.require_session("transfer an app") {
            return OperationStream::failed(e);
        }

        info!(package_type = package_type.as_vendor_str(), "Transferring app");
        let backend = self.backend().clone();
        let handle = self.handle().clone();
        let bundle = bundle.to_path_buf();
        spawn_operation(move |callback| {
            backend
                .transfer_path(&handle, &bundle, package_type, callback)
                .map_err(|e| DeviceError::TransferFailure { message: e.message })
        })
    }
}

impl<B: MobileDeviceBackend> AppInstallable for Device<B> {
    /// Starts the file conduit service, then installs. Requires an active
    /// session and a bundle already transferred with
    /// [`transfer_app`](AppTransferrable::transfer_app).
    #[instrument(skip(self, bundle), fields(device = %self.id(), bundle = %bundle.display()))]
    fn install_app(&self, bundle: &Path) -> OperationStream<InstallPhase> {
        let package_type = match PackageType::from_path(bundle) {
            Ok(package_type) => package_type,
            Err(e) => return OperationStream::failed(e),
        };
        if let Err(e) = self.require_session("install an app") {
            return OperationStream::failed(e);
        }

        info!(package_type = package_type.as_vendor_str(), "Installing app");
        let backend = self.backend().clone();
        let handle = self.handle().clone();
        let bundle = bundle.to_path_buf();
        spawn_operation(move |callback| {
            let service = Service::AppleFileConduit;
            backend
                .start_service(&handle, service.name())
                .map_err(|e| DeviceError::ServiceStartFailure {
                    service: service.name().to_string(),
                    message: e.message,
                })?;
            debug!(service = %service, "Service started");

            backend
                .install_application(&handle, &bundle, package_type, callback)
                .map_err(|e| DeviceError::InstallFailure { message: e.message })
        })
    }
}

impl<B: MobileDeviceBackend> Device<B> {
    /// Mount a developer disk image, authenticated by its detached signature
    /// file. Requires an active session.
    #[instrument(skip(self, image, signature), fields(device = %self.id(), image = %image.display()))]
    pub fn mount_developer_disk_image(
        &self,
        image: &Path,
        signature: &Path,
    ) -> OperationStream<MountPhase> {
        let signature_bytes = match fs::read(signature) {
            Ok(bytes) => bytes,
            Err(source) => {
                return OperationStream::failed(DeviceError::DiskImageSignatureLoadFailure {
                    path: signature.to_path_buf(),
                    source,
                });
            }
        };
        if let Err(e) = self.require_session("mount a disk image") {
            return OperationStream::failed(e);
        }

        info!(signature_len = signature_bytes.len(), "Mounting developer disk image");
        let backend = self.backend().clone();
        let handle = self.handle().clone();
        let image = image.to_path_buf();
        spawn_operation(move |callback| {
            backend
                .mount_image(&handle, &image, &signature_bytes, callback)
                .map_err(|e| DeviceError::DiskImageMountFailure { message: e.message })
        })
    }
}
