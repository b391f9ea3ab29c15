//! Subcommand implementations, generic over the device backend.

// Only the macOS binary dispatches here; elsewhere the tests do.
#![cfg_attr(not(target_os = "macos"), allow(dead_code))]

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use futures::StreamExt;
use mdk_core::{AppInstallable, AppTransferrable, DeviceDiscovery, MobileDeviceBackend};
use tracing::{debug, info};

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(arg: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (arg.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(&rest[1..]),
        _ => PathBuf::from(arg),
    }
}

pub fn parse_path(arg: &str) -> Result<PathBuf, String> {
    if arg.is_empty() {
        return Err("path must not be empty".to_string());
    }
    Ok(expand_tilde(arg))
}

/// Print a numbered snapshot of the attached devices.
pub fn list<B: MobileDeviceBackend>(
    discovery: &DeviceDiscovery<B>,
    out: &mut impl Write,
) -> Result<()> {
    let devices = discovery.list_devices();

    for (index, device) in devices.iter().enumerate() {
        writeln!(out, "{}) {}", index + 1, device)?;
    }
    if !devices.is_empty() {
        writeln!(out)?;
    }
    writeln!(out, "{} device(s) connected", devices.len())?;
    Ok(())
}

/// Print attach/detach events until the stream ends or `shutdown` resolves.
pub async fn observe<B: MobileDeviceBackend>(
    discovery: &DeviceDiscovery<B>,
    out: &mut impl Write,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let mut events = discovery.device_events();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    let timestamp = Local::now().format("%-m/%-d/%Y, %-I:%M:%S %p");
                    writeln!(out, "[{timestamp}] {event}")?;
                    out.flush()?;
                }
                None => {
                    info!("Device event stream ended");
                    break;
                }
            },
            _ = &mut shutdown => {
                debug!("Stopped observing device events");
                break;
            }
        }
    }
    Ok(())
}

/// Transfer then install `bundle`, printing progress.
///
/// Transfer progress repeats the same phase many times, so only changes are
/// printed; every install phase is printed.
pub async fn deploy<T: AppTransferrable + AppInstallable>(
    target: &T,
    bundle: &Path,
    out: &mut impl Write,
) -> Result<()> {
    let mut transfer = target.transfer_app(bundle);
    let mut last_phase = String::new();
    while let Some(status) = transfer.next().await {
        let phase = status?.phase.to_string();
        if phase != last_phase {
            writeln!(out, "{phase}")?;
        }
        last_phase = phase;
    }

    let mut install = target.install_app(bundle);
    while let Some(status) = install.next().await {
        writeln!(out, "{}", status?.phase)?;
    }
    Ok(())
}

/// Install `bundle` on the device with identifier `device_id`.
pub async fn install<B: MobileDeviceBackend>(
    discovery: &DeviceDiscovery<B>,
    bundle: &Path,
    device_id: &str,
    out: &mut impl Write,
) -> Result<()> {
    let device = discovery.find_device(device_id)?;
    info!(device = %device.id(), bundle = %bundle.display(), "Installing");

    let session = device.open_session()?;
    let deployed = deploy(&device, bundle, out).await;
    let closed = session.close();

    deployed?;
    closed?;
    Ok(())
}

/// Mount a developer disk image, falling back to the configured paths.
///
/// Without an explicit or configured signature, `<image>.signature` is used.
pub async fn mount_image<B: MobileDeviceBackend>(
    discovery: &DeviceDiscovery<B>,
    device_id: &str,
    image: Option<PathBuf>,
    signature: Option<PathBuf>,
    out: &mut impl Write,
) -> Result<()> {
    let config = discovery.config();
    let image = image
        .or_else(|| config.developer_disk_image.clone())
        .context("No developer disk image given and none configured")?;
    let signature = signature
        .or_else(|| config.developer_disk_image_signature.clone())
        .unwrap_or_else(|| {
            let mut path = image.clone().into_os_string();
            path.push(".signature");
            PathBuf::from(path)
        });

    let device = discovery.find_device(device_id)?;
    info!(device = %device.id(), image = %image.display(), signature = %signature.display(), "Mounting");

    let session = device.open_session()?;
    let mut mount = device.mount_developer_disk_image(&image, &signature);
    let mut mounted = Ok(());
    while let Some(status) = mount.next().await {
        match status {
            Ok(status) => writeln!(out, "[{:>3}%] {}", status.percent_complete, status.phase)?,
            Err(e) => {
                mounted = Err(e);
                break;
            }
        }
    }
    let closed = session.close();

    mounted.with_context(|| format!("Failed to mount {}", image.display()))?;
    closed?;
    Ok(())
}
