//! MobileDevice.framework backend (macOS only).
//!
//! Key framework behaviour:
//! - devices are CoreFoundation objects; handles retain them
//! - progress callbacks fire synchronously on the calling thread before the
//!   operation returns, so the callback context can live on the stack
//! - notifications are delivered through a run loop, serviced here by a
//!   dedicated thread per registration

use std::ffi::c_void;
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_foundation::array::{CFArray, CFArrayRef};
use core_foundation::base::{CFRelease, CFType, CFTypeRef, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::data::CFData;
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::number::CFNumber;
use core_foundation::runloop::{CFRunLoop, CFRunLoopRunResult, kCFRunLoopDefaultMode};
use core_foundation::string::{CFString, CFStringRef};
use core_foundation::url::{CFURL, CFURLRef};
use tracing::{debug, instrument, warn};

use super::traits::{
    DeviceNotification, InterfaceFilter, MobileDeviceBackend, NotificationCallback,
    StatusCallback,
};
use crate::device::DeviceInterface;
use crate::error::BackendError;
use crate::install::PackageType;
use crate::status::{PayloadValue, StatusPayload};

type AMDError = i32;

const AMD_SUCCESS: AMDError = 0;

const AMDEVICE_CONNECTED: u32 = 1;
const AMDEVICE_DISCONNECTED: u32 = 2;
const AMDEVICE_UNSUBSCRIBED: u32 = 3;

const INTERFACE_ANY: u32 = 0;
const INTERFACE_WIRED: u32 = 1;
const INTERFACE_WIRELESS: u32 = 2;

const PACKAGE_TYPE_KEY: &str = "PackageType";
const IMAGE_TYPE_KEY: &str = "ImageType";
const IMAGE_TYPE_DEVELOPER: &str = "Developer";
const IMAGE_SIGNATURE_KEY: &str = "ImageSignature";

/// Run loop slice between checks of the stop flag.
const RUN_LOOP_SLICE: Duration = Duration::from_millis(250);

#[repr(C)]
struct AMDevice {
    _private: [u8; 0],
}

type AMDeviceRef = *mut AMDevice;
type AMDeviceNotificationRef = *mut c_void;
type AMDServiceConnectionRef = *mut c_void;

#[repr(C)]
struct AMDeviceNotificationInfo {
    device: AMDeviceRef,
    event: u32,
}

type AMDeviceInstallationCallback = extern "C" fn(status: CFDictionaryRef, context: *mut c_void);
type AMDeviceNotificationCallback =
    extern "C" fn(info: *mut AMDeviceNotificationInfo, context: *mut c_void);

#[link(name = "MobileDevice", kind = "framework")]
unsafe extern "C" {
    fn AMDCopyErrorText(error: AMDError) -> CFStringRef;
    fn AMDCreateDeviceList() -> CFArrayRef;
    fn AMDeviceConnect(device: AMDeviceRef) -> AMDError;
    fn AMDeviceDisconnect(device: AMDeviceRef) -> AMDError;
    fn AMDeviceStartSession(device: AMDeviceRef) -> AMDError;
    fn AMDeviceStopSession(device: AMDeviceRef) -> AMDError;
    fn AMDeviceCopyDeviceIdentifier(device: AMDeviceRef) -> CFStringRef;
    fn AMDeviceCopyValue(device: AMDeviceRef, domain: CFStringRef, key: CFStringRef) -> CFTypeRef;
    fn AMDeviceGetInterfaceType(device: AMDeviceRef) -> u32;
    fn AMDeviceCopyDeveloperModeStatus(device: AMDeviceRef, error: *mut AMDError) -> bool;
    fn AMDeviceNotificationSubscribeWithOptions(
        callback: AMDeviceNotificationCallback,
        unknown: u32,
        interface_type: u32,
        context: *mut c_void,
        notification: *mut AMDeviceNotificationRef,
        options: CFDictionaryRef,
    ) -> AMDError;
    fn AMDeviceNotificationUnsubscribe(notification: AMDeviceNotificationRef) -> AMDError;
    fn AMDeviceSecureStartService(
        device: AMDeviceRef,
        service_name: CFStringRef,
        options: CFDictionaryRef,
        service_connection: *mut AMDServiceConnectionRef,
    ) -> AMDError;
    fn AMDeviceSecureTransferPath(
        afc_connection: *mut c_void,
        device: AMDeviceRef,
        bundle_url: CFURLRef,
        options: CFDictionaryRef,
        callback: AMDeviceInstallationCallback,
        context: *mut c_void,
    ) -> AMDError;
    fn AMDeviceSecureInstallApplication(
        service_connection: AMDServiceConnectionRef,
        device: AMDeviceRef,
        bundle_url: CFURLRef,
        options: CFDictionaryRef,
        callback: AMDeviceInstallationCallback,
        context: *mut c_void,
    ) -> AMDError;
    fn AMDeviceMountImage(
        device: AMDeviceRef,
        image_path: CFStringRef,
        options: CFDictionaryRef,
        callback: AMDeviceInstallationCallback,
        context: *mut c_void,
    ) -> AMDError;
}

/// Retained reference to an `AMDevice`.
#[derive(Debug, Clone)]
pub struct DeviceRef(CFType);

// AMDevice objects are reference counted CF objects that the framework
// itself hands across threads.
unsafe impl Send for DeviceRef {}
unsafe impl Sync for DeviceRef {}

impl DeviceRef {
    /// Retain a device reference borrowed from the framework.
    unsafe fn retain(device: AMDeviceRef) -> Self {
        Self(unsafe { CFType::wrap_under_get_rule(device as CFTypeRef) })
    }

    fn as_ptr(&self) -> AMDeviceRef {
        self.0.as_CFTypeRef() as AMDeviceRef
    }
}

/// Live notification registration and the thread servicing it.
pub struct FrameworkSubscription {
    notification: usize,
    context: usize,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Backend bound to the system MobileDevice framework.
#[derive(Debug, Default, Clone, Copy)]
pub struct MobileDeviceFramework;

impl MobileDeviceFramework {
    pub fn new() -> Self {
        Self
    }
}

fn backend_error(code: AMDError) -> BackendError {
    let text = unsafe { AMDCopyErrorText(code) };
    let message = if text.is_null() {
        format!("MobileDevice error 0x{:08X}", code)
    } else {
        unsafe { CFString::wrap_under_create_rule(text) }.to_string()
    };
    BackendError::new(code, message)
}

fn check(code: AMDError) -> Result<(), BackendError> {
    if code == AMD_SUCCESS {
        Ok(())
    } else {
        Err(backend_error(code))
    }
}

fn payload_value(value: &CFType) -> Option<PayloadValue> {
    if let Some(s) = value.downcast::<CFString>() {
        return Some(PayloadValue::String(s.to_string()));
    }
    if let Some(n) = value.downcast::<CFNumber>() {
        return n.to_i64().map(PayloadValue::Integer);
    }
    if let Some(b) = value.downcast::<CFBoolean>() {
        return Some(PayloadValue::Boolean(b.into()));
    }
    if let Some(d) = value.downcast::<CFData>() {
        return Some(PayloadValue::Data(d.bytes().to_vec()));
    }
    None
}

/// Copy a vendor status dictionary into a [`StatusPayload`].
fn payload_from_dictionary(status: CFDictionaryRef) -> Option<StatusPayload> {
    if status.is_null() {
        return None;
    }
    let dictionary: CFDictionary<CFType, CFType> =
        unsafe { CFDictionary::wrap_under_get_rule(status) };
    let (keys, values) = dictionary.get_keys_and_values();

    let mut payload = StatusPayload::new();
    for (key, value) in keys.into_iter().zip(values) {
        let key = unsafe { CFType::wrap_under_get_rule(key as CFTypeRef) };
        let value = unsafe { CFType::wrap_under_get_rule(value as CFTypeRef) };
        if let (Some(key), Some(value)) = (key.downcast::<CFString>(), payload_value(&value)) {
            payload.insert(key.to_string(), value);
        }
    }
    Some(payload)
}

extern "C" fn status_trampoline(status: CFDictionaryRef, context: *mut c_void) {
    if context.is_null() {
        return;
    }
    let callback = unsafe { &*(context as *const StatusCallback) };
    if let Some(payload) = payload_from_dictionary(status) {
        callback(payload);
    }
}

extern "C" fn notification_trampoline(info: *mut AMDeviceNotificationInfo, context: *mut c_void) {
    if info.is_null() || context.is_null() {
        return;
    }
    let callback = unsafe { &*(context as *const NotificationCallback<DeviceRef>) };
    let info = unsafe { &*info };

    let notification = match info.event {
        AMDEVICE_CONNECTED if !info.device.is_null() => {
            DeviceNotification::Connected(unsafe { DeviceRef::retain(info.device) })
        }
        AMDEVICE_DISCONNECTED if !info.device.is_null() => {
            DeviceNotification::Disconnected(unsafe { DeviceRef::retain(info.device) })
        }
        AMDEVICE_UNSUBSCRIBED => DeviceNotification::Unsubscribed,
        other => {
            debug!(event = other, "Ignoring device notification");
            return;
        }
    };
    callback(notification);
}

fn package_options(package_type: PackageType) -> CFDictionary<CFType, CFType> {
    CFDictionary::from_CFType_pairs(&[(
        CFString::new(PACKAGE_TYPE_KEY).as_CFType(),
        CFString::new(package_type.as_vendor_str()).as_CFType(),
    )])
}

fn bundle_url(bundle: &Path) -> Result<CFURL, BackendError> {
    CFURL::from_path(bundle, bundle.is_dir()).ok_or_else(|| {
        BackendError::new(-1, format!("Invalid bundle path {}", bundle.display()))
    })
}

fn callback_context(callback: &StatusCallback) -> *mut c_void {
    callback as *const StatusCallback as *mut c_void
}

impl MobileDeviceBackend for MobileDeviceFramework {
    type Handle = DeviceRef;
    type Subscription = FrameworkSubscription;

    fn device_list(&self) -> Vec<DeviceRef> {
        let list = unsafe { AMDCreateDeviceList() };
        if list.is_null() {
            warn!("AMDCreateDeviceList returned no list");
            return Vec::new();
        }
        let array: CFArray<CFType> = unsafe { CFArray::wrap_under_create_rule(list) };
        array.iter().map(|item| DeviceRef((*item).clone())).collect()
    }

    fn device_identifier(&self, device: &DeviceRef) -> Option<String> {
        let identifier = unsafe { AMDeviceCopyDeviceIdentifier(device.as_ptr()) };
        if identifier.is_null() {
            return None;
        }
        Some(unsafe { CFString::wrap_under_create_rule(identifier) }.to_string())
    }

    fn copy_value(&self, device: &DeviceRef, key: &str) -> Option<String> {
        let key = CFString::new(key);
        let value =
            unsafe { AMDeviceCopyValue(device.as_ptr(), ptr::null(), key.as_concrete_TypeRef()) };
        if value.is_null() {
            return None;
        }
        let value = unsafe { CFType::wrap_under_create_rule(value) };
        value.downcast::<CFString>().map(|s| s.to_string())
    }

    fn interface_type(&self, device: &DeviceRef) -> Option<DeviceInterface> {
        match unsafe { AMDeviceGetInterfaceType(device.as_ptr()) } {
            INTERFACE_WIRED => Some(DeviceInterface::Wired),
            INTERFACE_WIRELESS => Some(DeviceInterface::Wireless),
            _ => None,
        }
    }

    fn developer_mode_status(&self, device: &DeviceRef) -> Result<bool, BackendError> {
        let mut error: AMDError = AMD_SUCCESS;
        let enabled = unsafe { AMDeviceCopyDeveloperModeStatus(device.as_ptr(), &mut error) };
        check(error)?;
        Ok(enabled)
    }

    #[instrument(level = "debug", skip(self))]
    fn connect(&self, device: &DeviceRef) -> Result<(), BackendError> {
        check(unsafe { AMDeviceConnect(device.as_ptr()) })
    }

    #[instrument(level = "debug", skip(self))]
    fn disconnect(&self, device: &DeviceRef) -> Result<(), BackendError> {
        check(unsafe { AMDeviceDisconnect(device.as_ptr()) })
    }

    #[instrument(level = "debug", skip(self))]
    fn start_session(&self, device: &DeviceRef) -> Result<(), BackendError> {
        check(unsafe { AMDeviceStartSession(device.as_ptr()) })
    }

    #[instrument(level = "debug", skip(self))]
    fn stop_session(&self, device: &DeviceRef) -> Result<(), BackendError> {
        check(unsafe { AMDeviceStopSession(device.as_ptr()) })
    }

    #[instrument(level = "debug", skip(self))]
    fn start_service(&self, device: &DeviceRef, service_name: &str) -> Result<(), BackendError> {
        let name = CFString::new(service_name);
        let mut connection: AMDServiceConnectionRef = ptr::null_mut();
        check(unsafe {
            AMDeviceSecureStartService(
                device.as_ptr(),
                name.as_concrete_TypeRef(),
                ptr::null(),
                &mut connection,
            )
        })?;
        // Starting the service is what the installer needs; the connection
        // itself is not used.
        if !connection.is_null() {
            unsafe { CFRelease(connection as CFTypeRef) };
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self, callback))]
    fn transfer_path(
        &self,
        device: &DeviceRef,
        bundle: &Path,
        package_type: PackageType,
        callback: StatusCallback,
    ) -> Result<(), BackendError> {
        let url = bundle_url(bundle)?;
        let options = package_options(package_type);
        check(unsafe {
            AMDeviceSecureTransferPath(
                ptr::null_mut(),
                device.as_ptr(),
                url.as_concrete_TypeRef(),
                options.as_concrete_TypeRef(),
                status_trampoline,
                callback_context(&callback),
            )
        })
    }

    #[instrument(level = "debug", skip(self, callback))]
    fn install_application(
        &self,
        device: &DeviceRef,
        bundle: &Path,
        package_type: PackageType,
        callback: StatusCallback,
    ) -> Result<(), BackendError> {
        let url = bundle_url(bundle)?;
        let options = package_options(package_type);
        check(unsafe {
            AMDeviceSecureInstallApplication(
                ptr::null_mut(),
                device.as_ptr(),
                url.as_concrete_TypeRef(),
                options.as_concrete_TypeRef(),
                status_trampoline,
                callback_context(&callback),
            )
        })
    }

    #[instrument(level = "debug", skip(self, signature, callback), fields(signature_len = signature.len()))]
    fn mount_image(
        &self,
        device: &DeviceRef,
        image: &Path,
        signature: &[u8],
        callback: StatusCallback,
    ) -> Result<(), BackendError> {
        let path = CFString::new(&image.to_string_lossy());
        let options = CFDictionary::from_CFType_pairs(&[
            (
                CFString::new(IMAGE_TYPE_KEY).as_CFType(),
                CFString::new(IMAGE_TYPE_DEVELOPER).as_CFType(),
            ),
            (
                CFString::new(IMAGE_SIGNATURE_KEY).as_CFType(),
                CFData::from_buffer(signature).as_CFType(),
            ),
        ]);
        check(unsafe {
            AMDeviceMountImage(
                device.as_ptr(),
                path.as_concrete_TypeRef(),
                options.as_concrete_TypeRef(),
                status_trampoline,
                callback_context(&callback),
            )
        })
    }

    fn subscribe(
        &self,
        interface: InterfaceFilter,
        callback: NotificationCallback<DeviceRef>,
    ) -> Result<FrameworkSubscription, BackendError> {
        let interface_type = match interface {
            InterfaceFilter::Any => INTERFACE_ANY,
            InterfaceFilter::Wired => INTERFACE_WIRED,
            InterfaceFilter::Wireless => INTERFACE_WIRELESS,
        };
        // Freed in `unsubscribe` once the delivery thread has stopped.
        let context = Box::into_raw(Box::new(callback)) as usize;
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_stop = stop.clone();
        let spawned = thread::Builder::new()
            .name("mobiledevice-notifications".into())
            .spawn(move || {
                let mut notification: AMDeviceNotificationRef = ptr::null_mut();
                let code = unsafe {
                    AMDeviceNotificationSubscribeWithOptions(
                        notification_trampoline,
                        0,
                        interface_type,
                        context as *mut c_void,
                        &mut notification,
                        ptr::null(),
                    )
                };
                let subscribed = code == AMD_SUCCESS;
                let _ = ready_tx.send((code, notification as usize));
                if !subscribed {
                    return;
                }

                while !thread_stop.load(Ordering::Acquire) {
                    let result = CFRunLoop::run_in_mode(
                        unsafe { kCFRunLoopDefaultMode },
                        RUN_LOOP_SLICE,
                        false,
                    );
                    if result == CFRunLoopRunResult::Finished {
                        // No sources attached yet.
                        thread::sleep(RUN_LOOP_SLICE);
                    }
                }
            });

        let free_context = || unsafe {
            drop(Box::from_raw(context as *mut NotificationCallback<DeviceRef>));
        };

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                free_context();
                return Err(BackendError::new(-1, format!("Failed to spawn notification thread: {e}")));
            }
        };

        let (code, notification) = match ready_rx.recv() {
            Ok(ready) => ready,
            Err(_) => {
                let _ = thread.join();
                free_context();
                return Err(BackendError::new(-1, "Notification thread exited early"));
            }
        };

        if code != AMD_SUCCESS {
            let _ = thread.join();
            free_context();
            return Err(backend_error(code));
        }

        debug!("Device notifications subscribed");
        Ok(FrameworkSubscription {
            notification,
            context,
            stop,
            thread: Some(thread),
        })
    }

    fn unsubscribe(&self, mut subscription: FrameworkSubscription) -> Result<(), BackendError> {
        let result = check(unsafe {
            AMDeviceNotificationUnsubscribe(subscription.notification as AMDeviceNotificationRef)
        });

        subscription.stop.store(true, Ordering::Release);
        if let Some(thread) = subscription.thread.take()
            && thread.join().is_err()
        {
            warn!("Notification thread panicked");
        }
        unsafe {
            drop(Box::from_raw(
                subscription.context as *mut NotificationCallback<DeviceRef>,
            ));
        }

        debug!("Device notifications unsubscribed");
        result
    }
}
