//! libusb binding for the hold backend
//!
//! Matches devices by VID/PID through `rusb`, authorizes them through sysfs
//! and captures them by detaching kernel drivers and claiming every interface
//! of the active configuration.

use crate::config::CaptureSettings;
use crate::usb::backend::{BackendError, UsbBackend};
use common::DeviceIdentifier;
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::path::PathBuf;
use tracing::{debug, info, warn};

const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";

/// Matched physical device
pub struct MatchedDevice {
    device: Device<Context>,
    id: DeviceIdentifier,
}

impl MatchedDevice {
    pub fn id(&self) -> DeviceIdentifier {
        self.id
    }

    pub fn bus_number(&self) -> u8 {
        self.device.bus_number()
    }

    pub fn device_address(&self) -> u8 {
        self.device.address()
    }

    /// sysfs directory of the device, e.g. `/sys/bus/usb/devices/1-1.4`
    ///
    /// Root hubs have no port path and return None.
    fn sysfs_path(&self) -> Option<PathBuf> {
        let ports = self.device.port_numbers().ok()?;
        if ports.is_empty() {
            return None;
        }

        let port_path = ports
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".");

        let name = format!("{}-{}", self.bus_number(), port_path);
        Some(PathBuf::from(SYSFS_USB_DEVICES).join(name))
    }
}

/// Exclusive hold on an opened device
pub struct CapturedDevice {
    handle: DeviceHandle<Context>,
    id: DeviceIdentifier,
    /// Interfaces claimed by us
    claimed_interfaces: Vec<u8>,
    /// Interfaces whose kernel driver we detached
    detached_interfaces: Vec<u8>,
}

impl CapturedDevice {
    pub fn claimed_interfaces(&self) -> &[u8] {
        &self.claimed_interfaces
    }
}

/// Summary of a connected device for `--list-devices`
#[derive(Debug, Clone)]
pub struct DeviceSummary {
    pub id: DeviceIdentifier,
    pub bus_number: u8,
    pub device_address: u8,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// Backend using libusb through `rusb`
pub struct RusbBackend {
    context: Context,
    detach_kernel_driver: bool,
    authorize_sysfs: bool,
}

impl RusbBackend {
    pub fn new(settings: &CaptureSettings) -> Result<Self, BackendError> {
        let context = Context::new()?;

        Ok(Self {
            context,
            detach_kernel_driver: settings.detach_kernel_driver,
            authorize_sysfs: settings.authorize_sysfs,
        })
    }

    /// List all connected devices
    pub fn list_devices(&self) -> Result<Vec<DeviceSummary>, BackendError> {
        let devices = self.context.devices()?;
        let mut summaries = Vec::new();

        for device in devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    debug!(
                        "Skipping device bus={} addr={}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };

            // Strings need an open handle; unreadable ones are left empty
            let (manufacturer, product) = match device.open() {
                Ok(handle) => (
                    handle.read_manufacturer_string_ascii(&desc).ok(),
                    handle.read_product_string_ascii(&desc).ok(),
                ),
                Err(_) => (None, None),
            };

            summaries.push(DeviceSummary {
                id: DeviceIdentifier::new(desc.vendor_id(), desc.product_id()),
                bus_number: device.bus_number(),
                device_address: device.address(),
                manufacturer,
                product,
            });
        }

        Ok(summaries)
    }

    fn authorize_via_sysfs(&self, service: &MatchedDevice) -> Result<(), BackendError> {
        let Some(dir) = service.sysfs_path() else {
            debug!("No sysfs port path for {}, skipping authorization", service.id);
            return Ok(());
        };
        let attr = dir.join("authorized");

        let current = std::fs::read_to_string(&attr)?;
        if current.trim() == "1" {
            debug!("Device {} already authorized", service.id);
            return Ok(());
        }

        std::fs::write(&attr, "1")?;
        info!("Authorized device {} via {}", service.id, attr.display());
        Ok(())
    }
}

impl UsbBackend for RusbBackend {
    type Service = MatchedDevice;
    type Capture = CapturedDevice;

    fn match_service(&self, id: DeviceIdentifier) -> Option<MatchedDevice> {
        let devices = match self.context.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to enumerate USB devices: {}", e);
                return None;
            }
        };

        let device = devices.iter().find(|device| {
            device
                .device_descriptor()
                .map(|desc| id.matches(desc.vendor_id(), desc.product_id()))
                .unwrap_or(false)
        })?;

        debug!(
            "Matched {} at bus={}, addr={}",
            id,
            device.bus_number(),
            device.address()
        );

        Some(MatchedDevice { device, id })
    }

    fn authorize(&self, service: &MatchedDevice) -> Result<(), BackendError> {
        if !self.authorize_sysfs || !cfg!(target_os = "linux") {
            return Ok(());
        }
        self.authorize_via_sysfs(service)
    }

    fn capture_exclusive(&self, service: &MatchedDevice) -> Result<CapturedDevice, BackendError> {
        let handle = service.device.open()?;
        debug!("Opened device {}", service.id);

        let config = service.device.active_config_descriptor()?;

        let mut captured = CapturedDevice {
            handle,
            id: service.id,
            claimed_interfaces: Vec::new(),
            detached_interfaces: Vec::new(),
        };

        for interface in config.interfaces() {
            let number = interface.number();

            if self.detach_kernel_driver {
                match captured.handle.kernel_driver_active(number) {
                    Ok(true) => {
                        debug!(
                            "Detaching kernel driver from interface {} on {}",
                            number, service.id
                        );
                        match captured.handle.detach_kernel_driver(number) {
                            Ok(()) => captured.detached_interfaces.push(number),
                            // Claiming below reports the real failure
                            Err(e) => warn!(
                                "Failed to detach kernel driver from interface {}: {}",
                                number, e
                            ),
                        }
                    }
                    Ok(false) => {
                        debug!("No kernel driver active on interface {}", number);
                    }
                    Err(e) => {
                        debug!(
                            "Could not check kernel driver status for interface {}: {}",
                            number, e
                        );
                    }
                }
            }

            if let Err(e) = captured.handle.claim_interface(number) {
                warn!("Failed to claim interface {} on {}: {}", number, service.id, e);
                // Undo what we already did so the device returns to the kernel
                if let Err(cleanup) = release_interfaces(&mut captured) {
                    debug!("Cleanup after failed claim on {}: {}", service.id, cleanup);
                }
                return Err(e.into());
            }

            debug!("Claimed interface {} on {}", number, service.id);
            captured.claimed_interfaces.push(number);
        }

        Ok(captured)
    }

    fn reset(&self, capture: &mut CapturedDevice) -> Result<(), BackendError> {
        capture.handle.reset()?;
        debug!("Reset device {}", capture.id);
        Ok(())
    }

    fn release_capture(&self, mut capture: CapturedDevice) -> Result<(), BackendError> {
        let result = release_interfaces(&mut capture);
        debug!("Closed device {}", capture.id);
        result
    }

    fn release_service(&self, service: MatchedDevice) {
        debug!(
            "Released device reference {} (bus={}, addr={})",
            service.id,
            service.bus_number(),
            service.device_address()
        );
    }
}

/// Release claimed interfaces and reattach detached kernel drivers
///
/// Every interface is attempted; the last failure is returned.
fn release_interfaces(capture: &mut CapturedDevice) -> Result<(), BackendError> {
    let mut result = Ok(());

    for interface in capture.claimed_interfaces.drain(..) {
        if let Err(e) = capture.handle.release_interface(interface) {
            // NoDevice is expected after a reset re-enumerated the device
            if e != rusb::Error::NoDevice {
                warn!("Failed to release interface {}: {}", interface, e);
                result = Err(e.into());
            }
        }
    }

    for interface in capture.detached_interfaces.drain(..) {
        match capture.handle.attach_kernel_driver(interface) {
            Ok(()) => debug!(
                "Reattached kernel driver to interface {} on {}",
                interface, capture.id
            ),
            Err(e) => debug!(
                "Could not reattach kernel driver to interface {}: {}",
                interface, e
            ),
        }
    }

    result
}
