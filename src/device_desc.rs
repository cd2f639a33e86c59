//! Device descriptor / string reads and the human summary line used for
//! both console and JSON output.

use nusb::Device;

use crate::descriptor::PowerSwitchingMode;

const CLASS_HUB: u8 = 0x09;
const CLASS_PER_INTERFACE: u8 = 0x00;
const CLASS_AUDIO: u8 = 0x01;
const CLASS_COMM: u8 = 0x02;
const CLASS_HID: u8 = 0x03;
const CLASS_PHYSICAL: u8 = 0x05;
const CLASS_IMAGE: u8 = 0x06;
const CLASS_PRINTER: u8 = 0x07;
const CLASS_MASS_STORAGE: u8 = 0x08;
const CLASS_DATA: u8 = 0x0a;
const CLASS_SMART_CARD: u8 = 0x0b;
const CLASS_CONTENT_SECURITY: u8 = 0x0d;
const CLASS_VIDEO: u8 = 0x0e;
const CLASS_PERSONAL_HEALTHCARE: u8 = 0x0f;
const CLASS_DIAGNOSTIC_DEVICE: u8 = 0xdc;
const CLASS_WIRELESS: u8 = 0xe0;
const CLASS_APPLICATION: u8 = 0xfe;
const CLASS_VENDOR_SPEC: u8 = 0xff;

/// Information about an attached device that feeds both the text status
/// line and the JSON port-with-device shape.
#[derive(Clone, Debug, Default)]
pub struct DeviceSummary {
    /// `idVendor`.
    pub vendor_id: u16,
    /// `idProduct`.
    pub product_id: u16,
    /// `bDeviceClass`.
    pub device_class: u8,
    /// Representative class name (resolved per-interface for class 0).
    pub class_name: String,
    /// `bcdUSB`.
    pub usb_version: u16,
    /// `bcdDevice`.
    pub device_version: u16,
    /// Manufacturer string, empty if unread or absent.
    pub vendor: String,
    /// Product string, empty if unread or absent.
    pub product: String,
    /// Serial number string, empty if unread or absent.
    pub serial: String,
    /// Whether any interface reports the Mass Storage class.
    pub is_mass_storage: bool,
    /// Composed one-line description.
    pub description: String,
}

/// Parameters from the owning hub, used only to append the hub-specific
/// suffix to a hub's own description line.
pub struct HubSuffix {
    /// `bcdUSB` of the hub itself.
    pub usb_version: u16,
    /// Number of downstream-facing ports.
    pub nports: u8,
    /// The hub's power-switching mode, rendered as its tag in the suffix.
    pub lpsm: PowerSwitchingMode,
}

fn class_name(class: u8) -> &'static str {
    match class {
        CLASS_PER_INTERFACE => "Per Interface",
        CLASS_AUDIO => "Audio",
        CLASS_COMM => "Communications",
        CLASS_HID => "Human Interface Device",
        CLASS_PHYSICAL => "Physical",
        CLASS_PRINTER => "Printer",
        CLASS_IMAGE => "Image",
        CLASS_MASS_STORAGE => "Mass Storage",
        CLASS_HUB => "Hub",
        CLASS_DATA => "Data",
        CLASS_SMART_CARD => "Smart Card",
        CLASS_CONTENT_SECURITY => "Content Security",
        CLASS_VIDEO => "Video",
        CLASS_PERSONAL_HEALTHCARE => "Personal Healthcare",
        CLASS_DIAGNOSTIC_DEVICE => "Diagnostic Device",
        CLASS_WIRELESS => "Wireless",
        CLASS_APPLICATION => "Application",
        CLASS_VENDOR_SPEC => "Vendor Specific",
        _ => "Unknown",
    }
}

/// Pick a representative class name for a per-interface (composite)
/// device by walking its first configuration's interfaces, preferring
/// the first interface that isn't itself "per interface".
fn primary_class_name(device: &Device, device_class: u8) -> String {
    if device_class != CLASS_PER_INTERFACE {
        return class_name(device_class).to_string();
    }

    let Ok(config) = device.active_configuration() else {
        return "Unknown".to_string();
    };

    let mut primary = "Composite Device".to_string();
    for group in config.interfaces() {
        for alt in group.alt_settings() {
            let interface_class = alt.class();
            match interface_class {
                CLASS_HID | CLASS_AUDIO | CLASS_VIDEO | CLASS_PRINTER | CLASS_SMART_CARD
                | CLASS_CONTENT_SECURITY => {
                    return class_name(interface_class).to_string();
                }
                CLASS_MASS_STORAGE => {
                    primary = class_name(interface_class).to_string();
                }
                CLASS_COMM | CLASS_DATA => {
                    if primary == "Composite Device" {
                        primary = "Communications".to_string();
                    }
                }
                CLASS_WIRELESS | CLASS_APPLICATION => {
                    if primary == "Composite Device" {
                        primary = class_name(interface_class).to_string();
                    }
                }
                _ => {}
            }
        }
    }
    primary
}

/// Scan every interface alt-setting for a Mass Storage class (0x08).
fn scan_is_mass_storage(device: &Device) -> bool {
    let Ok(config) = device.active_configuration() else {
        return false;
    };
    config
        .interfaces()
        .flat_map(|group| group.alt_settings().collect::<Vec<_>>())
        .any(|alt| alt.class() == CLASS_MASS_STORAGE)
}

/// Read vendor/product/serial string descriptors and compose a one-line
/// description, the way `get_device_description` does in the original.
///
/// `device` is `None` when the caller only has `DeviceInfo` and doesn't
/// want to pay for an `open()` (e.g. a disconnected port). `no_desc`
/// mirrors `--nodesc`: skip the string descriptor reads entirely.
pub fn describe_device(
    info: &nusb::DeviceInfo,
    device: Option<&Device>,
    no_desc: bool,
    hub_suffix: Option<HubSuffix>,
) -> DeviceSummary {
    let mut summary = DeviceSummary {
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        device_class: info.class(),
        usb_version: 0,
        device_version: info.device_version(),
        ..Default::default()
    };

    if let Some(device) = device {
        summary.usb_version = device.device_descriptor().usb_version();
    }

    if !no_desc {
        summary.vendor = info.manufacturer_string().unwrap_or("").trim().to_string();
        summary.product = info.product_string().unwrap_or("").trim().to_string();
        summary.serial = info.serial_number().unwrap_or("").trim_end().to_string();
    }

    summary.class_name = device
        .map(|d| primary_class_name(d, info.class()))
        .unwrap_or_else(|| class_name(info.class()).to_string());
    summary.is_mass_storage = device.map(scan_is_mass_storage).unwrap_or(false);

    let hub_specific = hub_suffix
        .map(|h| {
            format!(
                ", USB {:x}.{:02x}, {} ports, {}",
                h.usb_version >> 8,
                h.usb_version & 0xff,
                h.nports,
                h.lpsm.as_tag()
            )
        })
        .unwrap_or_default();

    summary.description = format!(
        "{:04x}:{:04x}{}{}{}{}{}{}{}",
        summary.vendor_id,
        summary.product_id,
        if !summary.vendor.is_empty() { " " } else { "" },
        summary.vendor,
        if !summary.product.is_empty() { " " } else { "" },
        summary.product,
        if !summary.serial.is_empty() { " " } else { "" },
        summary.serial,
        hub_specific,
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_name_lookup() {
        assert_eq!(class_name(CLASS_HUB), "Hub");
        assert_eq!(class_name(0xAB), "Unknown");
    }

    #[test]
    fn description_format_without_optional_fields() {
        let summary = DeviceSummary {
            vendor_id: 0x1234,
            product_id: 0x5678,
            ..Default::default()
        };
        // Exercise the same format string describe_device uses, without
        // needing a live nusb::Device.
        let desc = format!(
            "{:04x}:{:04x}{}{}{}{}{}{}{}",
            summary.vendor_id,
            summary.product_id,
            "",
            "",
            "",
            "",
            "",
            "",
            ""
        );
        assert_eq!(desc, "1234:5678");
    }
}
