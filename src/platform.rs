//! Platform-specific helpers, isolated from the core algorithms: sleeping,
//! the Linux sysfs `disable` fast path, and Raspberry Pi model detection
//! for the override table in `descriptor`.

use std::fs;
use std::io::Write;
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::descriptor::PlatformQuirks;

/// Sleep for `ms` milliseconds. A thin wrapper so call sites read like the
/// original's `sleep_ms()` rather than reaching for `std::thread` directly.
pub fn sleep_ms(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

/// Read `/sys/firmware/devicetree/base/model`, falling back to parsing
/// `/proc/cpuinfo`'s `Model` line, exactly as `get_computer_model` does.
#[cfg(target_os = "linux")]
pub fn computer_model() -> Option<String> {
    if let Ok(model) = fs::read_to_string("/sys/firmware/devicetree/base/model") {
        let trimmed = model.trim_end_matches('\0').trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    let cpuinfo = fs::read_to_string("/proc/cpuinfo").ok()?;
    cpuinfo
        .lines()
        .find_map(|line| line.strip_prefix("Model\t\t: "))
        .map(|s| s.trim().to_string())
}

/// Machine model detection is Linux-only; other platforms report none.
#[cfg(not(target_os = "linux"))]
pub fn computer_model() -> Option<String> {
    None
}

/// Classify the current machine into the quirks the descriptor override
/// table consumes. Only Raspberry Pi 4B and 5 currently need a rule.
pub fn check_computer_model() -> PlatformQuirks {
    let model = computer_model().unwrap_or_default();
    let quirks = PlatformQuirks {
        is_rpi_4b: model.contains("Raspberry Pi 4 Model B"),
        is_rpi_5: model.contains("Raspberry Pi 5"),
    };
    if quirks.is_rpi_4b || quirks.is_rpi_5 {
        debug!("detected platform quirks for model {model:?}: {quirks:?}");
    }
    quirks
}

/// Linux sysfs path for a port's `disable` attribute. Root hub ports use
/// `<bus>-0:1.0/usb<bus>-port<n>`, ports further down the tree use
/// `<bus>-<portchain>:1.0/<bus>-<portchain>-port<n>`, matching
/// `set_port_status_linux`'s two path shapes.
#[cfg(target_os = "linux")]
fn sysfs_disable_path(busnum: u8, port_chain: &[u8], port: u8) -> String {
    if port_chain.is_empty() {
        format!("/sys/bus/usb/devices/usb{busnum}/{busnum}-0:1.0/usb{busnum}-port{port}/disable")
    } else {
        let chain = port_chain
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(".");
        format!(
            "/sys/bus/usb/devices/{busnum}-{chain}/{busnum}-{chain}:1.0/{busnum}-{chain}-port{port}/disable"
        )
    }
}

/// Attempt the sysfs `disable` write. `Some(Ok(()))` means it worked,
/// `Some(Err(_))` a write was attempted and failed (permission, most
/// likely), `None` means the file doesn't exist and the caller should
/// fall back to a USB control transfer. Kernel exposes this file from
/// 6.0 onward; absence on older kernels is expected, not an error.
#[cfg(target_os = "linux")]
pub fn try_sysfs_set_power(
    busnum: u8,
    port_chain: &[u8],
    port: u8,
    on: bool,
) -> Option<std::io::Result<()>> {
    let path = sysfs_disable_path(busnum, port_chain, port);
    if !std::path::Path::new(&path).exists() {
        trace!("sysfs power control unavailable at {path}");
        return None;
    }
    let value: &[u8] = if on { b"0" } else { b"1" };
    let result = fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .and_then(|mut f| f.write_all(value));
    if let Err(ref e) = result {
        warn!("writing {path} failed: {e}");
    }
    Some(result)
}

/// The sysfs `disable` fast path is Linux-only; other platforms always
/// fall back to a USB control transfer.
#[cfg(not(target_os = "linux"))]
pub fn try_sysfs_set_power(
    _busnum: u8,
    _port_chain: &[u8],
    _port: u8,
    _on: bool,
) -> Option<std::io::Result<()>> {
    None
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn root_hub_path_has_no_chain_segment() {
        let path = sysfs_disable_path(2, &[], 3);
        assert_eq!(path, "/sys/bus/usb/devices/usb2/2-0:1.0/usb2-port3/disable");
    }

    #[test]
    fn nested_port_path_joins_chain_with_dots() {
        let path = sysfs_disable_path(1, &[2, 1], 4);
        assert_eq!(
            path,
            "/sys/bus/usb/devices/1-2.1/1-2.1:1.0/1-2.1-port4/disable"
        );
    }
}
