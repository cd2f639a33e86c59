//! Hub discovery, selection filtering, and USB2/USB3 dual-pairing.

use log::{debug, trace, warn};
use nusb::{DeviceInfo, MaybeFuture};

use crate::descriptor::{
    self, ContainerId, HubClassDescriptor, PlatformQuirks, PowerSwitchingMode,
};
use crate::device_desc::{self, DeviceSummary, HubSuffix};
use crate::Error;

/// Largest port count the port bitmask supports.
pub const MAX_HUB_PORTS: u8 = 14;
/// Discovery stops adding hubs once this many have been found.
pub const MAX_HUBS: usize = 128;

const CLASS_HUB: u8 = 0x09;
const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;

/// Why a hub is or isn't part of this run's write/read scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Actionable {
    /// Excluded by a filter, non-PPPS without `force`, or paired but not
    /// chosen as the best companion.
    Skipped,
    /// Matched a primary filter criterion.
    Primary,
    /// Selected as the USB2/USB3 dual partner of a primary match.
    DerivedPartner,
}

impl Actionable {
    fn as_u8(self) -> u8 {
        match self {
            Self::Skipped => 0,
            Self::Primary => 1,
            Self::DerivedPartner => 2,
        }
    }
}

/// One discovered hub and everything needed to filter, pair, and act on it.
pub struct HubRecord {
    /// The underlying `nusb` device handle information.
    pub info: DeviceInfo,
    /// `bcdUSB` from the device descriptor.
    pub bcd_usb: u16,
    /// `true` iff `bcd_usb >= 0x0300`.
    pub super_speed: bool,
    /// Number of downstream-facing ports.
    pub nports: u8,
    /// Power-switching mode after the single-port and platform overrides.
    pub lpsm: PowerSwitchingMode,
    /// BOS Container ID, if the device exposes one.
    pub container_id: Option<ContainerId>,
    /// "vvvv:pppp" vendor:product string.
    pub vendor: String,
    /// Canonical location string "B-p1.p2…pN".
    pub location: String,
    /// USB bus number.
    pub bus: u8,
    /// 1-based port numbers from the root hub down to this hub.
    pub port_numbers: Vec<u8>,
    /// `port_numbers.len()`.
    pub pn_len: usize,
    /// Device strings and the composed description line.
    pub description: DeviceSummary,
    /// Whether this hub is in scope for the current run.
    pub actionable: Actionable,
}

impl HubRecord {
    /// `vvvv:pppp`, lowercase hex.
    fn vendor_string(info: &DeviceInfo) -> String {
        format!("{:04x}:{:04x}", info.vendor_id(), info.product_id())
    }

    /// `B-p1.p2…pN`, empty port path collapses to just the bus number.
    fn location_string(bus: u8, port_numbers: &[u8]) -> String {
        if port_numbers.is_empty() {
            bus.to_string()
        } else {
            let chain = port_numbers
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join(".");
            format!("{bus}-{chain}")
        }
    }

    /// "Physical hub" contribution for the one-hub-at-a-time check: every
    /// actionable non-SuperSpeed hub counts, and under `exact` every
    /// actionable hub counts (pairing is disabled, so each is its own
    /// physical device as far as the check is concerned).
    pub fn counts_as_physical_hub(&self, exact: bool) -> bool {
        self.actionable != Actionable::Skipped && (exact || !self.super_speed)
    }
}

/// Decode one candidate device into a `HubRecord`, or a taxonomy error the
/// caller downgrades to "skip this device".
fn decode_hub(
    info: DeviceInfo,
    device: &nusb::Device,
    quirks: PlatformQuirks,
) -> Result<HubRecord, Error> {
    if info.class() != CLASS_HUB {
        return Err(Error::InvalidDeviceClass);
    }

    let bcd_usb = device.device_descriptor().usb_version();
    let super_speed = bcd_usb >= 0x0300;

    let descriptor_type = if super_speed {
        descriptor::DESCRIPTOR_TYPE_SUPERSPEED_HUB
    } else {
        descriptor::DESCRIPTOR_TYPE_HUB
    };
    let mut buf = [0u8; 64];
    let len = device.control_in_blocking(
        nusb::transfer::Control {
            control_type: nusb::transfer::ControlType::Class,
            recipient: nusb::transfer::Recipient::Device,
            request: 0x06, // GET_DESCRIPTOR
            value: (descriptor_type as u16) << 8,
            index: 0,
        },
        &mut buf,
        std::time::Duration::from_millis(5000),
    )?;
    let class_descriptor = HubClassDescriptor::decode(&buf, len)?;
    let mut lpsm = class_descriptor.effective_power_switching_mode();

    let bus = info.busnum();
    let port_numbers: Vec<u8> = info.port_chain().to_vec();
    let pn_len = port_numbers.len();
    let location = HubRecord::location_string(bus, &port_numbers);
    let vendor = HubRecord::vendor_string(&info);

    let mut container_id = read_container_id(device);

    descriptor::apply_platform_overrides(
        quirks,
        descriptor::OverridableHub {
            vendor: &vendor,
            nports: class_descriptor.port_count,
            pn_len,
            super_speed,
            container_id: &mut container_id,
            lpsm: &mut lpsm,
        },
    );

    let description = device_desc::describe_device(
        &info,
        Some(device),
        false,
        Some(HubSuffix {
            usb_version: bcd_usb,
            nports: class_descriptor.port_count,
            lpsm,
        }),
    );

    Ok(HubRecord {
        info,
        bcd_usb,
        super_speed,
        nports: class_descriptor.port_count,
        lpsm,
        container_id,
        vendor,
        location,
        bus,
        port_numbers,
        pn_len,
        description,
        actionable: Actionable::Primary,
    })
}

fn read_container_id(device: &nusb::Device) -> Option<ContainerId> {
    let mut buf = [0u8; 256];
    let len = device
        .control_in_blocking(
            nusb::transfer::Control {
                control_type: nusb::transfer::ControlType::Standard,
                recipient: nusb::transfer::Recipient::Device,
                request: 0x06, // GET_DESCRIPTOR
                value: (descriptor::DESCRIPTOR_TYPE_BOS as u16) << 8,
                index: 0,
            },
            &mut buf,
            std::time::Duration::from_millis(5000),
        )
        .ok()?;
    descriptor::parse_bos_container_id(&buf[..len])
}

/// Walk every enumerated device, decode those that are hubs, and drop
/// anything that isn't PPPS unless `force` is set. Sets `perm_fault` when a
/// hub-shaped device could not be opened or read, to feed the
/// PermissionDenied decision the caller makes afterward.
pub fn discover(quirks: PlatformQuirks, force: bool) -> Result<(Vec<HubRecord>, bool), Error> {
    let mut hubs = Vec::new();
    let mut perm_fault = false;

    let devices = nusb::list_devices().wait()?;

    for info in devices {
        if info.class() != CLASS_HUB {
            continue;
        }
        if hubs.len() >= MAX_HUBS {
            warn!("MAX_HUBS ({MAX_HUBS}) reached, ignoring remaining hubs");
            break;
        }

        let device = match info.open().wait() {
            Ok(d) => d,
            Err(e) => {
                trace!("failed to open hub candidate {info:?}: {e}");
                perm_fault = true;
                continue;
            }
        };

        match decode_hub(info, &device, quirks) {
            Ok(hub) => {
                if hub.lpsm != PowerSwitchingMode::PerPort && !force {
                    debug!(
                        "hub {} is not per-port switchable (lpsm != ppps), skipping",
                        hub.location
                    );
                    continue;
                }
                hubs.push(hub);
            }
            Err(Error::InvalidDeviceClass) => continue,
            Err(Error::InvalidRespone) => {
                trace!("short hub class descriptor, skipping device");
                perm_fault = true;
            }
            Err(e @ (Error::UsbError(_) | Error::UsbTransferError(_))) => {
                trace!("USB error reading hub candidate: {e}");
                perm_fault = true;
            }
            Err(e) => return Err(e),
        }
    }

    let any_actionable = hubs.iter().any(|h| h.actionable != Actionable::Skipped);
    if perm_fault && !any_actionable {
        return Err(Error::PermissionDenied);
    }

    Ok((hubs, perm_fault))
}

/// Filtering criteria taken straight from the CLI.
#[derive(Default)]
pub struct Filters<'a> {
    /// Exact, case-insensitive location match.
    pub location: Option<&'a str>,
    /// Required `pn_len + 1` (root hubs are level 1).
    pub level: Option<usize>,
    /// Case-insensitive prefix of "vvvv:pppp".
    pub vendor: Option<&'a str>,
    /// Case-sensitive substring of the hub's own description.
    pub search_hub: Option<&'a str>,
    /// Case-sensitive substring of an attached child device's description.
    pub search_device: Option<&'a str>,
}

/// Apply each provided filter, narrowing `actionable` to `Skipped` on a
/// miss. `search_device` additionally narrows `opt_ports` (returned) to the
/// bitmask of the last matching child's port.
pub fn apply_filters(
    hubs: &mut [HubRecord],
    children: &[DeviceInfo],
    filters: &Filters<'_>,
    opt_ports: u32,
) -> u32 {
    let mut ports = opt_ports;

    for hub in hubs.iter_mut() {
        if hub.actionable == Actionable::Skipped {
            continue;
        }

        if let Some(location) = filters.location {
            if !hub.location.eq_ignore_ascii_case(location) {
                hub.actionable = Actionable::Skipped;
                continue;
            }
        }
        if let Some(level) = filters.level {
            if hub.pn_len + 1 != level {
                hub.actionable = Actionable::Skipped;
                continue;
            }
        }
        if let Some(vendor) = filters.vendor {
            if !hub
                .vendor
                .to_ascii_lowercase()
                .starts_with(&vendor.to_ascii_lowercase())
            {
                hub.actionable = Actionable::Skipped;
                continue;
            }
        }
        if let Some(needle) = filters.search_hub {
            if !hub.description.description.contains(needle) {
                hub.actionable = Actionable::Skipped;
                continue;
            }
        }
    }

    if let Some(needle) = filters.search_device {
        for hub in hubs.iter_mut() {
            if hub.actionable == Actionable::Skipped {
                continue;
            }
            let mut matched_port = None;
            for child in children {
                if child.busnum() != hub.bus {
                    continue;
                }
                let child_chain = child.port_chain();
                if child_chain.len() != hub.pn_len + 1 {
                    continue;
                }
                if child_chain[..hub.pn_len] != hub.port_numbers[..] {
                    continue;
                }
                let summary = device_desc::describe_device(child, None, false, None);
                if summary.description.contains(needle) {
                    matched_port = Some(child_chain[hub.pn_len]);
                }
            }
            match matched_port {
                Some(port) => ports = 1u32 << (port as u32 - 1),
                None => hub.actionable = Actionable::Skipped,
            }
        }
    }

    ports
}

/// The subset of `HubRecord` the pairing score needs, broken out so it can
/// be exercised without a live `nusb::DeviceInfo`.
struct PairKey<'a> {
    super_speed: bool,
    nports: u8,
    bus: u8,
    pn_len: usize,
    port_numbers: &'a [u8],
    container_id: &'a Option<ContainerId>,
    serial: &'a str,
}

impl<'a> From<&'a HubRecord> for PairKey<'a> {
    fn from(hub: &'a HubRecord) -> Self {
        Self {
            super_speed: hub.super_speed,
            nports: hub.nports,
            bus: hub.bus,
            pn_len: hub.pn_len,
            port_numbers: &hub.port_numbers,
            container_id: &hub.container_id,
            serial: &hub.description.serial,
        }
    }
}

/// Score used to rank USB2/USB3 pairing candidates.
fn pairing_score(h1: &PairKey<'_>, h2: &PairKey<'_>, quirks: PlatformQuirks) -> u8 {
    let combined_ports = h1.nports as u32 + h2.nports as u32;
    if h1.nports != h2.nports && combined_ports > 3 {
        return 0;
    }
    if h1.super_speed == h2.super_speed {
        return 0;
    }
    if h1.container_id != h2.container_id || h1.container_id.is_none() {
        return 0;
    }
    let serial_ok = h1.serial.is_empty() || h2.serial.is_empty() || h1.serial == h2.serial;
    if !serial_ok {
        return 0;
    }

    let mut score = 1u8;

    if h1.pn_len == h2.pn_len && h1.pn_len > 0 && h1.port_numbers[1..] == h2.port_numbers[1..] {
        score = 2;
    }

    if quirks.is_rpi_4b {
        let l1 = h1.pn_len as i32;
        let s1 = h1.super_speed as i32;
        let l2 = h2.pn_len as i32;
        let s2 = h2.super_speed as i32;
        if l1 + s1 == l2 + s2 && l1 >= s2 {
            let suffix_matches = h1
                .port_numbers
                .iter()
                .rev()
                .zip(h2.port_numbers.iter().rev())
                .all(|(a, b)| a == b);
            if suffix_matches {
                score = score.max(3);
            }
        }
    }

    if h1.port_numbers == h2.port_numbers {
        score = score.max(4);
        let bus_diff_matches =
            (h1.bus as i32 - h1.super_speed as i32) == (h2.bus as i32 - h2.super_speed as i32);
        if bus_diff_matches {
            score = score.max(5);
        }
    }

    score
}

/// Pair every primary hub with a non-empty container ID to its best
/// USB2/USB3 companion, promoting the companion to `DerivedPartner` if it
/// wasn't already selected. Skipped entirely when `exact` is set.
pub fn resolve_pairing(hubs: &mut [HubRecord], quirks: PlatformQuirks, exact: bool) {
    if exact {
        return;
    }

    let n = hubs.len();
    for i in 0..n {
        if hubs[i].actionable != Actionable::Primary || hubs[i].container_id.is_none() {
            continue;
        }

        let mut best: Option<(usize, u8)> = None;
        for j in 0..n {
            if i == j {
                continue;
            }
            let score = pairing_score(&PairKey::from(&hubs[i]), &PairKey::from(&hubs[j]), quirks);
            if score == 0 {
                continue;
            }
            if best.map(|(_, best_score)| score > best_score).unwrap_or(true) {
                best = Some((j, score));
            }
        }

        if let Some((j, _)) = best {
            if hubs[j].actionable == Actionable::Skipped {
                hubs[j].actionable = Actionable::DerivedPartner;
                debug!(
                    "paired hub {} with derived partner {}",
                    hubs[i].location, hubs[j].location
                );
            }
        }
    }
}

/// Parse a `--ports` spec (`all`, `"1"`, `"1,3-5,11-13"`) into a 1-based
/// bitmask.
pub fn ports2bitmap(spec: &str) -> Result<u32, Error> {
    if spec.eq_ignore_ascii_case("all") {
        return Ok((1u32 << MAX_HUB_PORTS) - 1);
    }

    let mut mask = 0u32;
    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::UsageError(format!("invalid port spec: {spec:?}")));
        }
        let (lo, hi) = match token.split_once('-') {
            Some((a, b)) => (a.parse::<u8>()?, b.parse::<u8>()?),
            None => {
                let p = token.parse::<u8>()?;
                (p, p)
            }
        };
        if lo < 1 || lo > hi || hi > MAX_HUB_PORTS {
            return Err(Error::UsageError(format!("invalid port range: {token:?}")));
        }
        for p in lo..=hi {
            mask |= 1u32 << (p as u32 - 1);
        }
    }
    Ok(mask)
}

/// Suppress the unused-constant lint until `main.rs` wires up
/// `--sysdev`'s raw device descriptor re-read.
#[allow(dead_code)]
const _DEVICE_DESCRIPTOR_TYPE: u8 = DESCRIPTOR_TYPE_DEVICE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports2bitmap_single() {
        assert_eq!(ports2bitmap("1").unwrap(), 0b1);
    }

    #[test]
    fn ports2bitmap_mixed_ranges() {
        assert_eq!(ports2bitmap("1,3-5,11-13").unwrap(), 0b1110000011101);
    }

    #[test]
    fn ports2bitmap_reversed_range_is_usage_error() {
        assert!(matches!(ports2bitmap("5-3"), Err(Error::UsageError(_))));
    }

    #[test]
    fn ports2bitmap_out_of_range_is_usage_error() {
        assert!(matches!(ports2bitmap("15"), Err(Error::UsageError(_))));
    }

    #[test]
    fn ports2bitmap_all() {
        assert_eq!(ports2bitmap("all").unwrap(), (1 << MAX_HUB_PORTS) - 1);
    }

    fn make_key<'a>(
        super_speed: bool,
        nports: u8,
        bus: u8,
        port_numbers: &'a [u8],
        container_id: &'a Option<ContainerId>,
        serial: &'a str,
    ) -> PairKey<'a> {
        PairKey {
            super_speed,
            nports,
            bus,
            pn_len: port_numbers.len(),
            port_numbers,
            container_id,
            serial,
        }
    }

    #[test]
    fn pairing_score_requires_matching_container_id() {
        let h1 = make_key(false, 4, 2, &[1], &None, "");
        let h2 = make_key(true, 4, 2, &[1], &None, "");
        assert_eq!(pairing_score(&h1, &h2, PlatformQuirks::default()), 0);
    }

    #[test]
    fn pairing_score_matches_on_identical_path() {
        let cid = Some(ContainerId::from_hex("5cf3ee30d5074925b001802d79434c30").unwrap());
        let h1 = make_key(false, 4, 2, &[1], &cid, "");
        let h2 = make_key(true, 4, 2, &[1], &cid, "");
        assert!(pairing_score(&h1, &h2, PlatformQuirks::default()) >= 4);
    }
}
