//! Hub class descriptor decoding, BOS Container-ID extraction, and the
//! small table of Raspberry Pi specific overrides the discovery pass
//! applies afterward.

use crate::Error;

/// Minimum length of the non-variable part of a hub class descriptor,
/// plus the 2 bytes of wHubCharacteristics (both the USB 2.0 and
/// SuperSpeed hub descriptor share this layout up to that point).
pub const HUB_NONVAR_SIZE: usize = 7;

/// `0x29` — USB 2.0 hub class descriptor.
pub const DESCRIPTOR_TYPE_HUB: u8 = 0x29;
/// `0x2a` — SuperSpeed hub class descriptor.
pub const DESCRIPTOR_TYPE_SUPERSPEED_HUB: u8 = 0x2a;
/// `0x0f` — Binary device Object Store.
pub const DESCRIPTOR_TYPE_BOS: u8 = 0x0f;
/// `0x10` — BOS device capability descriptor type.
const DESCRIPTOR_TYPE_DEVICE_CAPABILITY: u8 = 0x10;
/// `0x04` — Container ID device capability.
const DEVICE_CAPABILITY_CONTAINER_ID: u8 = 0x04;

const HUB_CHAR_LPSM_MASK: u16 = 0x0003;
const HUB_CHAR_LPSM_COMMON: u16 = 0x0000;
const HUB_CHAR_LPSM_INDIVIDUAL: u16 = 0x0001;

/// Logical Power Switching Mode, wHubCharacteristics bits 0-1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerSwitchingMode {
    /// Each port's power can be switched independently (PPPS).
    PerPort,
    /// All ports are switched together.
    Ganged,
    /// The hub does not support software power switching.
    None,
}

impl PowerSwitchingMode {
    /// Tag used in description strings and JSON (`ppps`/`ganged`/`nops`).
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::PerPort => "ppps",
            Self::Ganged => "ganged",
            Self::None => "nops",
        }
    }
}

/// A decoded hub class descriptor.
#[derive(Clone, Copy, Debug)]
pub struct HubClassDescriptor {
    /// Number of downstream-facing ports, from `bNbrPorts`.
    pub port_count: u8,
    characteristics: u16,
}

impl HubClassDescriptor {
    /// Decode from the raw class-descriptor response. `len` is the number
    /// of bytes actually returned by the control transfer.
    pub fn decode(buf: &[u8], len: usize) -> Result<Self, Error> {
        if len < HUB_NONVAR_SIZE + 2 {
            return Err(Error::InvalidRespone);
        }
        let port_count = buf[2];
        let characteristics = u16::from_le_bytes([buf[3], buf[4]]);
        Ok(Self {
            port_count,
            characteristics,
        })
    }

    /// Logical Power Switching Mode before any single-port or platform
    /// override is applied.
    pub fn power_switching_mode(&self) -> PowerSwitchingMode {
        match self.characteristics & HUB_CHAR_LPSM_MASK {
            HUB_CHAR_LPSM_INDIVIDUAL => PowerSwitchingMode::PerPort,
            HUB_CHAR_LPSM_COMMON => PowerSwitchingMode::Ganged,
            _ => PowerSwitchingMode::None,
        }
    }

    /// `power_switching_mode()`, but a single-port ganged hub is
    /// reclassified as per-port (ganging one port is indistinguishable
    /// from switching it individually).
    pub fn effective_power_switching_mode(&self) -> PowerSwitchingMode {
        let lpsm = self.power_switching_mode();
        if lpsm == PowerSwitchingMode::Ganged && self.port_count == 1 {
            PowerSwitchingMode::PerPort
        } else {
            lpsm
        }
    }
}

/// 16-byte BOS Container ID, printed as 32 lowercase hex digits.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(
    /// Raw 16-byte identifier.
    pub [u8; 16],
);

impl ContainerId {
    /// Parse 32 hex characters (as found in the BOS capability) into a
    /// `ContainerId`. Returns `None` on a non-hex or wrong-length input.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContainerId({})", self)
    }
}

/// Walk a raw BOS descriptor buffer and return the first Container ID
/// capability found, if any.
pub fn parse_bos_container_id(buf: &[u8]) -> Option<ContainerId> {
    if buf.len() < 5 {
        return None;
    }
    let num_caps = buf[4] as usize;
    let mut offset = 5;
    for _ in 0..num_caps {
        if offset + 3 > buf.len() {
            break;
        }
        let cap_len = buf[offset] as usize;
        if cap_len == 0 || offset + cap_len > buf.len() {
            break;
        }
        let descriptor_type = buf[offset + 1];
        let capability_type = buf[offset + 2];
        if descriptor_type == DESCRIPTOR_TYPE_DEVICE_CAPABILITY
            && capability_type == DEVICE_CAPABILITY_CONTAINER_ID
            && cap_len >= 20
        {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&buf[offset + 4..offset + 20]);
            return Some(ContainerId(bytes));
        }
        offset += cap_len;
    }
    None
}

/// Which Raspberry Pi override rules, if any, apply to this run. Detected
/// once at startup from the platform's model string.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlatformQuirks {
    /// Running on a Raspberry Pi 4 Model B.
    pub is_rpi_4b: bool,
    /// Running on a Raspberry Pi 5.
    pub is_rpi_5: bool,
}

/// Fields of a not-yet-finalized hub record that the override rules may
/// rewrite. Kept separate from `HubRecord` so these rules stay a pure,
/// independently testable post-processing step over plain data.
pub struct OverridableHub<'a> {
    /// "vvvv:pppp" vendor:product string.
    pub vendor: &'a str,
    /// Number of downstream-facing ports.
    pub nports: u8,
    /// Length of the hub's port-number path (0 for a root hub).
    pub pn_len: usize,
    /// Whether this is the SuperSpeed half of a potential dual hub.
    pub super_speed: bool,
    /// The hub's container ID, rewritten in place if a rule applies.
    pub container_id: &'a mut Option<ContainerId>,
    /// The hub's power-switching mode, rewritten in place if a rule applies.
    pub lpsm: &'a mut PowerSwitchingMode,
}

/// Apply the Raspberry Pi specific rule table to a hub record that has
/// otherwise been fully decoded.
pub fn apply_platform_overrides(quirks: PlatformQuirks, hub: OverridableHub<'_>) {
    let OverridableHub {
        vendor,
        nports,
        pn_len,
        super_speed,
        container_id,
        lpsm,
    } = hub;

    if quirks.is_rpi_4b
        && container_id.is_none()
        && vendor.eq_ignore_ascii_case("1d6b:0003")
        && pn_len == 0
        && nports == 4
        && super_speed
    {
        *container_id = ContainerId::from_hex("5cf3ee30d5074925b001802d79434c30");
    }

    if quirks.is_rpi_4b
        && *lpsm == PowerSwitchingMode::Ganged
        && vendor.eq_ignore_ascii_case("2109:3431")
    {
        *lpsm = PowerSwitchingMode::PerPort;
    }

    if quirks.is_rpi_5
        && container_id.is_none()
        && *lpsm == PowerSwitchingMode::PerPort
        && pn_len == 0
    {
        let is_usb2_root = vendor.eq_ignore_ascii_case("1d6b:0002") && nports == 2 && !super_speed;
        let is_usb3_root = vendor.eq_ignore_ascii_case("1d6b:0003") && nports == 1 && super_speed;
        if is_usb2_root || is_usb3_root {
            // Shared synthetic ID so the pairing resolver links the two
            // root hubs that the Pi 5 firmware fails to tag itself.
            *container_id = ContainerId::from_hex("00000000000000005261737062657272");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_port_ganged_becomes_per_port() {
        let d = HubClassDescriptor {
            port_count: 1,
            characteristics: HUB_CHAR_LPSM_COMMON,
        };
        assert_eq!(d.power_switching_mode(), PowerSwitchingMode::Ganged);
        assert_eq!(
            d.effective_power_switching_mode(),
            PowerSwitchingMode::PerPort
        );
    }

    #[test]
    fn multi_port_ganged_stays_ganged() {
        let d = HubClassDescriptor {
            port_count: 4,
            characteristics: HUB_CHAR_LPSM_COMMON,
        };
        assert_eq!(
            d.effective_power_switching_mode(),
            PowerSwitchingMode::Ganged
        );
    }

    #[test]
    fn short_descriptor_is_rejected() {
        let buf = [0u8; 5];
        assert!(matches!(
            HubClassDescriptor::decode(&buf, 5),
            Err(Error::InvalidRespone)
        ));
    }

    #[test]
    fn truncated_descriptor_below_minlen_is_rejected() {
        // bLength=7 would be the non-variable part alone; wHubCharacteristics
        // isn't fully present until 2 bytes further, so 7 and 8 must fail.
        let buf = [0u8; 8];
        assert!(matches!(
            HubClassDescriptor::decode(&buf, 7),
            Err(Error::InvalidRespone)
        ));
        assert!(matches!(
            HubClassDescriptor::decode(&buf, 8),
            Err(Error::InvalidRespone)
        ));
    }

    #[test]
    fn descriptor_at_minlen_is_accepted() {
        let mut buf = [0u8; 9];
        buf[2] = 4;
        assert!(HubClassDescriptor::decode(&buf, 9).is_ok());
    }

    #[test]
    fn container_id_round_trips_through_hex() {
        let hex = "5cf3ee30d5074925b001802d79434c30";
        let id = ContainerId::from_hex(hex).unwrap();
        assert_eq!(id.to_string(), hex);
    }

    #[test]
    fn bos_walk_finds_container_id_capability() {
        // bLength=5, bDescriptorType=0x0f, wTotalLength=25, bNumDeviceCaps=1,
        // followed by one 20-byte container ID capability.
        let mut buf = vec![5, 0x0f, 25, 0, 1];
        buf.push(20); // bLength
        buf.push(0x10); // bDescriptorType = DEVICE_CAPABILITY
        buf.push(0x04); // bDevCapabilityType = CONTAINER_ID
        buf.push(0); // reserved
        buf.extend_from_slice(&[0xab; 16]);
        let id = parse_bos_container_id(&buf).unwrap();
        assert_eq!(id.0, [0xab; 16]);
    }

    #[test]
    fn rpi4b_usb3_root_hub_gets_synthetic_container_id() {
        let mut cid = None;
        let mut lpsm = PowerSwitchingMode::PerPort;
        apply_platform_overrides(
            PlatformQuirks {
                is_rpi_4b: true,
                is_rpi_5: false,
            },
            OverridableHub {
                vendor: "1D6B:0003",
                nports: 4,
                pn_len: 0,
                super_speed: true,
                container_id: &mut cid,
                lpsm: &mut lpsm,
            },
        );
        assert_eq!(
            cid.unwrap().to_string(),
            "5cf3ee30d5074925b001802d79434c30"
        );
    }
}
