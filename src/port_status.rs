//! Decoding of the 16-bit hub port status word (USB 2.0 spec Table 11-21,
//! extended by USB 3.x spec Table 10-10).

use bitflags::bitflags;

bitflags! {
    /// Raw wPortStatus bits that mean the same thing on USB 2.0 and USB 3.x.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PortFlags: u16 {
        /// A device is attached to this port.
        const CONNECTION  = 0x0001;
        /// The port is enabled.
        const ENABLE      = 0x0002;
        /// The attached device is suspended.
        const SUSPEND     = 0x0004;
        /// The port is reporting an over-current condition.
        const OVERCURRENT = 0x0008;
        /// The port is in reset.
        const RESET       = 0x0010;
        /// USB 2.0 power bit.
        const POWER       = 0x0100;
        /// USB 3.x power bit (same position the USB2 "low speed" bit used to
        /// occupy; the two layouts are otherwise disjoint above bit 4).
        const SS_POWER    = 0x0200;
        /// USB 2.0 only: attached device is low speed.
        const LOW_SPEED   = 0x0200;
        /// USB 2.0 only: attached device is high speed.
        const HIGH_SPEED  = 0x0400;
        /// USB 2.0 only: port is in test mode.
        const TEST        = 0x0800;
        /// USB 2.0 only: port indicator control is enabled.
        const INDICATOR   = 0x1000;
        /// USB 3.x only: link state field (bits 5-8).
        const LINK_STATE  = 0x01e0;
        /// USB 3.x only: negotiated speed field (bits 10-12).
        const SS_SPEED    = 0x1c00;
    }
}

/// USB 3.x port link state (bits 5-8 of wPortStatus).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Link is active and idle.
    U0,
    /// Link is in the U1 low-power state.
    U1,
    /// Link is in the U2 low-power state.
    U2,
    /// Link is suspended.
    U3,
    /// SuperSpeed terminations are disabled.
    SsDisabled,
    /// Receiver detection in progress.
    RxDetect,
    /// SuperSpeed functionality is inactive.
    SsInactive,
    /// Link training, polling.
    Polling,
    /// Link is recovering from U1/U2/U3.
    Recovery,
    /// Warm reset in progress.
    HotReset,
    /// Compliance test mode.
    Compliance,
    /// Loopback test mode.
    Loopback,
    /// Link-state field held a value not in the USB 3.x table.
    Unknown,
}

impl LinkState {
    fn from_bits(bits: u16) -> Self {
        match bits & PortFlags::LINK_STATE.bits() {
            0x0000 => Self::U0,
            0x0020 => Self::U1,
            0x0040 => Self::U2,
            0x0060 => Self::U3,
            0x0080 => Self::SsDisabled,
            0x00a0 => Self::RxDetect,
            0x00c0 => Self::SsInactive,
            0x00e0 => Self::Polling,
            0x0100 => Self::Recovery,
            0x0120 => Self::HotReset,
            0x0140 => Self::Compliance,
            0x0160 => Self::Loopback,
            _ => Self::Unknown,
        }
    }

    /// Name as it appears in text and JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::U0 => "U0",
            Self::U1 => "U1",
            Self::U2 => "U2",
            Self::U3 => "U3",
            Self::SsDisabled => "SS.Disabled",
            Self::RxDetect => "Rx.Detect",
            Self::SsInactive => "SS.Inactive",
            Self::Polling => "Polling",
            Self::Recovery => "Recovery",
            Self::HotReset => "HotReset",
            Self::Compliance => "Compliance",
            Self::Loopback => "Loopback",
            Self::Unknown => "Unknown",
        }
    }
}

/// USB 3.x negotiated speed (bits 10-12 of wPortStatus).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeedCode {
    /// USB 3.0 SuperSpeed, 5 Gbps.
    Gbps5,
    /// USB 3.1 Gen 2 SuperSpeed+, 10 Gbps.
    Gbps10,
    /// USB 3.2 Gen 2x2 SuperSpeed+, 20 Gbps.
    Gbps20,
    /// USB4, 40 Gbps.
    Gbps40,
    /// USB4, 80 Gbps.
    Gbps80,
    /// Speed field held a value not in the USB 3.x table.
    Unknown,
}

impl SpeedCode {
    fn from_bits(bits: u16) -> Self {
        match bits & PortFlags::SS_SPEED.bits() {
            0x0000 => Self::Gbps5,
            0x0400 => Self::Gbps10,
            0x0800 => Self::Gbps20,
            0x0c00 => Self::Gbps40,
            0x1000 => Self::Gbps80,
            _ => Self::Unknown,
        }
    }
}

/// Human-readable speed description and throughput, derived from the raw
/// status word.
pub struct SpeedInfo {
    /// Human-readable speed description, e.g. "USB2.0 High Speed 480Mbps".
    pub label: &'static str,
    /// Nominal link throughput in bits per second.
    pub bits_per_second: i64,
}

/// Decoded form of a single port status word.
#[derive(Clone, Copy, Debug)]
pub struct PortState {
    raw: u16,
    super_speed: bool,
}

impl PortState {
    /// Decode a raw wPortStatus word. `super_speed` selects which bit means
    /// "powered" and whether the USB 3.x bit layout applies.
    pub fn from_raw(raw: u16, super_speed: bool) -> Self {
        Self { raw, super_speed }
    }

    pub fn raw(&self) -> u16 {
        self.raw
    }

    fn flags(&self) -> PortFlags {
        PortFlags::from_bits_retain(self.raw)
    }

    pub fn super_speed(&self) -> bool {
        self.super_speed
    }

    pub fn connected(&self) -> bool {
        self.flags().contains(PortFlags::CONNECTION)
    }

    pub fn enabled(&self) -> bool {
        self.flags().contains(PortFlags::ENABLE)
    }

    pub fn suspended(&self) -> bool {
        self.flags().contains(PortFlags::SUSPEND)
    }

    pub fn overcurrent(&self) -> bool {
        self.flags().contains(PortFlags::OVERCURRENT)
    }

    pub fn in_reset(&self) -> bool {
        self.flags().contains(PortFlags::RESET)
    }

    fn power_mask(&self) -> PortFlags {
        if self.super_speed {
            PortFlags::SS_POWER
        } else {
            PortFlags::POWER
        }
    }

    pub fn powered(&self) -> bool {
        self.flags().contains(self.power_mask())
    }

    /// USB 2.0 only: low speed device attached.
    pub fn low_speed(&self) -> bool {
        !self.super_speed && self.flags().contains(PortFlags::LOW_SPEED)
    }

    /// USB 2.0 only: high speed device attached.
    pub fn high_speed(&self) -> bool {
        !self.super_speed && self.flags().contains(PortFlags::HIGH_SPEED)
    }

    pub fn test_mode(&self) -> bool {
        self.flags().contains(PortFlags::TEST)
    }

    pub fn indicator(&self) -> bool {
        self.flags().contains(PortFlags::INDICATOR)
    }

    /// USB 3.x only: physical-layer link state.
    pub fn link_state(&self) -> Option<LinkState> {
        self.super_speed.then(|| LinkState::from_bits(self.raw))
    }

    /// USB 3.x only: negotiated speed code, valid only while powered.
    pub fn speed_code(&self) -> Option<SpeedCode> {
        self.super_speed.then(|| SpeedCode::from_bits(self.raw))
    }

    /// Priority-ordered textual summary of the port's state.
    ///
    /// Order: overcurrent > resetting > no_power > powered_no_device >
    /// device_connected_not_enabled > device_suspended > device_active.
    pub fn decoded_label(&self) -> &'static str {
        if self.raw == 0x0000 {
            return "no_power";
        }
        if self.overcurrent() {
            return "overcurrent";
        }
        if self.in_reset() {
            return "resetting";
        }
        if !self.powered() {
            return "no_power";
        }
        if !self.connected() {
            return "powered_no_device";
        }
        if !self.enabled() {
            return "device_connected_not_enabled";
        }
        if self.suspended() {
            return "device_suspended";
        }
        "device_active"
    }

    /// Human-readable speed description and throughput for this port.
    pub fn speed_info(&self) -> SpeedInfo {
        if !self.connected() {
            return SpeedInfo {
                label: "Disconnected",
                bits_per_second: 0,
            };
        }
        if self.super_speed {
            match self.speed_code().unwrap() {
                SpeedCode::Gbps5 => SpeedInfo {
                    label: "USB3.0 SuperSpeed 5 Gbps",
                    bits_per_second: 5_000_000_000,
                },
                SpeedCode::Gbps10 => SpeedInfo {
                    label: "USB 3.1 Gen 2 SuperSpeed+ 10 Gbps",
                    bits_per_second: 10_000_000_000,
                },
                SpeedCode::Gbps20 => SpeedInfo {
                    label: "USB 3.2 Gen 2x2 SuperSpeed+ 20 Gbps",
                    bits_per_second: 20_000_000_000,
                },
                SpeedCode::Gbps40 => SpeedInfo {
                    label: "USB4 40 Gbps",
                    bits_per_second: 40_000_000_000,
                },
                SpeedCode::Gbps80 => SpeedInfo {
                    label: "USB4 80 Gbps",
                    bits_per_second: 80_000_000_000,
                },
                SpeedCode::Unknown => SpeedInfo {
                    label: "USB1.1 Full Speed 12Mbps",
                    bits_per_second: 12_000_000,
                },
            }
        } else if self.low_speed() {
            SpeedInfo {
                label: "USB1.0 Low Speed 1.5 Mbps",
                bits_per_second: 1_500_000,
            }
        } else if self.high_speed() {
            SpeedInfo {
                label: "USB2.0 High Speed 480Mbps",
                bits_per_second: 480_000_000,
            }
        } else {
            SpeedInfo {
                label: "USB1.1 Full Speed 12Mbps",
                bits_per_second: 12_000_000,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usb2_powered_enabled_connected() {
        let s = PortState::from_raw(0x0103, false);
        assert!(s.powered());
        assert!(s.enabled());
        assert!(s.connected());
        assert_eq!(s.decoded_label(), "device_active");
    }

    #[test]
    fn usb3_power_bit_is_distinct_from_usb2() {
        // bit 0x0100 alone means nothing on a super-speed port.
        let s = PortState::from_raw(0x0100, true);
        assert!(!s.powered());
        assert_eq!(s.decoded_label(), "no_power");

        let s = PortState::from_raw(0x0200 | 0x0001, true);
        assert!(s.powered());
        assert!(s.connected());
    }

    #[test]
    fn link_state_decode() {
        let s = PortState::from_raw(0x0200 | 0x0001 | 0x0002 | 0x0020, true);
        assert_eq!(s.link_state().unwrap().as_str(), "U1");
    }

    #[test]
    fn speed_code_decode() {
        let s = PortState::from_raw(0x0200 | 0x0001 | 0x0400, true);
        assert!(matches!(s.speed_code(), Some(SpeedCode::Gbps10)));
    }

    #[test]
    fn zero_status_is_no_power() {
        let s = PortState::from_raw(0x0000, false);
        assert_eq!(s.decoded_label(), "no_power");
    }

    #[test]
    fn priority_overcurrent_wins_over_no_power() {
        // overcurrent set, power bit clear: overcurrent still takes priority.
        let s = PortState::from_raw(0x0008, false);
        assert_eq!(s.decoded_label(), "overcurrent");
    }

    #[test]
    fn round_trip_modeled_bits() {
        let raw = 0x0103u16;
        let s = PortState::from_raw(raw, false);
        assert_eq!(s.raw(), raw);
    }
}
