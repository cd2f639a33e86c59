//! Port controller and two-phase action orchestrator: turns selected ports
//! off and/or on across every actionable hub and reports each step.

use std::time::Duration;

use log::{trace, warn};
use nusb::MaybeFuture;
use nusb::transfer::{Control, ControlType, Recipient};

use crate::hub::{Actionable, HubRecord};
use crate::json::Event;
use crate::platform;
use crate::port_status::PortState;
use crate::Error;

const REQUEST_GET_STATUS: u8 = 0x00;
const REQUEST_SET_FEATURE: u8 = 0x03;
const REQUEST_CLEAR_FEATURE: u8 = 0x01;
const PORT_FEATURE_POWER: u16 = 8;
const CONTROL_TIMEOUT: Duration = Duration::from_millis(5000);
/// Settle time after a SuperSpeed hub's off phase before any status re-read.
const SUPER_SPEED_SETTLE_MS: u64 = 150;

/// The six abstract port-power actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Turn the selected ports off.
    Off,
    /// Turn the selected ports on.
    On,
    /// Turn off, wait `delay` seconds, then turn on.
    Cycle,
    /// Invert each selected port's current power state.
    Toggle,
    /// Turn on, wait `delay` seconds, then turn off.
    Flash,
    /// Read-only: report status without changing any port.
    Keep,
}

impl Action {
    /// Accepts both the word and numeric tokens from `--action`.
    pub fn parse(token: &str) -> Result<Self, Error> {
        match token {
            "off" | "0" => Ok(Self::Off),
            "on" | "1" => Ok(Self::On),
            "cycle" | "2" => Ok(Self::Cycle),
            "toggle" | "3" => Ok(Self::Toggle),
            "flash" | "4" => Ok(Self::Flash),
            "keep" => Ok(Self::Keep),
            other => Err(Error::UsageError(format!("unknown action {other:?}"))),
        }
    }

    /// Which `k` phases this action drives.
    fn phases(self) -> &'static [u8] {
        match self {
            Self::Off => &[0],
            Self::On => &[1],
            Self::Cycle => &[0, 1],
            Self::Toggle => &[0],
            Self::Flash => &[0, 1],
            Self::Keep => &[],
        }
    }
}

/// Parameters the orchestrator needs beyond the hub list itself.
pub struct RunOptions {
    /// Which abstract action to drive.
    pub action: Action,
    /// 1-based port bitmask, narrowed already by `--search` if used.
    pub ports_mask: u32,
    /// Seconds to wait between the off and on phases of cycle/flash.
    pub delay_seconds: f64,
    /// Number of off-direction attempts per port.
    pub repeat: u32,
    /// Milliseconds between off-direction retries.
    pub wait_ms: u64,
    /// Skip the sysfs fast path, always use a control transfer.
    pub nosysfs: bool,
    /// Issue a bus-level reset on the hub after the on phase.
    pub reset: bool,
    /// Whether USB2/USB3 pairing was disabled, for the physical-hub count.
    pub exact: bool,
}

/// Read the current port status word via GET_STATUS.
fn read_port_status(device: &nusb::Device, port: u8) -> Result<PortState, Error> {
    let mut buf = [0u8; 4];
    let len = device.control_in_blocking(
        Control {
            control_type: ControlType::Class,
            recipient: Recipient::Other,
            request: REQUEST_GET_STATUS,
            value: 0,
            index: port as u16,
        },
        &mut buf,
        CONTROL_TIMEOUT,
    )?;
    if len < 4 {
        return Err(Error::InvalidRespone);
    }
    Ok(PortState::from_raw(u16::from_le_bytes([buf[0], buf[1]]), false))
}

/// Read every port of a hub, tagging each with the hub's own `super_speed`.
pub fn read_all_ports(device: &nusb::Device, nports: u8, super_speed: bool) -> Vec<PortState> {
    (1..=nports)
        .map(|port| {
            read_port_status(device, port)
                .map(|s| PortState::from_raw(s.raw(), super_speed))
                .unwrap_or_else(|e| {
                    warn!("failed to read port {port} status: {e}");
                    PortState::from_raw(0, super_speed)
                })
        })
        .collect()
}

fn control_transfer_set_power(device: &nusb::Device, port: u8, on: bool) -> Result<(), Error> {
    trace!("control transfer: {} port power, port {port}", if on { "set" } else { "clear" });
    device.control_out_blocking(
        Control {
            control_type: ControlType::Class,
            recipient: Recipient::Other,
            request: if on { REQUEST_SET_FEATURE } else { REQUEST_CLEAR_FEATURE },
            value: PORT_FEATURE_POWER,
            index: port as u16,
        },
        &[],
        CONTROL_TIMEOUT,
    )?;
    Ok(())
}

/// Try the sysfs fast path, fall back to a control transfer.
fn set_port_power_once(
    hub: &HubRecord,
    device: &nusb::Device,
    port: u8,
    on: bool,
    nosysfs: bool,
) -> Result<(), Error> {
    if !nosysfs {
        if let Some(result) = platform::try_sysfs_set_power(hub.bus, &hub.port_numbers, port, on) {
            match result {
                Ok(()) => return Ok(()),
                Err(e) => warn!("sysfs power write failed for {}, port {port}: {e}", hub.location),
            }
        }
    }
    control_transfer_set_power(device, port, on)
}

/// The off direction repeats up to `repeat` times; on is always attempted
/// exactly once.
fn set_port_power(
    hub: &HubRecord,
    device: &nusb::Device,
    port: u8,
    on: bool,
    repeat: u32,
    wait_ms: u64,
    nosysfs: bool,
) -> Result<(), Error> {
    if on {
        return set_port_power_once(hub, device, port, true, nosysfs);
    }
    let attempts = repeat.max(1);
    let mut last = Ok(());
    for attempt in 0..attempts {
        last = set_port_power_once(hub, device, port, false, nosysfs);
        if attempt + 1 < attempts {
            platform::sleep_ms(wait_ms);
        }
    }
    last
}

/// Drive the two-phase off/on loop across every actionable hub and masked
/// port, emitting one `Event` per observable step.
pub fn run_action(
    hubs: &[HubRecord],
    opts: &RunOptions,
    mut emit: impl FnMut(Event),
) -> Result<(), Error> {
    if opts.action != Action::Keep {
        let physical_hub_count = hubs
            .iter()
            .filter(|h| h.counts_as_physical_hub(opts.exact))
            .count();
        if physical_hub_count > 1 {
            return Err(Error::AmbiguousScope);
        }
    }

    let phases = opts.action.phases();
    for (phase_index, &k) in phases.iter().enumerate() {
        for hub in hubs {
            if hub.actionable == Actionable::Skipped {
                continue;
            }
            let device = match hub.info.open().wait() {
                Ok(d) => d,
                Err(e) => {
                    warn!("failed to open {} for power control: {e}", hub.location);
                    continue;
                }
            };

            emit(Event::HubStatus {
                hub: hub.location.clone(),
                description: hub.description.description.clone(),
            });

            let ports_mask = ((1u32 << hub.nports) - 1) & opts.ports_mask;
            for port in 1..=hub.nports {
                if ports_mask & (1 << (port - 1)) == 0 {
                    continue;
                }

                let before = match read_port_status(&device, port) {
                    Ok(s) => PortState::from_raw(s.raw(), hub.super_speed),
                    Err(e) => {
                        warn!("failed to read {} port {port}: {e}", hub.location);
                        continue;
                    }
                };
                let is_on = before.powered();

                let target = match opts.action {
                    Action::Toggle => !is_on,
                    Action::Flash => k == 0,
                    _ => k == 1,
                };

                if is_on == target && opts.action != Action::Toggle {
                    continue;
                }

                let result = set_port_power(
                    hub,
                    &device,
                    port,
                    target,
                    opts.repeat,
                    opts.wait_ms,
                    opts.nosysfs,
                );
                let success = result.is_ok();
                if let Err(ref e) = result {
                    warn!("power transition failed on {} port {port}: {e}", hub.location);
                }

                emit(Event::PowerChange {
                    hub: hub.location.clone(),
                    port,
                    action: if target { "on" } else { "off" },
                    from_state: before.decoded_label(),
                    to_state: if target { "on" } else { "off" },
                    success,
                });
            }

            if hub.super_speed && k == 0 {
                platform::sleep_ms(SUPER_SPEED_SETTLE_MS);
            }

            if opts.reset && k == 1 {
                let reset_result = device.reset().wait();
                emit(Event::HubReset {
                    hub: hub.location.clone(),
                    success: reset_result.is_ok(),
                });
            }
        }

        let is_last_phase = phase_index + 1 == phases.len();
        if !is_last_phase && matches!(opts.action, Action::Cycle | Action::Flash) {
            let reason = if opts.action == Action::Cycle {
                "power_cycle"
            } else {
                "power_flash"
            };
            emit(Event::Delay {
                reason,
                duration_seconds: opts.delay_seconds,
            });
            platform::sleep_ms((opts.delay_seconds * 1000.0) as u64);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parses_word_and_numeric_tokens() {
        assert_eq!(Action::parse("off").unwrap(), Action::Off);
        assert_eq!(Action::parse("2").unwrap(), Action::Cycle);
        assert!(Action::parse("bogus").is_err());
    }

    #[test]
    fn toggle_runs_a_single_phase() {
        assert_eq!(Action::Toggle.phases(), &[0]);
    }

    #[test]
    fn cycle_and_flash_run_both_phases() {
        assert_eq!(Action::Cycle.phases(), &[0, 1]);
        assert_eq!(Action::Flash.phases(), &[0, 1]);
    }

    #[test]
    fn keep_runs_no_phases() {
        assert!(Action::Keep.phases().is_empty());
    }
}
