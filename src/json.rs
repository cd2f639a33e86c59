//! Tagged-variant JSON value type and emitter: a `Value` enum built
//! programmatically and rendered with correct string escaping, used for
//! both the event stream and the status document.

use std::fmt::Write as _;

use crate::hub::HubRecord;
use crate::port_status::PortState;

/// A JSON value built programmatically rather than parsed.
pub enum Value {
    /// JSON `null`.
    Null,
    /// JSON `true`/`false`.
    Bool(bool),
    /// JSON integer.
    Int(i64),
    /// JSON floating-point number.
    Float(f64),
    /// JSON string.
    Str(String),
    /// JSON array.
    Array(Vec<Value>),
    /// JSON object, rendered in the given field order.
    Object(Vec<(&'static str, Value)>),
}

impl Value {
    /// Build a `Value::Str` from anything string-like.
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    fn write_escaped(s: &str, out: &mut String) {
        out.push('"');
        for c in s.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\u{8}' => out.push_str("\\b"),
                '\u{c}' => out.push_str("\\f"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => {
                    let _ = write!(out, "\\u{:04x}", c as u32);
                }
                c => out.push(c),
            }
        }
        out.push('"');
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("null"),
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Float(f) => {
                let _ = write!(out, "{f}");
            }
            Self::Str(s) => Self::write_escaped(s, out),
            Self::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write(out);
                }
                out.push(']');
            }
            Self::Object(fields) => {
                out.push('{');
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    Self::write_escaped(key, out);
                    out.push(':');
                    value.write(out);
                }
                out.push('}');
            }
        }
    }
}

/// One event-stream object.
pub enum Event {
    /// Announces which hub a phase is about to act on.
    HubStatus {
        /// The hub's location string.
        hub: String,
        /// The hub's composed description.
        description: String,
    },
    /// One port power transition attempt.
    PowerChange {
        /// The hub's location string.
        hub: String,
        /// 1-based port number.
        port: u8,
        /// `"on"` or `"off"`.
        action: &'static str,
        /// The port's decoded label before the transition.
        from_state: &'static str,
        /// `"on"` or `"off"`, the requested target.
        to_state: &'static str,
        /// Whether the transition succeeded.
        success: bool,
    },
    /// A sleep between the off and on phases of cycle/flash.
    Delay {
        /// `"power_cycle"` or `"power_flash"`.
        reason: &'static str,
        /// How long the delay lasted.
        duration_seconds: f64,
    },
    /// A bus-level reset issued after the on phase.
    HubReset {
        /// The hub's location string.
        hub: String,
        /// Whether the reset succeeded.
        success: bool,
    },
}

impl Event {
    /// Convert this event into the `Value` the event-stream line renders.
    pub fn to_value(&self) -> Value {
        match self {
            Self::HubStatus { hub, description } => Value::Object(vec![
                ("hub", Value::str(hub.clone())),
                ("description", Value::str(description.clone())),
            ]),
            Self::PowerChange {
                hub,
                port,
                action,
                from_state,
                to_state,
                success,
            } => Value::Object(vec![
                ("hub", Value::str(hub.clone())),
                ("port", Value::Int(*port as i64)),
                ("action", Value::str(*action)),
                ("from_state", Value::str(*from_state)),
                ("to_state", Value::str(*to_state)),
                ("success", Value::Bool(*success)),
            ]),
            Self::Delay {
                reason,
                duration_seconds,
            } => Value::Object(vec![
                ("reason", Value::str(*reason)),
                ("duration_seconds", Value::Float(*duration_seconds)),
            ]),
            Self::HubReset { hub, success } => Value::Object(vec![
                ("hub", Value::str(hub.clone())),
                ("success", Value::Bool(*success)),
                (
                    "status",
                    Value::str(if *success { "successful" } else { "failed" }),
                ),
            ]),
        }
    }

    /// Render as the single line the event-stream mode writes to stdout.
    pub fn to_line(&self) -> String {
        self.to_value().render()
    }
}

/// The flag definitions shared by `flags_json` and `human_readable_json`:
/// key name, whether the flag is currently set, and its English sentence.
fn active_flag_defs(state: &PortState) -> Vec<(&'static str, bool, &'static str)> {
    vec![
        ("connection", state.connected(), "Device is connected"),
        ("enable", state.enabled(), "Port is enabled"),
        ("suspend", state.suspended(), "Port is suspended"),
        ("overcurrent", state.overcurrent(), "Over-current condition exists"),
        ("reset", state.in_reset(), "Port is in reset state"),
        ("power", state.powered(), "Port power is enabled"),
        ("lowspeed", state.low_speed(), "Low-speed device attached"),
        ("highspeed", state.high_speed(), "High-speed device attached"),
        ("test", state.test_mode(), "Port is in test mode"),
        ("indicator", state.indicator(), "Port indicator control"),
    ]
}

/// `{"connection": true, "enabled": true, ...}` — all eight bits, always
/// present regardless of whether they're set.
fn status_bits_json(state: &PortState) -> Value {
    Value::Object(vec![
        ("connection", Value::Bool(state.connected())),
        ("enabled", Value::Bool(state.enabled())),
        ("powered", Value::Bool(state.powered())),
        ("suspended", Value::Bool(state.suspended())),
        ("overcurrent", Value::Bool(state.overcurrent())),
        ("reset", Value::Bool(state.in_reset())),
        ("highspeed", Value::Bool(state.high_speed())),
        ("lowspeed", Value::Bool(state.low_speed())),
    ])
}

/// `{"connection": true, ...}` — only the flags currently set.
fn flags_json(state: &PortState) -> Value {
    Value::Object(
        active_flag_defs(state)
            .into_iter()
            .filter(|(_, set, _)| *set)
            .map(|(name, _, _)| (name, Value::Bool(true)))
            .collect(),
    )
}

/// `{"connection": "Device is connected", ...}` — only the flags currently
/// set, each mapped to a short English sentence.
fn human_readable_json(state: &PortState) -> Value {
    Value::Object(
        active_flag_defs(state)
            .into_iter()
            .filter(|(_, set, _)| *set)
            .map(|(name, _, description)| (name, Value::str(description)))
            .collect(),
    )
}

fn port_json(port: u8, state: &PortState, attached: Option<&crate::device_desc::DeviceSummary>) -> Value {
    let speed = state.speed_info();
    let mut fields: Vec<(&'static str, Value)> = vec![
        ("port", Value::Int(port as i64)),
        (
            "status",
            Value::Object(vec![
                ("raw", Value::str(format!("0x{:04x}", state.raw()))),
                ("decoded", Value::str(state.decoded_label())),
                ("bits", status_bits_json(state)),
            ]),
        ),
        ("flags", flags_json(state)),
        ("human_readable", human_readable_json(state)),
        ("speed", Value::str(speed.label)),
        ("speed_bps", Value::Int(speed.bits_per_second)),
    ];

    if let Some(link_state) = state.link_state() {
        fields.push(("link_state", Value::str(link_state.as_str())));
    }
    if state.super_speed() {
        if let Some(code) = state.speed_code() {
            fields.push(("port_speed", Value::str(format!("{code:?}"))));
        }
    }

    if let Some(device) = attached {
        fields.push(("vid", Value::str(format!("{:04x}", device.vendor_id))));
        fields.push(("pid", Value::str(format!("{:04x}", device.product_id))));
        if !device.vendor.is_empty() {
            fields.push(("vendor", Value::str(device.vendor.clone())));
        }
        if !device.product.is_empty() {
            fields.push(("product", Value::str(device.product.clone())));
        }
        fields.push(("device_class", Value::Int(device.device_class as i64)));
        fields.push(("class_name", Value::str(device.class_name.clone())));
        fields.push((
            "usb_version",
            Value::str(format!("{:x}.{:02x}", device.usb_version >> 8, device.usb_version & 0xff)),
        ));
        fields.push(("device_version", Value::Int(device.device_version as i64)));
        if !device.serial.is_empty() {
            fields.push(("serial", Value::str(device.serial.clone())));
        }
        if device.is_mass_storage {
            fields.push(("is_mass_storage", Value::Bool(true)));
        }
        fields.push(("description", Value::str(device.description.clone())));
    }

    Value::Object(fields)
}

/// Build one hub's JSON object for the status document.
pub fn hub_json(
    hub: &HubRecord,
    ports: &[PortState],
    attached: &[Option<crate::device_desc::DeviceSummary>],
    ports_mask: u32,
) -> Value {
    let port_values: Vec<Value> = ports
        .iter()
        .enumerate()
        .filter(|(i, _)| ports_mask & (1 << i) != 0)
        .map(|(i, state)| port_json(i as u8 + 1, state, attached.get(i).and_then(|d| d.as_ref())))
        .collect();

    Value::Object(vec![
        ("location", Value::str(hub.location.clone())),
        ("description", Value::str(hub.description.description.clone())),
        (
            "hub_info",
            Value::Object(vec![
                ("vid", Value::str(format!("0x{:04x}", hub.info.vendor_id()))),
                ("pid", Value::str(format!("0x{:04x}", hub.info.product_id()))),
                (
                    "usb_version",
                    Value::str(format!("{:x}.{:02x}", hub.bcd_usb >> 8, hub.bcd_usb & 0xff)),
                ),
                ("nports", Value::Int(hub.nports as i64)),
                ("ppps", Value::str(hub.lpsm.as_tag())),
            ]),
        ),
        ("ports", Value::Array(port_values)),
    ])
}

/// Build `{"hubs": [...]}` for the `keep` (status-only) action.
pub fn status_document(hubs: &[(&HubRecord, Vec<PortState>, Vec<Option<crate::device_desc::DeviceSummary>>)], ports_mask: u32) -> Value {
    let hub_values = hubs
        .iter()
        .map(|(hub, ports, attached)| hub_json(hub, ports, attached, ports_mask))
        .collect();
    Value::Object(vec![("hubs", Value::Array(hub_values))])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_control_characters() {
        let v = Value::str("a\"b\\c\nd\u{1}e");
        assert_eq!(v.render(), "\"a\\\"b\\\\c\\nd\\u0001e\"");
    }

    #[test]
    fn object_field_order_is_insertion_order() {
        let v = Value::Object(vec![("a", Value::Int(1)), ("b", Value::Bool(true))]);
        assert_eq!(v.render(), "{\"a\":1,\"b\":true}");
    }

    #[test]
    fn array_of_objects() {
        let v = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(v.render(), "[1,2]");
    }

    #[test]
    fn power_change_event_shape() {
        let e = Event::PowerChange {
            hub: "1-1".to_string(),
            port: 2,
            action: "off",
            from_state: "device_active",
            to_state: "off",
            success: true,
        };
        let line = e.to_line();
        assert!(line.contains("\"port\":2"));
        assert!(line.contains("\"action\":\"off\""));
    }

    #[test]
    fn status_bits_json_always_carries_all_eight_keys() {
        let state = PortState::from_raw(0x0000, false);
        let v = status_bits_json(&state).render();
        for key in [
            "connection",
            "enabled",
            "powered",
            "suspended",
            "overcurrent",
            "reset",
            "highspeed",
            "lowspeed",
        ] {
            assert!(v.contains(&format!("\"{key}\":false")), "missing {key} in {v}");
        }
    }

    #[test]
    fn flags_json_only_includes_set_flags() {
        let state = PortState::from_raw(0x0103, false); // connection + enable + power
        let v = flags_json(&state).render();
        assert!(v.contains("\"connection\":true"));
        assert!(v.contains("\"enable\":true"));
        assert!(v.contains("\"power\":true"));
        assert!(!v.contains("suspend"));
        assert!(!v.contains("overcurrent"));
    }

    #[test]
    fn human_readable_json_maps_set_flags_to_sentences() {
        let state = PortState::from_raw(0x0103, false);
        let v = human_readable_json(&state).render();
        assert!(v.contains("\"connection\":\"Device is connected\""));
        assert!(v.contains("\"power\":\"Port power is enabled\""));
    }
}
