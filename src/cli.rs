//! Command-line surface, mirrored with `clap::Parser` derive.

use clap::Parser;

use crate::control::Action;
use crate::hub::ports2bitmap;
use crate::Error;

fn parse_action(token: &str) -> Result<Action, String> {
    Action::parse(token).map_err(|e| e.to_string())
}

fn parse_ports(spec: &str) -> Result<u32, String> {
    ports2bitmap(spec).map_err(|e| e.to_string())
}

/// Inspect and control per-port power on USB hubs with per-port power
/// switching (PPPS).
#[derive(Parser, Debug)]
#[command(name = "uhub-power", version, about)]
pub struct Cli {
    /// Limit to hubs matching this location string exactly.
    #[arg(short = 'l', long)]
    pub location: Option<String>,

    /// Limit to hubs at this depth (root hubs are level 1).
    #[arg(short = 'L', long)]
    pub level: Option<usize>,

    /// Case-insensitive "vvvv:pppp" prefix filter.
    #[arg(short = 'n', long)]
    pub vendor: Option<String>,

    /// Select hubs with an attached device whose description contains this.
    #[arg(short = 's', long)]
    pub search: Option<String>,

    /// Select hubs whose own description contains this (case-sensitive).
    #[arg(short = 'H', long = "searchhub")]
    pub search_hub: Option<String>,

    /// "all", a comma list, or ranges like "1,3-5".
    #[arg(short = 'p', long, default_value = "all", value_parser = parse_ports)]
    pub ports: u32,

    /// off, on, cycle, toggle, flash, keep (or their numeric aliases).
    #[arg(short = 'a', long, default_value = "keep", value_parser = parse_action)]
    pub action: Action,

    /// Delay in seconds between the off and on phases of cycle/flash.
    #[arg(short = 'd', long, default_value_t = 2.0)]
    pub delay: f64,

    /// Number of times to retry an off request.
    #[arg(short = 'r', long, default_value_t = 1)]
    pub repeat: u32,

    /// Milliseconds to wait between off retries.
    #[arg(short = 'w', long, default_value_t = 20)]
    pub wait: u64,

    /// Disable USB2/USB3 dual-hub pairing.
    #[arg(short = 'e', long)]
    pub exact: bool,

    /// Allow operating on hubs that do not report per-port power switching.
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Skip reading device description strings.
    #[arg(short = 'N', long)]
    pub nodesc: bool,

    /// Always use a USB control transfer, skipping the sysfs fast path.
    #[cfg(target_os = "linux")]
    #[arg(short = 'S', long)]
    pub nosysfs: bool,

    /// Wrap an already-open device file descriptor instead of enumerating.
    #[cfg(target_os = "linux")]
    #[arg(short = 'y', long)]
    pub sysdev: Option<String>,

    /// Issue a bus-level reset after the on phase.
    #[arg(short = 'R', long)]
    pub reset: bool,

    /// Emit JSON instead of text.
    #[arg(short = 'j', long)]
    pub json: bool,
}

impl Cli {
    /// Whether the sysfs fast path should be skipped. Always `false` off
    /// Linux, since there is no sysfs fast path to skip.
    #[cfg(not(target_os = "linux"))]
    pub fn nosysfs(&self) -> bool {
        false
    }

    /// Whether `--nosysfs` was passed.
    #[cfg(target_os = "linux")]
    pub fn nosysfs(&self) -> bool {
        self.nosysfs
    }
}

/// Parsed and validated options, the shape `main` hands to `hub`/`control`.
pub fn parse() -> Result<Cli, Error> {
    Cli::try_parse().map_err(|e| Error::UsageError(e.to_string()))
}
