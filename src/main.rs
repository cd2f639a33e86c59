use std::process::ExitCode;

use log::error;
use nusb::MaybeFuture;
use uhub_power::cli::{self};
use uhub_power::control::{self, Action, RunOptions};
use uhub_power::device_desc::{self, DeviceSummary};
use uhub_power::hub::{self, Filters, HubRecord};
use uhub_power::json::{self, Event};
use uhub_power::platform;
use uhub_power::port_status::PortState;
use uhub_power::Error;

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("uhub-power: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Error> {
    let cli = cli::parse()?;

    let quirks = platform::check_computer_model();
    let (mut hubs, _perm_fault) = hub::discover(quirks, cli.force)?;

    let children: Vec<_> = nusb::list_devices().wait()?.collect();

    let ports_mask = hub::apply_filters(
        &mut hubs,
        &children,
        &Filters {
            location: cli.location.as_deref(),
            level: cli.level,
            vendor: cli.vendor.as_deref(),
            search_hub: cli.search_hub.as_deref(),
            search_device: cli.search.as_deref(),
        },
        cli.ports,
    );

    hub::resolve_pairing(&mut hubs, quirks, cli.exact);

    if !hubs.iter().any(|h| h.actionable != hub::Actionable::Skipped) {
        return Err(Error::NoActionableHubs);
    }

    let run_opts = RunOptions {
        action: cli.action,
        ports_mask,
        delay_seconds: cli.delay,
        repeat: cli.repeat,
        wait_ms: cli.wait,
        nosysfs: cli.nosysfs(),
        reset: cli.reset,
        exact: cli.exact,
    };

    let mut events = Vec::new();
    control::run_action(&hubs, &run_opts, |event| events.push(event))?;

    if cli.json {
        for event in &events {
            println!("{}", event.to_line());
        }
        if cli.action == Action::Keep {
            print_status_document(&hubs, &children, ports_mask, cli.nodesc)?;
        }
    } else {
        for event in &events {
            print_event_text(event);
        }
        if cli.action == Action::Keep {
            print_status_text(&hubs, &children, ports_mask, cli.nodesc)?;
        }
    }

    Ok(())
}

fn print_event_text(event: &Event) {
    match event {
        Event::HubStatus { hub, description } => {
            println!("Current status for hub {hub} [{description}]");
        }
        Event::PowerChange {
            hub,
            port,
            action,
            success,
            ..
        } => {
            println!(
                "  Port {port}: turning {action} ({hub}){}",
                if *success { "" } else { ", failed" }
            );
        }
        Event::Delay {
            reason,
            duration_seconds,
        } => {
            println!("  waiting {duration_seconds}s ({reason})");
        }
        Event::HubReset { hub, success } => {
            println!(
                "  resetting hub {hub}: {}",
                if *success { "successful" } else { "failed" }
            );
        }
    }
}

type HubReport<'a> = (&'a HubRecord, Vec<PortState>, Vec<Option<DeviceSummary>>);

/// For each actionable hub, open it, read every port, and read the
/// attached child's description (unless `--nodesc`). Shared by the text
/// and JSON reporting paths.
fn collect_report<'a>(
    hubs: &'a [HubRecord],
    children: &[nusb::DeviceInfo],
    nodesc: bool,
) -> Vec<HubReport<'a>> {
    hubs.iter()
        .filter(|h| h.actionable != hub::Actionable::Skipped)
        .filter_map(|h| {
            let device = h.info.open().wait().ok()?;
            let ports = control::read_all_ports(&device, h.nports, h.super_speed);
            let attached = ports
                .iter()
                .enumerate()
                .map(|(i, state)| {
                    if !state.connected() {
                        return None;
                    }
                    let port = i as u8 + 1;
                    children
                        .iter()
                        .find(|c| {
                            c.busnum() == h.bus
                                && c.port_chain().len() == h.pn_len + 1
                                && c.port_chain()[..h.pn_len] == h.port_numbers[..]
                                && c.port_chain()[h.pn_len] == port
                        })
                        .map(|child| device_desc::describe_device(child, None, nodesc, None))
                })
                .collect();
            Some((h, ports, attached))
        })
        .collect()
}

fn print_status_text(
    hubs: &[HubRecord],
    children: &[nusb::DeviceInfo],
    ports_mask: u32,
    nodesc: bool,
) -> Result<(), Error> {
    for (hub, ports, attached) in collect_report(hubs, children, nodesc) {
        println!(
            "Current status for hub {} [{}]",
            hub.location, hub.description.description
        );
        for (i, state) in ports.iter().enumerate() {
            if ports_mask & (1 << i) == 0 {
                continue;
            }
            let summary = attached.get(i).and_then(|d| d.as_ref());
            let suffix = summary
                .map(|d| format!(": {}", d.description))
                .unwrap_or_default();
            println!(
                "  Port {}: {:04x} {}{}",
                i + 1,
                state.raw(),
                state.decoded_label(),
                suffix
            );
        }
    }
    Ok(())
}

fn print_status_document(
    hubs: &[HubRecord],
    children: &[nusb::DeviceInfo],
    ports_mask: u32,
    nodesc: bool,
) -> Result<(), Error> {
    let report = collect_report(hubs, children, nodesc);
    let doc = json::status_document(&report, ports_mask);
    println!("{}", doc.render());
    Ok(())
}
