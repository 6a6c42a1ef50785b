mod cli;
mod config;
mod logging;
mod report;

use std::process::ExitCode;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use crossbeam_channel::{select, unbounded};
use hidbus::{Bus, BusOptions, Notification};

use crate::cli::{Cli, Command};
use crate::report::{describe, hex, spawn_dump};

fn run(options: &BusOptions, dump_reports: bool) -> Result<(), hidbus::Error> {
    let (stop_tx, stop_rx) = unbounded::<()>();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        print_warning!("failed to set Ctrl+C handler: {e}");
    }

    let mut bus = Bus::start(options)?;
    let rx = bus.subscribe();
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    print_info!("hidbusd started with backends: {:?}", bus.backends());

    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(rx) -> msg => match msg {
                Ok(Notification::Arrived(info)) => {
                    let Some(device) = bus.device(info.reference) else {
                        continue;
                    };
                    print_info!("arrived {}", describe(&device));
                    if dump_reports {
                        match spawn_dump(device) {
                            Ok(reader) => readers.push(reader),
                            Err(e) => {
                                print_error!("failed to start reader for {}: {e}", info.reference);
                            }
                        }
                    }
                }
                Ok(Notification::Removed(info)) => {
                    print_info!("removed {} {}", info.reference, info.desc);
                }
                Err(err) => {
                    print_error!("notification channel closed: {err}");
                    break;
                }
            }
        }
        readers.retain(|reader| !reader.is_finished());
    }

    print_info!("stopping");
    bus.stop();
    for reader in readers {
        let _ = reader.join();
    }
    Ok(())
}

fn list(options: &BusOptions, wait_ms: u64) -> Result<(), hidbus::Error> {
    let bus = Bus::start(options)?;
    thread::sleep(Duration::from_millis(wait_ms));
    for info in bus.devices() {
        let Some(device) = bus.device(info.reference) else {
            continue;
        };
        print_info!("{}", describe(&device));
        print_info!("  {}", hex(device.report_descriptor()).dimmed());
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if logging::setup(cli.verbose, cli.no_color).is_err() {
        return ExitCode::FAILURE;
    }

    let mut options = match config::load(cli.config.as_deref()) {
        Ok(options) => options,
        Err(e) => {
            print_error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    cli.backends.apply(&mut options);
    print_debug!("options: {options:?}");

    let result = match cli.command {
        Command::Run { dump_reports } => run(&options, dump_reports),
        Command::List { wait_ms } => list(&options, wait_ms),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error!("{e}");
            ExitCode::FAILURE
        }
    }
}
