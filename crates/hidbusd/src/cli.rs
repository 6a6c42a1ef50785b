use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use hidbus::BusOptions;

#[derive(Debug, Subcommand, PartialEq)]
pub(crate) enum Command {
    /// Run the bus in the foreground until Ctrl-C.
    Run {
        /// Log every input report in hex
        #[clap(short, long)]
        dump_reports: bool,
    },
    /// Print the devices found after enumeration and exit.
    List {
        /// How long to wait for backends to enumerate
        #[clap(short, long, default_value_t = 1000)]
        wait_ms: u64,
    },
}

/// Switches that override the configuration file.
#[derive(Debug, Args, Default, PartialEq)]
pub(crate) struct BackendFlags {
    /// Disable the SDL backend
    #[arg(long)]
    pub no_sdl: bool,

    /// Disable the udev backend
    #[arg(long)]
    pub no_udev: bool,

    /// Disable the platform HID backend
    #[arg(long)]
    pub no_platform: bool,

    /// Skip hidraw nodes
    #[arg(long)]
    pub no_hidraw: bool,

    /// Skip evdev nodes
    #[arg(long)]
    pub no_input: bool,

    /// Describe gamepads literally instead of with the canonical layout
    #[arg(long)]
    pub no_map_controllers: bool,
}

impl BackendFlags {
    pub fn apply(&self, options: &mut BusOptions) {
        if self.no_sdl {
            options.sdl.enabled = false;
        }
        if self.no_udev {
            options.udev.enabled = false;
        }
        if self.no_platform {
            options.platform.enabled = false;
        }
        if self.no_hidraw {
            options.udev.disable_hidraw = true;
        }
        if self.no_input {
            options.udev.disable_input = true;
        }
        if self.no_map_controllers {
            options.sdl.map_controllers = false;
            options.udev.map_controllers = false;
        }
    }
}

/// Exposes game controllers and other input devices as HID devices.
#[derive(Parser)]
#[command(version, about, long_about = None)]
pub(crate) struct Cli {
    /// Turn debugging information on
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Bus configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub backends: BackendFlags,

    /// The command to run
    #[clap(subcommand)]
    pub command: Command,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_options() {
        let cli = Cli::parse_from([
            "hidbusd",
            "--no-sdl",
            "--no-hidraw",
            "--no-map-controllers",
            "run",
            "--dump-reports",
        ]);
        assert_eq!(cli.command, Command::Run { dump_reports: true });

        let mut options = BusOptions::default();
        cli.backends.apply(&mut options);
        assert!(!options.sdl.enabled);
        assert!(options.udev.enabled);
        assert!(options.udev.disable_hidraw);
        assert!(!options.udev.disable_input);
        assert!(!options.sdl.map_controllers);
        assert!(!options.udev.map_controllers);
        assert!(options.platform.enabled);
    }

    #[test]
    fn no_flags_keep_options() {
        let cli = Cli::parse_from(["hidbusd", "-c", "bus.yaml", "list"]);
        assert_eq!(cli.command, Command::List { wait_ms: 1000 });
        assert_eq!(cli.config, Some(PathBuf::from("bus.yaml")));

        let mut options = BusOptions::default();
        cli.backends.apply(&mut options);
        assert_eq!(options, BusOptions::default());
    }
}
