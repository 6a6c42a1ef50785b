use serde::Deserialize;

use crate::error::Result;

/// Bus configuration, consumed once at start.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusOptions {
    /// Registers the virtual mouse and keyboard.
    pub pseudo_devices: bool,
    pub sdl: SdlOptions,
    pub udev: UdevOptions,
    pub platform: PlatformOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdlOptions {
    pub enabled: bool,
    /// Remaps devices with a known controller mapping to the canonical layout.
    pub map_controllers: bool,
    /// Extra controller mappings in SDL's mapping string format.
    pub mappings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UdevOptions {
    pub enabled: bool,
    pub disable_hidraw: bool,
    pub disable_input: bool,
    /// Remaps evdev gamepads to the canonical layout.
    pub map_controllers: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformOptions {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub rescan_interval_ms: u64,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            pseudo_devices: true,
            sdl: SdlOptions::default(),
            udev: UdevOptions::default(),
            platform: PlatformOptions::default(),
        }
    }
}

impl Default for SdlOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            map_controllers: true,
            mappings: Vec::new(),
        }
    }
}

impl Default for UdevOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            disable_hidraw: false,
            disable_input: false,
            map_controllers: true,
        }
    }
}

impl Default for PlatformOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 4,
            rescan_interval_ms: 1000,
        }
    }
}

/// Parse yaml bus options. An empty document yields the defaults.
pub fn parse_options(input: &str) -> Result<BusOptions> {
    if input.trim().is_empty() {
        return Ok(BusOptions::default());
    }
    Ok(serde_yaml::from_str(input)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn empty_input_is_default() {
        assert_eq!(parse_options("").unwrap(), BusOptions::default());
        assert_eq!(parse_options("\n  \n").unwrap(), BusOptions::default());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let yaml = r#"
pseudo_devices: false
sdl:
  enabled: false
  mappings:
    - "03000000de280000ff11000001000000,Steam Virtual Gamepad,a:b0,b:b1"
udev:
  disable_hidraw: true
platform:
  poll_interval_ms: 10
"#;
        let options = parse_options(yaml).unwrap();
        assert!(!options.pseudo_devices);
        assert!(!options.sdl.enabled);
        assert!(options.sdl.map_controllers);
        assert_eq!(options.sdl.mappings.len(), 1);
        assert!(options.udev.enabled);
        assert!(options.udev.disable_hidraw);
        assert!(!options.udev.disable_input);
        assert_eq!(options.platform.poll_interval_ms, 10);
        assert_eq!(options.platform.rescan_interval_ms, 1000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            parse_options("sdl:\n  enable: true\n"),
            Err(Error::Options(_))
        ));
    }
}
