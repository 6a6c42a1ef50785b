use std::path::{Path, PathBuf};
use std::{fs, io};

use colored::Colorize;
use hidbus::{parse_options, BusOptions};
use thiserror::Error;

use crate::print_warning;

const DEFAULT_CONFIG: &str = "hidbus.yaml";

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: hidbus::Error },
}

fn default_path() -> PathBuf {
    std::env::current_dir()
        .map(|dir| dir.join(DEFAULT_CONFIG))
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG))
}

/// Loads bus options from `path`, or `hidbus.yaml` in the working
/// directory. A missing file yields the defaults.
pub(crate) fn load(path: Option<&Path>) -> Result<BusOptions, ConfigError> {
    let path = path.map_or_else(default_path, Path::to_path_buf);
    let input = match fs::read_to_string(&path) {
        Ok(input) => input,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            print_warning!("{} not found, using default options", path.display());
            return Ok(BusOptions::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    parse_options(&input).map_err(|source| ConfigError::Parse { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("hidbusd-{}-{name}", std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("hidbusd-does-not-exist.yaml");
        assert_eq!(load(Some(&path)).unwrap(), BusOptions::default());
    }

    #[test]
    fn reads_options_from_file() {
        let path = temp_file("ok.yaml", "udev:\n  disable_input: true\n");
        let options = load(Some(&path)).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(options.udev.disable_input);
        assert!(options.sdl.enabled);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = temp_file("bad.yaml", "sdl: [1, 2\n");
        let err = load(Some(&path)).unwrap_err();
        fs::remove_file(&path).unwrap();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
