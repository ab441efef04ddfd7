use std::env::var_os;
use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;
use keyscan_gpio::keypad::{DEFAULT_POLL_INTERVAL, KeypadLayout, LayoutError};
use serde::{Serialize, Deserialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {cause}")]
    Read {
        path: String,
        cause: std::io::Error,
    },
    #[error("failed to parse config file {path}: {cause}")]
    Parse {
        path: String,
        cause: serde_json::Error,
    },
    #[error("invalid {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("invalid layout: {0}")]
    Layout(#[from] LayoutError),
}

/// Startup configuration.
///
/// Read from the JSON file named by `KEYSCAN_CONFIG` (`keyscan.json` by default) if it exists,
/// then overridden by `KEYSCAN_*` environment variables.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(default)]
pub struct Config {
    /// GPIO chip name or device path.
    pub chip: String,
    /// Row line offsets, top to bottom.
    pub rows: Vec<usize>,
    /// Column line offsets, left to right.
    pub cols: Vec<usize>,
    pub poll_interval_ms: u64,
    pub layout: Vec<Vec<String>>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config_str = var_os("KEYSCAN_CONFIG");
        let config_str: &OsStr = config_str.as_deref().unwrap_or(OsStr::new("keyscan.json"));
        let mut config = Self::from_file(Path::new(config_str))?.unwrap_or_default();
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Reads the config file, or returns `None` if there isn't one.
    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let display = path.display().to_string();
        let file = std::fs::File::open(path).map_err(|cause| ConfigError::Read {
            path: display.clone(),
            cause,
        })?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader)
            .map(Some)
            .map_err(|cause| ConfigError::Parse { path: display, cause })
    }

    /// Applies the `KEYSCAN_*` overrides found through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(chip) = lookup("KEYSCAN_CHIP") {
            self.chip = chip;
        }
        if let Some(rows) = lookup("KEYSCAN_PINS_ROWS") {
            self.rows = parse_pin_list("KEYSCAN_PINS_ROWS", &rows)?;
        }
        if let Some(cols) = lookup("KEYSCAN_PINS_COLS") {
            self.cols = parse_pin_list("KEYSCAN_PINS_COLS", &cols)?;
        }
        if let Some(ms) = lookup("KEYSCAN_POLL_MS") {
            self.poll_interval_ms = ms.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "KEYSCAN_POLL_MS",
                value: ms.clone(),
            })?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn layout(&self) -> Result<KeypadLayout, ConfigError> {
        Ok(KeypadLayout::new(self.layout.iter().map(|row| row.iter().cloned()))?)
    }
}

impl Default for Config {
    fn default() -> Self {
        let layout = KeypadLayout::phone();
        Config {
            chip: "gpiochip0".to_string(),
            // J8 pins 26, 24, 23, 22
            rows: vec![7, 8, 11, 25],
            // J8 pins 21, 19, 10
            cols: vec![9, 10, 15],
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            layout: (0..layout.rows())
                .map(|row| {
                    (0..layout.cols())
                        .filter_map(|col| layout.get(row, col).map(str::to_string))
                        .collect()
                })
                .collect(),
        }
    }
}

fn parse_pin_list(name: &'static str, pin_str: &str) -> Result<Vec<usize>, ConfigError> {
    let pins = pin_str
        .split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ConfigError::InvalidValue {
            name,
            value: pin_str.to_string(),
        })?;

    if pins.is_empty() {
        return Err(ConfigError::InvalidValue {
            name,
            value: pin_str.to_string(),
        });
    }
    Ok(pins)
}
