// config.rs

use crate::cli::Args;
use log::{debug, info};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// MIDI clock resolution (pulses per quarter note)
pub const PULSES_PER_QUARTER_NOTE: u64 = 24;
/// Quarter notes between two markers (one whole note / 4-4 bar)
pub const QUARTER_NOTES_PER_BOUNDARY: u64 = 4;
pub const PULSES_PER_BOUNDARY: u64 = PULSES_PER_QUARTER_NOTE * QUARTER_NOTES_PER_BOUNDARY;
/// Song position pointer units per quarter note (sixteenth notes)
pub const POSITION_UNITS_PER_QUARTER_NOTE: u64 = 4;

pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 300.0;
pub const DEFAULT_BPM: f64 = 120.0;

/// Marker lead time compensating downstream output latency
pub const DEFAULT_LEAD_MS: f64 = 70.0;
pub const MAX_LEAD_MS: f64 = 500.0;
/// Lower bound on the lead window, in pulses
pub const MIN_LEAD_PULSES: f64 = 1.5;

/// Tempo estimator acceptance window for one quarter note of pulses
pub const MIN_QUARTER_NOTE_SECS: f64 = 0.2;
pub const MAX_QUARTER_NOTE_SECS: f64 = 3.0;
/// Estimated tempo must move by more than this to be applied
pub const TEMPO_HYSTERESIS_BPM: f64 = 0.5;

/// Backward jumps larger than this (quarter notes) count as a seek
pub const SEEK_BACKWARD_THRESHOLD_QN: f64 = 0.5;
/// Jumps landing this far (quarter notes) into a boundary treat it as already fired
pub const HALF_BOUNDARY_QN: f64 = 2.0;

const ENV_PREFIX: &str = "BARSYNC";

pub fn tempo_in_range(bpm: f64) -> bool {
    bpm.is_finite() && (MIN_BPM..=MAX_BPM).contains(&bpm)
}

#[derive(Debug)]
pub enum SettingsError {
    /// Error while reading or merging configuration sources
    Load(::config::ConfigError),
    /// A value was read but is outside its allowed range
    Invalid(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Load(err) => write!(f, "configuration load error: {}", err),
            SettingsError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<::config::ConfigError> for SettingsError {
    fn from(err: ::config::ConfigError) -> Self {
        SettingsError::Load(err)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub bpm: f64,
    pub lead_ms: f64,
    pub marker_channel: u8,
    pub marker_note: u8,
    pub marker_velocity: u8,
    #[serde(default)]
    pub input_device: Option<String>, // MIDI clock source
    #[serde(default)]
    pub output_device: Option<String>, // Clock/marker destination
    pub master: bool,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bpm: DEFAULT_BPM,
            lead_ms: DEFAULT_LEAD_MS,
            marker_channel: 0,
            marker_note: 60, // Middle C
            marker_velocity: 100,
            input_device: None,
            output_device: None,
            master: false,
            log_level: "debug".to_string(),
        }
    }
}

impl Settings {
    /// Default location of the optional config file
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var("HOME").ok()?;
        Some(
            PathBuf::from(home)
                .join(".config")
                .join("barsyncrs")
                .join("config.toml"),
        )
    }

    /// Merges defaults, the config file (if any) and `BARSYNC_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let defaults = Settings::default();
        let mut builder = ::config::Config::builder()
            .set_default("bpm", defaults.bpm)?
            .set_default("lead_ms", defaults.lead_ms)?
            .set_default("marker_channel", i64::from(defaults.marker_channel))?
            .set_default("marker_note", i64::from(defaults.marker_note))?
            .set_default("marker_velocity", i64::from(defaults.marker_velocity))?
            .set_default("master", defaults.master)?
            .set_default("log_level", defaults.log_level.as_str())?;

        match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                builder = builder.add_source(::config::File::from(path).required(true));
            }
            None => {
                if let Some(path) = Self::default_path() {
                    debug!("Looking for optional configuration at {}", path.display());
                    builder = builder.add_source(::config::File::from(path).required(false));
                }
            }
        }

        let settings: Settings = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Command line flags win over every other source
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(bpm) = args.bpm {
            debug!("BPM overridden from command line: {}", bpm);
            self.bpm = bpm;
        }
        if let Some(lead_ms) = args.lead_ms {
            debug!("Lead time overridden from command line: {} ms", lead_ms);
            self.lead_ms = lead_ms;
        }
        if args.input_device.is_some() {
            self.input_device = args.input_device.clone();
        }
        if args.output_device.is_some() {
            self.output_device = args.output_device.clone();
        }
        if args.master {
            info!("Master mode selected via --master");
            self.master = true;
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !tempo_in_range(self.bpm) {
            return Err(SettingsError::Invalid(format!(
                "bpm {} outside {}..={}",
                self.bpm, MIN_BPM, MAX_BPM
            )));
        }
        if !self.lead_ms.is_finite() || !(0.0..=MAX_LEAD_MS).contains(&self.lead_ms) {
            return Err(SettingsError::Invalid(format!(
                "lead_ms {} outside 0..={}",
                self.lead_ms, MAX_LEAD_MS
            )));
        }
        if self.marker_channel > 15 {
            return Err(SettingsError::Invalid(format!(
                "marker_channel {} outside 0..=15",
                self.marker_channel
            )));
        }
        if self.marker_note > 127 {
            return Err(SettingsError::Invalid(format!(
                "marker_note {} outside 0..=127",
                self.marker_note
            )));
        }
        if self.marker_velocity == 0 || self.marker_velocity > 127 {
            return Err(SettingsError::Invalid(format!(
                "marker_velocity {} outside 1..=127",
                self.marker_velocity
            )));
        }
        Ok(())
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Debug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.bpm, 120.0);
        assert_eq!(settings.lead_ms, 70.0);
        assert_eq!(settings.marker_note, 60);
    }

    #[test]
    fn test_pulses_per_boundary() {
        assert_eq!(PULSES_PER_BOUNDARY, 96);
    }

    #[test]
    fn test_tempo_range() {
        assert!(tempo_in_range(20.0));
        assert!(tempo_in_range(300.0));
        assert!(!tempo_in_range(15.0));
        assert!(!tempo_in_range(305.0));
        assert!(!tempo_in_range(f64::NAN));
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        let settings = Settings {
            bpm: 400.0,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(SettingsError::Invalid(_))));

        let settings = Settings {
            marker_channel: 16,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            lead_ms: -1.0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            marker_velocity: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Settings::load(Some(Path::new("/nonexistent/barsyncrs.toml")));
        assert!(matches!(result, Err(SettingsError::Load(_))));
    }

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "barsyncrs-{}-{}.toml",
            name,
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_layers_file_then_environment_then_command_line() {
        let path = write_config("layers", "bpm = 98\nmarker_note = 36\nlead_ms = 40\n");
        std::env::set_var("BARSYNC_MARKER_CHANNEL", "9");
        std::env::set_var("BARSYNC_LEAD_MS", "55");
        let loaded = Settings::load(Some(&path));
        std::env::remove_var("BARSYNC_MARKER_CHANNEL");
        std::env::remove_var("BARSYNC_LEAD_MS");
        std::fs::remove_file(&path).unwrap();

        let mut settings = loaded.unwrap();
        // File over defaults
        assert_eq!(settings.bpm, 98.0);
        assert_eq!(settings.marker_note, 36);
        assert_eq!(settings.marker_velocity, 100);
        // Environment over file
        assert_eq!(settings.lead_ms, 55.0);
        assert_eq!(settings.marker_channel, 9);

        // Command line over everything
        settings.apply_args(&Args::parse_from(["test", "--lead-ms", "30"]));
        assert_eq!(settings.lead_ms, 30.0);
        assert_eq!(settings.bpm, 98.0);
    }

    #[test]
    fn test_out_of_range_file_value_is_invalid() {
        let path = write_config("invalid", "bpm = 400\n");
        let result = Settings::load(Some(&path));
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn test_command_line_overrides() {
        let args = Args::parse_from([
            "test",
            "--bpm",
            "98.5",
            "--lead-ms",
            "40",
            "--output-device",
            "IAC",
            "--master",
        ]);
        let mut settings = Settings::default();
        settings.apply_args(&args);
        assert_eq!(settings.bpm, 98.5);
        assert_eq!(settings.lead_ms, 40.0);
        assert_eq!(settings.output_device, Some("IAC".to_string()));
        assert_eq!(settings.input_device, None);
        assert!(settings.master);
    }

    #[test]
    fn test_log_level_parsing() {
        let settings = Settings {
            log_level: "info".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.log_level(), log::LevelFilter::Info);

        let settings = Settings {
            log_level: "bogus".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.log_level(), log::LevelFilter::Debug);
    }
}
