use crate::controller::ControllerSettings;
use crate::frame_source::CaptureSettings;
use facecheck_core::GuideCircle;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            _ => Err(()),
        }
    }
}

/// Daemon configuration.
///
/// Layered: built-in defaults, then an optional TOML file, then
/// `FACECHECK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture resolution; the driver may pick another.
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Holds the descriptor store and the attendance log.
    pub data_dir: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub match_threshold: f64,
    pub capture_interval_ms: u64,
    pub scan_interval_ms: u64,
    pub check_cooldown_ms: u64,
    /// Edge length of the square preview the guide circle is drawn in.
    pub display_size: u32,
    /// Report every N-th consecutive camera failure.
    pub fault_report_every: u32,
    pub bus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facecheck");

        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            model_dir: facecheck_core::default_model_dir(),
            data_dir,
            match_threshold: facecheck_core::MATCH_THRESHOLD,
            capture_interval_ms: 40,
            scan_interval_ms: 500,
            check_cooldown_ms: 2000,
            display_size: facecheck_core::guide::DEFAULT_DISPLAY_SIZE,
            fault_report_every: 25,
            bus: BusKind::Session,
        }
    }
}

impl Config {
    /// Load defaults, the config file and the environment, in that order.
    ///
    /// A file named by `FACECHECK_CONFIG` must exist; the XDG default is optional.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FACECHECK_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loading config file");
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `FACECHECK_*` overrides from `lookup`. Unparseable values are
    /// logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACECHECK_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACECHECK_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACECHECK_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        env_parse(&lookup, "FACECHECK_CAMERA_WIDTH", &mut self.camera_width);
        env_parse(&lookup, "FACECHECK_CAMERA_HEIGHT", &mut self.camera_height);
        env_parse(&lookup, "FACECHECK_MATCH_THRESHOLD", &mut self.match_threshold);
        env_parse(&lookup, "FACECHECK_CAPTURE_INTERVAL_MS", &mut self.capture_interval_ms);
        env_parse(&lookup, "FACECHECK_SCAN_INTERVAL_MS", &mut self.scan_interval_ms);
        env_parse(&lookup, "FACECHECK_CHECK_COOLDOWN_MS", &mut self.check_cooldown_ms);
        env_parse(&lookup, "FACECHECK_DISPLAY_SIZE", &mut self.display_size);
        env_parse(&lookup, "FACECHECK_FAULT_REPORT_EVERY", &mut self.fault_report_every);
        env_parse(&lookup, "FACECHECK_BUS", &mut self.bus);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "match_threshold must be positive, got {}",
                self.match_threshold
            )));
        }
        for (key, value) in [
            ("capture_interval_ms", self.capture_interval_ms),
            ("scan_interval_ms", self.scan_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be non-zero")));
            }
        }
        if self.display_size == 0 {
            return Err(ConfigError::Invalid("display_size must be non-zero".into()));
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("face_database.csv")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("check_log.csv")
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            capture: CaptureSettings {
                interval: Duration::from_millis(self.capture_interval_ms),
                fault_report_every: self.fault_report_every,
            },
            scan_interval: Duration::from_millis(self.scan_interval_ms),
            check_cooldown: Duration::from_millis(self.check_cooldown_ms),
            guide: GuideCircle::for_display(self.display_size),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
        .ok()?;
    Some(base.join("facecheck/config.toml"))
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.match_threshold, 0.5);
        assert_eq!(config.scan_interval_ms, 500);
        assert_eq!(config.check_cooldown_ms, 2000);
        assert!(config.store_path().ends_with("facecheck/face_database.csv"));
        assert!(config.log_path().ends_with("facecheck/check_log.csv"));
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = Config::from_toml_str(
            r#"
            camera_device = "/dev/video4"
            data_dir = "/var/lib/facecheck"
            match_threshold = 0.45
            bus = "system"
            "#,
        )
        .unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/facecheck"));
        assert_eq!(config.match_threshold, 0.45);
        assert_eq!(config.bus, BusKind::System);
        assert_eq!(config.capture_interval_ms, 40);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(matches!(
            Config::from_toml_str("camera = \"/dev/video0\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::from_toml_str("scan_interval_ms = 250").unwrap();
        config.apply_overrides(lookup(&[
            ("FACECHECK_SCAN_INTERVAL_MS", "100"),
            ("FACECHECK_DATA_DIR", "/srv/attendance"),
            ("FACECHECK_BUS", "system"),
        ]));
        assert_eq!(config.scan_interval_ms, 100);
        assert_eq!(config.data_dir, PathBuf::from("/srv/attendance"));
        assert_eq!(config.bus, BusKind::System);
    }

    #[test]
    fn test_bad_env_value_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("FACECHECK_MATCH_THRESHOLD", "close"),
            ("FACECHECK_BUS", "desktop"),
        ]));
        assert_eq!(config.match_threshold, 0.5);
        assert_eq!(config.bus, BusKind::Session);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.scan_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_controller_settings_follow_config() {
        let mut config = Config::default();
        config.display_size = 300;
        config.check_cooldown_ms = 1500;
        let settings = config.controller_settings();
        assert_eq!(settings.guide, GuideCircle::for_display(300));
        assert_eq!(settings.check_cooldown, Duration::from_millis(1500));
        assert_eq!(settings.capture.interval, Duration::from_millis(40));
    }
}
