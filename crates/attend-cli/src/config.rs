use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const NETWORK_MODEL_FILE: &str = "res10_300x300_ssd.onnx";
const CASCADE_MODEL_FILE: &str = "seeta_fd_frontal_v1.0.bin";
const APP_DIR: &str = ".face_attendance";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Runtime configuration: defaults, then the optional TOML file, then `ATTEND_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 camera index (`0` → `/dev/video0`).
    pub camera_index: u32,
    /// Directory the attendance photo is written to.
    pub output_dir: PathBuf,
    /// Directory containing the detector model files.
    pub model_dir: PathBuf,
    /// Location of the persisted name/seat profile.
    pub profile_path: PathBuf,
    /// Give up after this many seconds without a stable face.
    pub timeout_secs: u64,
    /// Consecutive frames with a face required before saving.
    pub required_consecutive: u32,
    /// Minimum SSD confidence for a detection to count.
    pub confidence_threshold: f32,
    /// Pause between frame reads.
    pub poll_interval_ms: u64,
    pub jpeg_quality: u8,
    /// Whether to query the public IP and geolocation services.
    pub network_lookups: bool,
    /// Per-request timeout for those lookups.
    pub lookup_timeout_ms: u64,
}

/// Optional overrides read from `config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub camera_index: Option<u32>,
    pub output_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub profile_path: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub required_consecutive: Option<u32>,
    pub confidence_threshold: Option<f32>,
    pub poll_interval_ms: Option<u64>,
    pub jpeg_quality: Option<u8>,
    pub network_lookups: Option<bool>,
    pub lookup_timeout_ms: Option<u64>,
}

impl FileConfig {
    /// Parse a config file. A missing file yields empty overrides unless `required`.
    pub fn read(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let parsed = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(parsed)
    }
}

impl Config {
    /// Load configuration from the process environment and the config file.
    pub fn load() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let home = home_dir();

        let file = match env("ATTEND_CONFIG") {
            Some(path) => FileConfig::read(Path::new(&path), true)?,
            None => FileConfig::read(&home.join(APP_DIR).join("config.toml"), false)?,
        };

        Ok(Self::from_sources(Self::defaults(&home), file, env))
    }

    /// Built-in defaults relative to the given home directory.
    pub fn defaults(home: &Path) -> Self {
        let model_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("models")))
            .unwrap_or_else(|| PathBuf::from("models"));

        Self {
            camera_index: 0,
            output_dir: PathBuf::from("captures"),
            model_dir,
            profile_path: home.join(APP_DIR).join("profile.json"),
            timeout_secs: 25,
            required_consecutive: 3,
            confidence_threshold: attend_core::DEFAULT_CONFIDENCE_THRESHOLD,
            poll_interval_ms: 30,
            jpeg_quality: 90,
            network_lookups: true,
            lookup_timeout_ms: 2500,
        }
    }

    /// Apply file overrides, then environment overrides, to `base`.
    ///
    /// Environment values that fail to parse are ignored.
    pub fn from_sources(
        base: Self,
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut cfg = base;

        cfg.camera_index = file.camera_index.unwrap_or(cfg.camera_index);
        cfg.output_dir = file.output_dir.unwrap_or(cfg.output_dir);
        cfg.model_dir = file.model_dir.unwrap_or(cfg.model_dir);
        cfg.profile_path = file.profile_path.unwrap_or(cfg.profile_path);
        cfg.timeout_secs = file.timeout_secs.unwrap_or(cfg.timeout_secs);
        cfg.required_consecutive = file.required_consecutive.unwrap_or(cfg.required_consecutive);
        cfg.confidence_threshold = file.confidence_threshold.unwrap_or(cfg.confidence_threshold);
        cfg.poll_interval_ms = file.poll_interval_ms.unwrap_or(cfg.poll_interval_ms);
        cfg.jpeg_quality = file.jpeg_quality.unwrap_or(cfg.jpeg_quality);
        cfg.network_lookups = file.network_lookups.unwrap_or(cfg.network_lookups);
        cfg.lookup_timeout_ms = file.lookup_timeout_ms.unwrap_or(cfg.lookup_timeout_ms);

        cfg.camera_index = env_parse(&env, "ATTEND_CAMERA_INDEX").unwrap_or(cfg.camera_index);
        if let Some(v) = env("ATTEND_OUTPUT_DIR") {
            cfg.output_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ATTEND_MODEL_DIR") {
            cfg.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ATTEND_PROFILE_PATH") {
            cfg.profile_path = PathBuf::from(v);
        }
        cfg.timeout_secs = env_parse(&env, "ATTEND_TIMEOUT_SECS").unwrap_or(cfg.timeout_secs);
        cfg.required_consecutive =
            env_parse(&env, "ATTEND_REQUIRED_FRAMES").unwrap_or(cfg.required_consecutive);
        cfg.confidence_threshold =
            env_parse(&env, "ATTEND_CONFIDENCE_THRESHOLD").unwrap_or(cfg.confidence_threshold);
        cfg.poll_interval_ms =
            env_parse(&env, "ATTEND_POLL_INTERVAL_MS").unwrap_or(cfg.poll_interval_ms);
        cfg.lookup_timeout_ms =
            env_parse(&env, "ATTEND_LOOKUP_TIMEOUT_MS").unwrap_or(cfg.lookup_timeout_ms);
        if let Some(v) = env("ATTEND_NETWORK_LOOKUPS") {
            cfg.network_lookups = v != "0";
        }

        cfg.required_consecutive = cfg.required_consecutive.max(1);
        cfg.jpeg_quality = cfg.jpeg_quality.clamp(1, 100);
        cfg
    }

    /// Path to the SSD detection model.
    pub fn network_model_path(&self) -> PathBuf {
        self.model_dir.join(NETWORK_MODEL_FILE)
    }

    /// Path to the SeetaFace cascade model.
    pub fn cascade_model_path(&self) -> PathBuf {
        self.model_dir.join(CASCADE_MODEL_FILE)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_sources(
            Config::defaults(Path::new("/home/jane")),
            FileConfig::default(),
            env_from(&[]),
        );
        assert_eq!(cfg.camera_index, 0);
        assert_eq!(cfg.timeout_secs, 25);
        assert_eq!(cfg.required_consecutive, 3);
        assert!(attend_hw::READ_TIMEOUT < cfg.timeout());
        assert_eq!(cfg.poll_interval(), Duration::from_millis(30));
        assert!((cfg.confidence_threshold - 0.5).abs() < 1e-6);
        assert_eq!(cfg.output_dir, PathBuf::from("captures"));
        assert_eq!(
            cfg.profile_path,
            PathBuf::from("/home/jane/.face_attendance/profile.json")
        );
        assert!(cfg.network_lookups);
        assert!(cfg.network_model_path().ends_with("res10_300x300_ssd.onnx"));
        assert!(cfg.cascade_model_path().ends_with("seeta_fd_frontal_v1.0.bin"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            camera_index = 2
            timeout_secs = 40
            output_dir = "/srv/captures"
            network_lookups = false
            "#,
        )
        .unwrap();
        let env = env_from(&[("ATTEND_TIMEOUT_SECS", "10"), ("ATTEND_MODEL_DIR", "/opt/models")]);

        let cfg = Config::from_sources(Config::defaults(Path::new("/h")), file, env);
        assert_eq!(cfg.camera_index, 2);
        assert_eq!(cfg.timeout_secs, 10);
        assert_eq!(cfg.output_dir, PathBuf::from("/srv/captures"));
        assert_eq!(cfg.model_dir, PathBuf::from("/opt/models"));
        assert!(!cfg.network_lookups);
    }

    #[test]
    fn test_unparsable_env_ignored_and_values_clamped() {
        let env = env_from(&[
            ("ATTEND_TIMEOUT_SECS", "soon"),
            ("ATTEND_REQUIRED_FRAMES", "0"),
            ("ATTEND_NETWORK_LOOKUPS", "0"),
        ]);
        let cfg = Config::from_sources(Config::defaults(Path::new("/h")), FileConfig::default(), env);
        assert_eq!(cfg.timeout_secs, 25);
        assert_eq!(cfg.required_consecutive, 1);
        assert!(!cfg.network_lookups);
    }

    #[test]
    fn test_file_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "camera = 1\n").unwrap();
        assert!(matches!(
            FileConfig::read(&path, false),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(FileConfig::read(&path, false).unwrap().timeout_secs.is_none());
        assert!(matches!(
            FileConfig::read(&path, true),
            Err(ConfigError::Read { .. })
        ));
    }
}
