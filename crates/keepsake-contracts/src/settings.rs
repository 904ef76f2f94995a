use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::CollageError;
use crate::scenarios::SCENARIO_COUNT;

pub const DEFAULT_MODEL: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_PLACEHOLDER_URL: &str = "https://picsum.photos/1024/1024?grayscale";

/// How the orchestrator schedules the ten generation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConcurrencyMode {
    /// One call at a time, in scenario order.
    Sequential,
    /// Fixed-size waves; each wave is awaited in full before the next starts.
    Batched(usize),
    /// A bounded pool of workers pulling scenarios as they free up.
    Parallel(usize),
}

impl ConcurrencyMode {
    pub const DEFAULT_BATCH_SIZE: usize = 3;
    pub const DEFAULT_WORKERS: usize = 4;

    /// Number of calls that may be in flight at once.
    pub fn workers(&self) -> usize {
        match self {
            ConcurrencyMode::Sequential => 1,
            ConcurrencyMode::Batched(size) | ConcurrencyMode::Parallel(size) => {
                (*size).clamp(1, SCENARIO_COUNT)
            }
        }
    }
}

impl Default for ConcurrencyMode {
    fn default() -> Self {
        ConcurrencyMode::Parallel(Self::DEFAULT_WORKERS)
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyMode::Sequential => write!(f, "sequential"),
            ConcurrencyMode::Batched(_) => write!(f, "batched:{}", self.workers()),
            ConcurrencyMode::Parallel(_) => write!(f, "parallel:{}", self.workers()),
        }
    }
}

impl FromStr for ConcurrencyMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        let (name, count) = match normalized.split_once(':') {
            Some((name, count)) => (name.trim(), Some(count.trim())),
            None => (normalized.as_str(), None),
        };
        let parse_count = |default: usize| -> Result<usize, String> {
            match count {
                None | Some("") => Ok(default),
                Some(value) => value
                    .parse::<usize>()
                    .ok()
                    .filter(|value| *value > 0)
                    .map(|value| value.min(SCENARIO_COUNT))
                    .ok_or_else(|| format!("invalid worker count '{value}' in '{raw}'")),
            }
        };
        match name {
            "sequential" | "serial" => {
                if count.is_some() {
                    return Err(format!("sequential mode takes no count: '{raw}'"));
                }
                Ok(ConcurrencyMode::Sequential)
            }
            "batched" | "batch" => Ok(ConcurrencyMode::Batched(parse_count(
                Self::DEFAULT_BATCH_SIZE,
            )?)),
            "parallel" => Ok(ConcurrencyMode::Parallel(parse_count(
                Self::DEFAULT_WORKERS,
            )?)),
            _ => Err(format!(
                "unknown concurrency mode '{raw}' (expected sequential, batched[:N] or parallel[:N])"
            )),
        }
    }
}

impl TryFrom<String> for ConcurrencyMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConcurrencyMode> for String {
    fn from(value: ConcurrencyMode) -> Self {
        value.to_string()
    }
}

/// Every tunable of a collage run. Missing keys in a settings file fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollageSettings {
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub min_photos: usize,
    pub max_photos: usize,
    pub max_reference_images: usize,
    pub concurrency: ConcurrencyMode,
    pub request_timeout_s: f64,
    pub model: String,
    pub api_base: String,
    pub aspect_ratio: String,
    pub image_size: String,
    pub placeholder_url: String,
}

impl Default for CollageSettings {
    fn default() -> Self {
        Self {
            max_dimension: 800,
            jpeg_quality: 85,
            min_photos: 3,
            max_photos: 10,
            max_reference_images: 4,
            concurrency: ConcurrencyMode::default(),
            request_timeout_s: 90.0,
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            aspect_ratio: "1:1".to_string(),
            image_size: "1K".to_string(),
            placeholder_url: DEFAULT_PLACEHOLDER_URL.to_string(),
        }
    }
}

impl CollageSettings {
    /// Defaults, then the settings file (explicit path or `KEEPSAKE_SETTINGS`), then env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| non_empty_env("KEEPSAKE_SETTINGS").map(PathBuf::from));
        let mut settings = match file {
            Some(file) => Self::from_file(&file)?,
            None => Self::default(),
        };
        settings.apply_overrides(non_empty_env)?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading settings {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid settings JSON in {}", path.display()))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("KEEPSAKE_CONCURRENCY") {
            self.concurrency = raw
                .parse()
                .map_err(|err: String| anyhow::anyhow!(err))
                .context("KEEPSAKE_CONCURRENCY")?;
        }
        if let Some(model) = lookup("KEEPSAKE_MODEL") {
            self.model = model;
        }
        if let Some(raw) = lookup("KEEPSAKE_TIMEOUT_S") {
            self.request_timeout_s = raw
                .parse::<f64>()
                .with_context(|| format!("KEEPSAKE_TIMEOUT_S is not a number: '{raw}'"))?;
        }
        if let Some(base) = lookup("GEMINI_API_BASE") {
            self.api_base = base.trim_end_matches('/').to_string();
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        let seconds = if self.request_timeout_s.is_finite() {
            self.request_timeout_s.clamp(5.0, 300.0)
        } else {
            90.0
        };
        Duration::from_secs_f64(seconds)
    }

    /// Upload gate: the photo count must fall within `min_photos..=max_photos`.
    pub fn check_batch_size(&self, count: usize) -> Result<(), CollageError> {
        if count < self.min_photos || count > self.max_photos {
            return Err(CollageError::BatchSize {
                count,
                min: self.min_photos,
                max: self.max_photos,
            });
        }
        Ok(())
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{CollageSettings, ConcurrencyMode};
    use crate::errors::CollageError;

    #[test]
    fn concurrency_mode_parses_all_forms() {
        assert_eq!("sequential".parse::<ConcurrencyMode>(), Ok(ConcurrencyMode::Sequential));
        assert_eq!("batched".parse::<ConcurrencyMode>(), Ok(ConcurrencyMode::Batched(3)));
        assert_eq!(" Batched:5 ".parse::<ConcurrencyMode>(), Ok(ConcurrencyMode::Batched(5)));
        assert_eq!("parallel".parse::<ConcurrencyMode>(), Ok(ConcurrencyMode::Parallel(4)));
        assert_eq!("parallel:64".parse::<ConcurrencyMode>(), Ok(ConcurrencyMode::Parallel(10)));
        assert!("parallel:0".parse::<ConcurrencyMode>().is_err());
        assert!("sequential:2".parse::<ConcurrencyMode>().is_err());
        assert!("fanout".parse::<ConcurrencyMode>().is_err());
    }

    #[test]
    fn concurrency_mode_display_parses_back() {
        for mode in [
            ConcurrencyMode::Sequential,
            ConcurrencyMode::Batched(3),
            ConcurrencyMode::Parallel(6),
        ] {
            assert_eq!(mode.to_string().parse::<ConcurrencyMode>(), Ok(mode));
        }
        assert_eq!(ConcurrencyMode::Sequential.workers(), 1);
    }

    #[test]
    fn settings_file_fills_missing_keys_with_defaults() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("settings.json");
        std::fs::write(&path, r#"{"concurrency": "batched:2", "jpeg_quality": 70}"#)?;

        let settings = CollageSettings::from_file(&path)?;
        assert_eq!(settings.concurrency, ConcurrencyMode::Batched(2));
        assert_eq!(settings.jpeg_quality, 70);
        assert_eq!(settings.max_dimension, 800);
        assert_eq!(settings.max_reference_images, 4);
        Ok(())
    }

    #[test]
    fn env_overrides_take_precedence() -> anyhow::Result<()> {
        let env: HashMap<&str, &str> = HashMap::from([
            ("KEEPSAKE_CONCURRENCY", "sequential"),
            ("KEEPSAKE_MODEL", "gemini-2.5-flash-image"),
            ("KEEPSAKE_TIMEOUT_S", "12.5"),
            ("GEMINI_API_BASE", "http://127.0.0.1:9000/v1beta/"),
        ]);
        let mut settings = CollageSettings::default();
        settings.apply_overrides(|key| env.get(key).map(|value| value.to_string()))?;

        assert_eq!(settings.concurrency, ConcurrencyMode::Sequential);
        assert_eq!(settings.model, "gemini-2.5-flash-image");
        assert_eq!(settings.request_timeout(), Duration::from_secs_f64(12.5));
        assert_eq!(settings.api_base, "http://127.0.0.1:9000/v1beta");
        Ok(())
    }

    #[test]
    fn bad_env_override_is_reported() {
        let mut settings = CollageSettings::default();
        let err = settings
            .apply_overrides(|key| (key == "KEEPSAKE_CONCURRENCY").then(|| "swarm".to_string()))
            .err()
            .map(|err| format!("{err:#}"))
            .unwrap_or_default();
        assert!(err.contains("KEEPSAKE_CONCURRENCY"));
        assert!(err.contains("unknown concurrency mode"));
    }

    #[test]
    fn request_timeout_is_clamped() {
        let settings = CollageSettings {
            request_timeout_s: 0.5,
            ..CollageSettings::default()
        };
        assert_eq!(settings.request_timeout(), Duration::from_secs(5));
        let settings = CollageSettings {
            request_timeout_s: 9000.0,
            ..CollageSettings::default()
        };
        assert_eq!(settings.request_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn batch_gate_enforces_bounds() {
        let settings = CollageSettings::default();
        assert!(settings.check_batch_size(3).is_ok());
        assert!(settings.check_batch_size(10).is_ok());
        assert!(matches!(
            settings.check_batch_size(2),
            Err(CollageError::BatchSize { count: 2, .. })
        ));
        assert!(matches!(
            settings.check_batch_size(11),
            Err(CollageError::BatchSize { count: 11, .. })
        ));
    }
}
