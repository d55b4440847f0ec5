use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::kind::KindSet;

const DEFAULT_MODEL_PATH: &str = "models/best.onnx";
const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.90;
const DEFAULT_EVENT_KINDS: [&str; 4] = ["theft", "fall", "fight", "smoke"];
const DEFAULT_BASE_CLIP_SECS: f64 = 5.0;
const DEFAULT_MERGE_GAP_SECS: f64 = 30.0;
const DEFAULT_MAX_BUFFER_SECS: f64 = 30.0;
const DEFAULT_PADDING_SECS: f64 = 1.0;
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_WEB_BASE_URL: &str = "http://localhost:8000/";
const DEFAULT_ENCODER_PROGRAM: &str = "ffmpeg";
const DEFAULT_ENCODER_TIMEOUT_SECS: f64 = 120.0;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_ALERT_INTERVAL_SECS: f64 = 5.0;
const DEFAULT_DETECTOR_FAILURE_WARN_EVERY: u64 = 10;

/// Accepted forms for `video_start_time`.
const START_TIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H-%M-%S"];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ClipperConfigFile {
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    model_input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    valid_event_kinds: Option<Vec<String>>,
    base_clip_duration_seconds: Option<f64>,
    merge_gap_seconds: Option<f64>,
    max_buffer_seconds: Option<f64>,
    padding_seconds: Option<f64>,
    video_start_time: Option<String>,
    debug: Option<bool>,
    output_dir: Option<PathBuf>,
    web_base_url: Option<String>,
    encoder: Option<EncoderConfigFile>,
    workers: Option<usize>,
    alert_interval_seconds: Option<f64>,
    detector_failure_warn_every: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EncoderConfigFile {
    program: Option<PathBuf>,
    timeout_seconds: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ClipperConfig {
    pub model_path: PathBuf,
    /// Class names, one per line. Defaults to `<model_path>.names`.
    pub labels_path: Option<PathBuf>,
    pub model_input_size: u32,
    pub confidence_threshold: f32,
    /// Canonical event kinds in normalization order.
    pub valid_event_kinds: Vec<String>,
    pub base_clip_duration_seconds: f64,
    pub merge_gap_seconds: f64,
    pub max_buffer_seconds: f64,
    pub padding_seconds: f64,
    /// `None` means "when processing starts" (or derived from the file name).
    pub video_start_time: Option<NaiveDateTime>,
    pub debug: bool,
    pub output_dir: PathBuf,
    pub web_base_url: String,
    pub encoder: EncoderSettings,
    pub workers: usize,
    /// Minimum spacing between alerted events across all sources.
    pub alert_interval: Duration,
    /// Warn after this many consecutive detector failures (and every
    /// multiple thereafter).
    pub detector_failure_warn_every: u64,
}

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub program: PathBuf,
    pub timeout: Duration,
}

impl Default for ClipperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            labels_path: None,
            model_input_size: DEFAULT_MODEL_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            valid_event_kinds: DEFAULT_EVENT_KINDS.iter().map(|k| k.to_string()).collect(),
            base_clip_duration_seconds: DEFAULT_BASE_CLIP_SECS,
            merge_gap_seconds: DEFAULT_MERGE_GAP_SECS,
            max_buffer_seconds: DEFAULT_MAX_BUFFER_SECS,
            padding_seconds: DEFAULT_PADDING_SECS,
            video_start_time: None,
            debug: false,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            web_base_url: DEFAULT_WEB_BASE_URL.to_string(),
            encoder: EncoderSettings {
                program: PathBuf::from(DEFAULT_ENCODER_PROGRAM),
                timeout: Duration::from_secs_f64(DEFAULT_ENCODER_TIMEOUT_SECS),
            },
            workers: DEFAULT_WORKERS,
            alert_interval: Duration::from_secs_f64(DEFAULT_ALERT_INTERVAL_SECS),
            detector_failure_warn_every: DEFAULT_DETECTOR_FAILURE_WARN_EVERY,
        }
    }
}

impl ClipperConfig {
    /// Defaults, then the file named by `CLIPPER_CONFIG`, then `CLIPPER_*`
    /// environment overrides. Validation errors are fatal.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CLIPPER_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, but with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ClipperConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ClipperConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let video_start_time = match file.video_start_time.as_deref() {
            Some(raw) => Some(parse_start_time(raw)?),
            None => None,
        };
        let encoder = file.encoder.unwrap_or_default();
        Ok(Self {
            model_path: file.model_path.unwrap_or(defaults.model_path),
            labels_path: file.labels_path,
            model_input_size: file.model_input_size.unwrap_or(defaults.model_input_size),
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            valid_event_kinds: file
                .valid_event_kinds
                .unwrap_or(defaults.valid_event_kinds),
            base_clip_duration_seconds: file
                .base_clip_duration_seconds
                .unwrap_or(defaults.base_clip_duration_seconds),
            merge_gap_seconds: file.merge_gap_seconds.unwrap_or(defaults.merge_gap_seconds),
            max_buffer_seconds: file
                .max_buffer_seconds
                .unwrap_or(defaults.max_buffer_seconds),
            padding_seconds: file.padding_seconds.unwrap_or(defaults.padding_seconds),
            video_start_time,
            debug: file.debug.unwrap_or(defaults.debug),
            output_dir: file.output_dir.unwrap_or(defaults.output_dir),
            web_base_url: file.web_base_url.unwrap_or(defaults.web_base_url),
            encoder: EncoderSettings {
                program: encoder.program.unwrap_or(defaults.encoder.program),
                timeout: match encoder.timeout_seconds {
                    Some(secs) => duration_from_secs("encoder.timeout_seconds", secs)?,
                    None => defaults.encoder.timeout,
                },
            },
            workers: file.workers.unwrap_or(defaults.workers),
            alert_interval: match file.alert_interval_seconds {
                Some(secs) => duration_from_secs("alert_interval_seconds", secs)?,
                None => defaults.alert_interval,
            },
            detector_failure_warn_every: file
                .detector_failure_warn_every
                .unwrap_or(defaults.detector_failure_warn_every),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_non_empty("CLIPPER_MODEL_PATH") {
            self.model_path = PathBuf::from(path);
        }
        if let Some(path) = env_non_empty("CLIPPER_LABELS_PATH") {
            self.labels_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = env_non_empty("CLIPPER_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = raw
                .parse()
                .map_err(|_| anyhow!("CLIPPER_CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Some(raw) = env_non_empty("CLIPPER_EVENT_KINDS") {
            let parsed = split_csv(&raw);
            if !parsed.is_empty() {
                self.valid_event_kinds = parsed;
            }
        }
        if let Some(secs) = env_secs("CLIPPER_BASE_CLIP_SECS")? {
            self.base_clip_duration_seconds = secs;
        }
        if let Some(secs) = env_secs("CLIPPER_MERGE_GAP_SECS")? {
            self.merge_gap_seconds = secs;
        }
        if let Some(secs) = env_secs("CLIPPER_MAX_BUFFER_SECS")? {
            self.max_buffer_seconds = secs;
        }
        if let Some(secs) = env_secs("CLIPPER_PADDING_SECS")? {
            self.padding_seconds = secs;
        }
        if let Some(raw) = env_non_empty("CLIPPER_VIDEO_START") {
            self.video_start_time = Some(parse_start_time(&raw)?);
        }
        if let Some(raw) = env_non_empty("CLIPPER_DEBUG") {
            self.debug = matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(dir) = env_non_empty("CLIPPER_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_non_empty("CLIPPER_WEB_BASE_URL") {
            self.web_base_url = url;
        }
        if let Some(program) = env_non_empty("CLIPPER_FFMPEG") {
            self.encoder.program = PathBuf::from(program);
        }
        if let Some(secs) = env_secs("CLIPPER_ENCODER_TIMEOUT_SECS")? {
            self.encoder.timeout = duration_from_secs("CLIPPER_ENCODER_TIMEOUT_SECS", secs)?;
        }
        if let Some(raw) = env_non_empty("CLIPPER_WORKERS") {
            self.workers = raw
                .parse()
                .map_err(|_| anyhow!("CLIPPER_WORKERS must be a positive integer"))?;
        }
        if let Some(secs) = env_secs("CLIPPER_ALERT_INTERVAL_SECS")? {
            self.alert_interval = duration_from_secs("CLIPPER_ALERT_INTERVAL_SECS", secs)?;
        }
        Ok(())
    }

    /// Reject configurations the pipeline must not run with.
    pub fn validate(&mut self) -> Result<()> {
        self.kind_set()?;

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        for (name, value) in [
            ("base_clip_duration_seconds", self.base_clip_duration_seconds),
            ("merge_gap_seconds", self.merge_gap_seconds),
            ("max_buffer_seconds", self.max_buffer_seconds),
            ("padding_seconds", self.padding_seconds),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!("{} must be greater than zero, got {}", name, value));
            }
        }
        if self.encoder.timeout.is_zero() {
            return Err(anyhow!("encoder timeout must be greater than zero"));
        }
        if self.workers == 0 {
            return Err(anyhow!("workers must be at least 1"));
        }
        if self.model_input_size == 0 {
            return Err(anyhow!("model_input_size must be greater than zero"));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(anyhow!("output_dir must not be empty"));
        }
        if self.detector_failure_warn_every == 0 {
            self.detector_failure_warn_every = DEFAULT_DETECTOR_FAILURE_WARN_EVERY;
        }
        if self.merge_gap_seconds > self.max_buffer_seconds {
            log::warn!(
                "merge_gap_seconds ({}) exceeds max_buffer_seconds ({}); long events may lose their start",
                self.merge_gap_seconds,
                self.max_buffer_seconds
            );
        }
        Ok(())
    }

    /// The configured kinds as a validated `KindSet`.
    pub fn kind_set(&self) -> Result<KindSet> {
        KindSet::new(self.valid_event_kinds.iter().cloned())
    }
}

fn read_config_file(path: &Path) -> Result<ClipperConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Parse a start time in one of the accepted formats (local, naive).
pub fn parse_start_time(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    START_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| {
            anyhow!(
                "invalid video_start_time '{}' (expected YYYY-MM-DD HH:MM:SS)",
                raw
            )
        })
}

fn duration_from_secs(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("{} must be a non-negative number of seconds", name))
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_secs(key: &str) -> Result<Option<f64>> {
    match env_non_empty(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a number of seconds", key)),
        None => Ok(None),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
