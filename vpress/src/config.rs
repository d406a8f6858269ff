//! Service configuration.
//!
//! Options can be set programmatically via the `with_*` builders or loaded
//! from `VPRESS_*` environment variables (after `dotenvy` has populated the
//! environment). Binary paths for the external tools honor `FFMPEG_PATH` and
//! `FFPROBE_PATH`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

fn default_max_queue_size() -> usize {
    10
}

fn default_max_workers() -> usize {
    2
}

fn default_target_size_mb() -> u32 {
    50
}

fn default_resolution() -> String {
    "scale=1280:-2".to_string()
}

fn default_audio_bitrate_kbps() -> u32 {
    128
}

fn default_min_bitrate_kbps() -> u32 {
    500
}

fn default_max_bitrate_kbps() -> u32 {
    4000
}

fn default_bitrate_kbps() -> u32 {
    1500
}

fn default_retention_secs() -> u64 {
    7200 // 2 hours
}

fn default_sweep_interval_secs() -> u64 {
    600
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("./work")
}

fn default_ffmpeg_path() -> String {
    std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string())
}

fn default_ffprobe_path() -> String {
    std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string())
}

fn default_job_timeout_secs() -> u64 {
    3600
}

fn default_probe_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// Configuration for the compression service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Maximum number of queued (not yet active) jobs. Submissions beyond
    /// this are rejected, not blocked.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Number of concurrent workers; equals the number of concurrent
    /// transcoder processes.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Default target output size in MB when a submission doesn't choose one.
    #[serde(default = "default_target_size_mb")]
    pub target_size_mb: u32,

    /// Default target resolution filter expression.
    #[serde(default = "default_resolution")]
    pub resolution: String,

    /// Default audio bitrate in kbps.
    #[serde(default = "default_audio_bitrate_kbps")]
    pub audio_bitrate_kbps: u32,

    /// Lower bound of the video bitrate band in kbps.
    #[serde(default = "default_min_bitrate_kbps")]
    pub min_bitrate_kbps: u32,

    /// Upper bound of the video bitrate band in kbps.
    #[serde(default = "default_max_bitrate_kbps")]
    pub max_bitrate_kbps: u32,

    /// Fallback video bitrate in kbps when the input duration is unknown.
    #[serde(default = "default_bitrate_kbps")]
    pub default_bitrate_kbps: u32,

    /// Age threshold for the janitor sweep, in seconds.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Interval between janitor sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Root directory for temporary input/output files. Staging areas are
    /// `<working_dir>/in` and `<working_dir>/out`.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Path to the ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Path to the ffprobe binary.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,

    /// Wall-clock timeout for a single transcode invocation, in seconds.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Timeout for a probe invocation, in seconds.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Worker poll fallback interval in milliseconds, used when the queue
    /// wakeup notification is missed.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_workers: default_max_workers(),
            target_size_mb: default_target_size_mb(),
            resolution: default_resolution(),
            audio_bitrate_kbps: default_audio_bitrate_kbps(),
            min_bitrate_kbps: default_min_bitrate_kbps(),
            max_bitrate_kbps: default_max_bitrate_kbps(),
            default_bitrate_kbps: default_bitrate_kbps(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            working_dir: default_working_dir(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            job_timeout_secs: default_job_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ServiceConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from `VPRESS_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("VPRESS_MAX_QUEUE_SIZE")? {
            config.max_queue_size = v;
        }
        if let Some(v) = env_parse::<usize>("VPRESS_MAX_WORKERS")? {
            config.max_workers = v;
        }
        if let Some(v) = env_parse::<u32>("VPRESS_TARGET_SIZE_MB")? {
            config.target_size_mb = v;
        }
        if let Ok(v) = std::env::var("VPRESS_RESOLUTION") {
            config.resolution = v;
        }
        if let Some(v) = env_parse::<u64>("VPRESS_RETENTION_SECS")? {
            config.retention_secs = v;
        }
        if let Some(v) = env_parse::<u64>("VPRESS_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval_secs = v;
        }
        if let Ok(v) = std::env::var("VPRESS_WORKING_DIR") {
            config.working_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse::<u64>("VPRESS_JOB_TIMEOUT_SECS")? {
            config.job_timeout_secs = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for inconsistent values.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::config("max_workers must be at least 1"));
        }
        if self.max_queue_size == 0 {
            return Err(Error::config("max_queue_size must be at least 1"));
        }
        if self.min_bitrate_kbps > self.max_bitrate_kbps {
            return Err(Error::config(format!(
                "min_bitrate_kbps ({}) exceeds max_bitrate_kbps ({})",
                self.min_bitrate_kbps, self.max_bitrate_kbps
            )));
        }
        if self.resolution.is_empty() {
            return Err(Error::config("resolution must not be empty"));
        }
        Ok(())
    }

    /// Staging directory for job input files.
    pub fn in_dir(&self) -> PathBuf {
        self.working_dir.join("in")
    }

    /// Staging directory for transcoded output files.
    pub fn out_dir(&self) -> PathBuf {
        self.working_dir.join("out")
    }

    /// Default per-job settings derived from this configuration.
    pub fn default_settings(&self) -> crate::job::TranscodeSettings {
        crate::job::TranscodeSettings {
            resolution: self.resolution.clone(),
            crf: None,
            video_bitrate_kbps: None,
            audio_bitrate_kbps: self.audio_bitrate_kbps,
            target_size_mb: Some(self.target_size_mb),
        }
    }

    /// Set the queue capacity.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the worker count.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Set the janitor retention threshold.
    pub fn with_retention_secs(mut self, secs: u64) -> Self {
        self.retention_secs = secs;
        self
    }

    /// Set the external tool paths.
    pub fn with_tool_paths(
        mut self,
        ffmpeg: impl Into<String>,
        ffprobe: impl Into<String>,
    ) -> Self {
        self.ffmpeg_path = ffmpeg.into();
        self.ffprobe_path = ffprobe.into();
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::config(format!("invalid value for {}: {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}
