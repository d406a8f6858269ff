//! External transcoder invocation.
//!
//! Wraps the ffprobe/ffmpeg binaries: probes input media, derives a target
//! video bitrate from the desired output size, and supervises the transcode
//! subprocess while parsing its diagnostic stream into fractional progress.

use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::job::TranscodeSettings;
use crate::progress::ProgressReporter;
use crate::{Error, Result};

/// Number of diagnostic lines retained for failure reporting.
const DIAG_TAIL_LINES: usize = 16;

/// Upper bound on the diagnostic excerpt embedded in a failure reason.
const DIAG_MAX_CHARS: usize = 1000;

/// Parsed result of probing an input file.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    /// Stream duration in seconds. Zero when the container doesn't report
    /// one; that is a valid degenerate result, not an error.
    pub duration_secs: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec: Option<String>,
    pub bit_rate_kbps: Option<u32>,
}

impl MediaInfo {
    /// Whether percentage progress can be derived for this input.
    pub fn has_duration(&self) -> bool {
        self.duration_secs > 0.0
    }
}

/// Sizes and timing of a finished transcode.
#[derive(Debug, Clone)]
pub struct TranscodeStats {
    pub original_size: u64,
    pub output_size: u64,
    pub elapsed_secs: f64,
}

impl TranscodeStats {
    /// Compression ratio, `original / output`.
    pub fn ratio(&self) -> f64 {
        if self.output_size == 0 {
            0.0
        } else {
            self.original_size as f64 / self.output_size as f64
        }
    }
}

// ffprobe `-of json` output shape. All fields are optional; ffprobe reports
// numbers as strings.
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    codec_name: Option<String>,
    bit_rate: Option<String>,
}

/// Supervisor for the external probe and transcode tools.
pub struct TranscodeInvoker {
    ffmpeg_path: String,
    ffprobe_path: String,
    probe_timeout: Duration,
    job_timeout: Duration,
    min_bitrate_kbps: u32,
    max_bitrate_kbps: u32,
    default_bitrate_kbps: u32,
    /// Cached transcoder version string.
    version: Option<String>,
}

impl TranscodeInvoker {
    /// Create an invoker from the service configuration.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let version = Self::detect_version(&config.ffmpeg_path);
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            min_bitrate_kbps: config.min_bitrate_kbps,
            max_bitrate_kbps: config.max_bitrate_kbps,
            default_bitrate_kbps: config.default_bitrate_kbps,
            version,
        }
    }

    /// Detect the transcoder version.
    fn detect_version(path: &str) -> Option<String> {
        std::process::Command::new(path)
            .arg("-version")
            .output()
            .ok()
            .and_then(|output| {
                String::from_utf8(output.stdout)
                    .ok()
                    .and_then(|s| s.lines().next().map(|l| l.to_string()))
            })
    }

    /// Whether the transcoder binary responded to a version check.
    pub fn is_available(&self) -> bool {
        self.version.is_some()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Inspect the input media with ffprobe.
    ///
    /// Fails with [`Error::Probe`] on non-zero exit, timeout, or unparsable
    /// output. A missing duration is reported as `0.0`, not an error.
    pub async fn probe(&self, input: &Path) -> Result<MediaInfo> {
        let output = tokio::time::timeout(
            self.probe_timeout,
            Command::new(&self.ffprobe_path)
                .args([
                    "-v",
                    "error",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "format=duration:stream=width,height,codec_name,bit_rate",
                    "-of",
                    "json",
                ])
                .arg(input)
                .output(),
        )
        .await
        .map_err(|_| {
            Error::probe(format!(
                "ffprobe timed out after {}s",
                self.probe_timeout.as_secs()
            ))
        })?
        .map_err(|e| Error::probe(format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::probe(format!(
                "ffprobe exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        parse_probe_output(&output.stdout)
    }

    /// Derive a video bitrate (kbps) from a target output size.
    ///
    /// A non-positive duration yields the configured default; otherwise the
    /// result is clamped into the configured band. This is a heuristic
    /// size/quality trade-off, not an exact size predictor.
    pub fn compute_target_bitrate(&self, target_size_mb: u32, duration_secs: f64) -> u32 {
        if duration_secs <= 0.0 {
            return self.default_bitrate_kbps;
        }
        let kbps = (target_size_mb as f64 * 8000.0 / duration_secs) as u32;
        kbps.clamp(self.min_bitrate_kbps, self.max_bitrate_kbps)
    }

    /// Build transcoder command arguments.
    fn build_args(
        &self,
        input: &Path,
        output: &Path,
        settings: &TranscodeSettings,
        duration_secs: f64,
    ) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-hide_banner".to_string()];
        args.extend(["-i".to_string(), input.to_string_lossy().to_string()]);
        args.extend(["-vf".to_string(), settings.resolution.clone()]);
        args.extend(["-c:v".to_string(), "libx264".to_string()]);
        args.extend(["-preset".to_string(), "veryfast".to_string()]);

        // Rate control: explicit bitrate wins, then CRF, then the size-based
        // heuristic.
        if let Some(kbps) = settings.video_bitrate_kbps {
            args.extend(["-b:v".to_string(), format!("{kbps}k")]);
        } else if let Some(crf) = settings.crf {
            args.extend(["-crf".to_string(), crf.to_string()]);
        } else {
            let kbps = match settings.target_size_mb {
                Some(mb) if mb > 0 => self.compute_target_bitrate(mb, duration_secs),
                _ => self.default_bitrate_kbps,
            };
            args.extend(["-b:v".to_string(), format!("{kbps}k")]);
        }

        args.extend(["-c:a".to_string(), "aac".to_string()]);
        args.extend([
            "-b:a".to_string(),
            format!("{}k", settings.audio_bitrate_kbps),
        ]);
        args.push(output.to_string_lossy().to_string());
        args
    }

    /// Run the transcoder on `input`, writing to `output`.
    ///
    /// The subprocess's diagnostic stream is pumped line by line; lines with
    /// an elapsed-time marker yield progress reports when the total duration
    /// is known. A zero duration disables percentage progress entirely.
    /// Unparsable lines carry no information and are skipped.
    ///
    /// Exit 0 with a non-empty output file is success; a non-zero exit, a
    /// timeout, or a missing/empty output is a failure carrying a bounded
    /// diagnostic tail. The invocation is not retried here.
    pub async fn run(
        &self,
        input: &Path,
        output: &Path,
        settings: &TranscodeSettings,
        duration_secs: f64,
        progress: &ProgressReporter,
    ) -> Result<TranscodeStats> {
        let started = std::time::Instant::now();
        let original_size = tokio::fs::metadata(input)
            .await
            .map_err(|e| Error::transcode(format!("cannot stat input {}: {e}", input.display())))?
            .len();

        let args = self.build_args(input, output, settings, duration_secs);
        debug!("ffmpeg args: {:?}", args);

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::transcode(format!("failed to spawn ffmpeg: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::transcode("failed to capture ffmpeg stderr"))?;

        let mut tail: VecDeque<String> = VecDeque::with_capacity(DIAG_TAIL_LINES);

        let pump = async {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(elapsed) = parse_elapsed_secs(&line)
                    && duration_secs > 0.0
                {
                    let percent = (elapsed / duration_secs * 100.0).clamp(0.0, 99.0) as u8;
                    progress.report(percent);
                }
                if tail.len() == DIAG_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            child.wait().await
        };

        let waited = tokio::time::timeout(self.job_timeout, pump).await;
        let status = match waited {
            Ok(result) => {
                result.map_err(|e| Error::transcode(format!("failed waiting for ffmpeg: {e}")))?
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed-out ffmpeg: {}", e);
                }
                return Err(Error::transcode(format!(
                    "ffmpeg timed out after {}s",
                    self.job_timeout.as_secs()
                )));
            }
        };

        if !status.success() {
            return Err(Error::transcode(format!(
                "ffmpeg exited with code {}: {}",
                status.code().unwrap_or(-1),
                tail_excerpt(&tail)
            )));
        }

        let output_size = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        if output_size == 0 {
            return Err(Error::transcode(format!(
                "ffmpeg produced no output at {}",
                output.display()
            )));
        }

        Ok(TranscodeStats {
            original_size,
            output_size,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }
}

fn parse_probe_output(stdout: &[u8]) -> Result<MediaInfo> {
    let parsed: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| Error::probe(format!("unparsable ffprobe output: {e}")))?;

    let duration_secs = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    let stream = parsed.streams.first();
    Ok(MediaInfo {
        duration_secs,
        width: stream.and_then(|s| s.width),
        height: stream.and_then(|s| s.height),
        codec: stream.and_then(|s| s.codec_name.clone()),
        bit_rate_kbps: stream
            .and_then(|s| s.bit_rate.as_deref())
            .and_then(|b| b.parse::<u64>().ok())
            .map(|b| (b / 1000) as u32),
    })
}

/// Extract the elapsed-time marker (`time=HH:MM:SS.ms`) from a diagnostic
/// line. Truncated or malformed lines carry no new information and yield
/// `None`.
fn parse_elapsed_secs(line: &str) -> Option<f64> {
    let idx = line.find("time=")?;
    let token = line[idx + 5..].split_whitespace().next()?;
    parse_time(token)
}

/// Parse an `HH:MM:SS[.ms]` timestamp to seconds.
fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    if hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn tail_excerpt(tail: &VecDeque<String>) -> String {
    let joined = tail
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" | ");
    if joined.chars().count() > DIAG_MAX_CHARS {
        joined.chars().skip(joined.chars().count() - DIAG_MAX_CHARS).collect()
    } else {
        joined
    }
}
