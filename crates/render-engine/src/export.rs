//! Export engines: render a video composition of a source into a file.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use videokit_common::config::EngineConfig;
use videokit_common::error::{EngineError, EngineResult};
use videokit_common::paths::remove_quietly;
use videokit_common::time::TimeRange;
use videokit_media_model::{Quality, Size, VideoComposition};

use crate::filter::composition_filters;

/// Progress callback for export rendering.
pub type ProgressCallback = Arc<dyn Fn(ExportProgress) + Send + Sync>;

/// Export progress report.
#[derive(Debug, Clone)]
pub struct ExportProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    /// Current stage.
    pub stage: ExportStage,
}

/// Stages of the export process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Rendering,
    Finalizing,
    Complete,
}

/// One render of a prepared source.
#[derive(Clone)]
pub struct ExportRequest {
    pub composition: VideoComposition,

    /// Portion of the source to export; `None` exports everything.
    pub time_range: Option<TimeRange>,

    /// Output file path.
    pub output: PathBuf,

    pub progress: Option<ProgressCallback>,
}

impl ExportRequest {
    pub fn new(composition: VideoComposition, output: impl Into<PathBuf>) -> Self {
        Self {
            composition,
            time_range: None,
            output: output.into(),
            progress: None,
        }
    }

    pub fn with_time_range(mut self, range: Option<TimeRange>) -> Self {
        self.time_range = range;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Creates export sessions for a source at a quality profile.
#[async_trait]
pub trait ExportEngine: Send + Sync {
    /// Open `source` for export. Failure here means the engine could not
    /// be initialized for this source.
    async fn prepare(&self, source: &Path, quality: &Quality)
        -> EngineResult<Box<dyn ExportSession>>;

    /// Engine name.
    fn name(&self) -> &str;
}

/// A prepared export.
#[async_trait]
pub trait ExportSession: Send {
    /// Render the request. Only a completed export reports success.
    async fn export(&mut self, request: ExportRequest) -> EngineResult<PathBuf>;
}

/// [`ExportEngine`] driving the `ffmpeg` command-line tool.
#[derive(Debug, Clone)]
pub struct FfmpegExporter {
    ffmpeg_bin: PathBuf,
    ffprobe_bin: PathBuf,
}

impl FfmpegExporter {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.ffmpeg_bin, &config.ffprobe_bin)
    }

    /// Whether both tools are installed.
    pub async fn is_available(&self) -> bool {
        command_exists(&self.ffmpeg_bin).await && command_exists(&self.ffprobe_bin).await
    }
}

#[async_trait]
impl ExportEngine for FfmpegExporter {
    async fn prepare(
        &self,
        source: &Path,
        quality: &Quality,
    ) -> EngineResult<Box<dyn ExportSession>> {
        if !source.exists() {
            return Err(EngineError::unsupported(format!(
                "{} does not exist",
                source.display()
            )));
        }
        if !command_exists(&self.ffmpeg_bin).await {
            return Err(EngineError::unavailable(format!(
                "{} not found in PATH",
                self.ffmpeg_bin.display()
            )));
        }

        let probe = probe_video(&self.ffprobe_bin, source).await.ok_or_else(|| {
            EngineError::unsupported(format!("could not read video size of {}", source.display()))
        })?;
        tracing::info!(
            path = %source.display(),
            width = probe.width,
            height = probe.height,
            %quality,
            "Prepared ffmpeg export"
        );

        Ok(Box::new(FfmpegExportSession {
            source: source.to_path_buf(),
            quality: *quality,
            natural: Size::new(probe.width as f64, probe.height as f64),
            duration_secs: probe.duration_secs,
            ffmpeg_bin: self.ffmpeg_bin.clone(),
        }))
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

#[derive(Debug, Clone)]
struct ExportPlan {
    ffmpeg_args: Vec<String>,
    expected_duration_secs: f64,
}

struct FfmpegExportSession {
    source: PathBuf,
    quality: Quality,
    natural: Size,
    duration_secs: f64,
    ffmpeg_bin: PathBuf,
}

impl FfmpegExportSession {
    fn build_plan(&self, request: &ExportRequest) -> EngineResult<ExportPlan> {
        let mut args: Vec<String> = [
            "-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-progress", "pipe:1",
            "-nostats",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let passthrough = self.quality.is_passthrough();
        if !passthrough {
            // The composition transform is the only rotation applied.
            args.extend(
                ["-noautorotate", "-display_rotation:v:0", "0"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
        args.push("-i".to_string());
        args.push(self.source.to_string_lossy().into_owned());

        let mut expected_duration_secs = self.duration_secs;
        if let Some(range) = &request.time_range {
            expected_duration_secs = range.duration.seconds();
            args.push("-ss".to_string());
            args.push(format!("{:.3}", range.start.seconds()));
            args.push("-t".to_string());
            args.push(format!("{:.3}", range.duration.seconds()));
        }

        args.extend(["-map", "0:v:0", "-map", "0:a:0?"].iter().map(|s| s.to_string()));

        if passthrough {
            args.extend(
                ["-c", "copy", "-movflags", "+faststart"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        } else {
            let filters = composition_filters(&request.composition, self.natural, &self.quality)?;
            if let Some(chain) = filters.chain() {
                args.push("-vf".to_string());
                args.push(chain);
            }
            args.extend(codec_args_for_quality(&self.quality));
        }

        args.push(request.output.to_string_lossy().into_owned());
        Ok(ExportPlan {
            ffmpeg_args: args,
            expected_duration_secs,
        })
    }

    async fn run_ffmpeg(
        &self,
        plan: &ExportPlan,
        progress: Option<&ProgressCallback>,
    ) -> EngineResult<()> {
        tracing::debug!(args = ?plan.ffmpeg_args, "Running ffmpeg");
        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&plan.ffmpeg_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::unavailable(format!("Failed to start ffmpeg: {e}")))?;

        tracing::info!(
            pid = child.id(),
            args_len = plan.ffmpeg_args.len(),
            expected_duration_secs = plan.expected_duration_secs,
            "ffmpeg process started"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::process("Failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::process("Failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently to avoid ffmpeg blocking on a full stderr pipe.
        let stderr_task = tokio::spawn(async move {
            let mut stderr = stderr;
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let start = std::time::Instant::now();
        let mut lines = BufReader::new(stdout).lines();
        let mut latest_progress = ProgressState::default();
        let mut last_progress_secs = 0.0f64;
        let mut last_progress_wall = std::time::Instant::now();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| EngineError::process(format!("Failed reading ffmpeg progress: {e}")))?
        {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            latest_progress.update(key, value);
            if key != "progress" {
                continue;
            }

            if latest_progress.out_time_secs > last_progress_secs + 0.001 {
                last_progress_secs = latest_progress.out_time_secs;
                last_progress_wall = std::time::Instant::now();
            }
            if let Some(cb) = progress {
                cb(progress_report(
                    &latest_progress,
                    plan.expected_duration_secs,
                    start.elapsed().as_secs_f64(),
                ));
            }
            if last_progress_wall.elapsed().as_secs() >= 10 {
                tracing::warn!(
                    out_time_secs = latest_progress.out_time_secs,
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    "No ffmpeg progress advancement for 10s"
                );
                last_progress_wall = std::time::Instant::now();
            }
        }

        let status = child.wait().await?;
        let stderr_output = stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            return Err(EngineError::process(format!(
                "ffmpeg export failed (status {}): {}",
                status,
                stderr_output.trim()
            )));
        }

        if let Some(cb) = progress {
            cb(ExportProgress {
                progress: 1.0,
                eta_secs: 0.0,
                stage: ExportStage::Complete,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ExportSession for FfmpegExportSession {
    async fn export(&mut self, request: ExportRequest) -> EngineResult<PathBuf> {
        let plan = self.build_plan(&request)?;
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if let Err(err) = self.run_ffmpeg(&plan, request.progress.as_ref()).await {
            remove_quietly(&request.output);
            return Err(err);
        }
        if !request.output.exists() {
            return Err(EngineError::process("ffmpeg reported success but wrote no file"));
        }
        tracing::info!(output = %request.output.display(), "Export complete");
        Ok(request.output)
    }
}

fn codec_args_for_quality(quality: &Quality) -> Vec<String> {
    let mut args: Vec<String> = [
        "-c:v", "libx264", "-preset", "medium", "-profile:v", "high", "-pix_fmt", "yuv420p",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    match quality.video_bitrate() {
        Some(bitrate) => {
            args.push("-b:v".to_string());
            args.push(bitrate.to_string());
        }
        None => {
            args.push("-crf".to_string());
            args.push("20".to_string());
        }
    }

    args.extend(
        ["-c:a", "aac", "-b:a", "128k", "-movflags", "+faststart"]
            .iter()
            .map(|s| s.to_string()),
    );
    args
}

async fn command_exists(binary: &Path) -> bool {
    if binary.components().count() > 1 {
        return binary.is_file();
    }
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {} >/dev/null 2>&1", binary.display()))
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct VideoProbe {
    width: u32,
    height: u32,
    duration_secs: f64,
}

async fn probe_video(ffprobe: &Path, path: &Path) -> Option<VideoProbe> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height:format=duration",
            "-of",
            "csv=p=0:s=x",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }
    parse_probe_output(&String::from_utf8(output.stdout).ok()?)
}

/// Parse `WxH` and duration lines printed by [`probe_video`].
fn parse_probe_output(raw: &str) -> Option<VideoProbe> {
    let mut dims = None;
    let mut duration_secs = 0.0;
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some((w, h)) = line.split_once('x') {
            let width = w.parse::<u32>().ok()?;
            let height = h.trim_end_matches('x').parse::<u32>().ok()?;
            dims = Some((width, height));
        } else if let Ok(secs) = line.parse::<f64>() {
            duration_secs = secs;
        }
    }
    let (width, height) = dims?;
    if width == 0 || height == 0 {
        return None;
    }
    Some(VideoProbe {
        width,
        height,
        duration_secs,
    })
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }
}

fn progress_report(
    state: &ProgressState,
    expected_duration_secs: f64,
    elapsed_secs: f64,
) -> ExportProgress {
    let progress = if expected_duration_secs <= 0.0 {
        0.0
    } else {
        (state.out_time_secs / expected_duration_secs).clamp(0.0, 1.0)
    };

    let eta_secs = if progress > 0.0 {
        (elapsed_secs / progress) - elapsed_secs
    } else {
        0.0
    }
    .max(0.0);

    ExportProgress {
        progress: if state.complete { 1.0 } else { progress },
        eta_secs,
        stage: if state.complete {
            ExportStage::Finalizing
        } else {
            ExportStage::Rendering
        },
    }
}
