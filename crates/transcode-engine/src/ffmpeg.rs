//! FFmpeg-backed decode and encode engines, and a direct FFmpeg transcoder.
//!
//! Decoding runs one `ffmpeg` process per attached output and streams raw
//! ARGB frames or PCM over its stdout. Encoding runs one `ffmpeg` process
//! per input, fed over stdin, each writing an intermediate next to the
//! destination; `finish` muxes the intermediates with stream copy and
//! removes them.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use videokit_common::config::EngineConfig;
use videokit_common::error::{EngineError, EngineResult, VideoKitError, VideoKitResult};
use videokit_common::paths::{remove_quietly, PathProvider};
use videokit_common::time::MediaTime;
use videokit_media_model::{AffineTransform, AssetInfo, TrackKind, TrackMetadata};

use crate::engine::{
    AudioCodec, ContainerFormat, DecodeEngine, DecodeOutput, DecodeSession, EncodeEngine,
    EncodeSession, EncodeSettings, EncoderInput, MetadataProvider, OutputFormat, PixelFormat,
    Sample, ScalingMode, VideoCodec, AUDIO_BITRATE, AUDIO_CHANNELS, AUDIO_SAMPLE_RATE,
};
use crate::pipeline::Transcoder;
use crate::probe::FfprobeMetadata;
use crate::process::{collect_stderr, drain_stderr, read_chunk, run_tool};

/// Timescale for decoded video presentation times.
const VIDEO_TIMESCALE: i32 = 90_000;

/// PCM frames per decoded audio sample.
const AUDIO_CHUNK_FRAMES: usize = 1024;

/// Frame rate assumed when the source does not report one.
const FALLBACK_FRAME_RATE: f64 = 30.0;

fn to_args<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn effective_frame_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        FALLBACK_FRAME_RATE
    }
}

/// ffmpeg arguments decoding one track of `source` to stdout.
pub fn decode_args(source: &Path, track: &TrackMetadata, format: OutputFormat) -> Vec<String> {
    let mut args = to_args(["-nostdin", "-hide_banner", "-loglevel", "error"]);
    // Frames are delivered as coded; the stored transform travels separately.
    args.extend(to_args(["-noautorotate", "-i"]));
    args.push(path_arg(source));
    args.push("-map".to_string());
    args.push(format!("0:{}", track.index));

    match format {
        OutputFormat::Video {
            pixel_format: PixelFormat::Argb32,
        } => args.extend(to_args(["-f", "rawvideo", "-pix_fmt", "argb"])),
        OutputFormat::Audio {
            sample_rate,
            channels,
        } => {
            args.extend(to_args(["-f", "s16le", "-acodec", "pcm_s16le", "-ar"]));
            args.push(sample_rate.to_string());
            args.push("-ac".to_string());
            args.push(channels.to_string());
        }
    }
    args.push("pipe:1".to_string());
    args
}

/// ffmpeg arguments encoding stdin into `intermediate`.
pub fn encoder_args(settings: &EncodeSettings, intermediate: &Path) -> Vec<String> {
    let mut args = to_args(["-hide_banner", "-loglevel", "error", "-y"]);
    match settings {
        EncodeSettings::Video(video) => {
            let (w, h) = (video.width, video.height);
            args.extend(to_args(["-f", "rawvideo", "-pix_fmt", "argb", "-s"]));
            args.push(format!("{w}x{h}"));
            args.push("-framerate".to_string());
            args.push(format!("{}", effective_frame_rate(video.frame_rate)));
            args.extend(to_args(["-i", "pipe:0", "-vf"]));
            args.push(match video.scaling_mode {
                ScalingMode::ResizeAspectFill => {
                    format!("scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}")
                }
            });
            match video.codec {
                VideoCodec::H264 => args.extend(to_args([
                    "-c:v", "libx264", "-preset", "medium", "-pix_fmt", "yuv420p",
                ])),
            }
            args.push("-b:v".to_string());
            args.push(video.average_bitrate.to_string());
            args.push("-an".to_string());
        }
        EncodeSettings::Audio(audio) => {
            args.extend(to_args(["-f", "s16le", "-ar"]));
            args.push(audio.sample_rate.to_string());
            args.push("-ac".to_string());
            args.push(audio.channels.to_string());
            args.extend(to_args(["-i", "pipe:0"]));
            match audio.codec {
                AudioCodec::Aac => args.extend(to_args(["-c:a", "aac"])),
            }
            args.push("-b:a".to_string());
            args.push(audio.bitrate.to_string());
            args.push("-vn".to_string());
        }
    }
    args.push(path_arg(intermediate));
    args
}

/// Counter-clockwise display rotation for a stored transform, as the muxer
/// expects it. `None` for an upright transform.
pub fn display_rotation(transform: &AffineTransform) -> Option<f64> {
    let clockwise = match transform.quarter_turns() {
        Some(turns) => turns as f64 * 90.0,
        None => transform.rotation_degrees().round(),
    };
    let ccw = (-clockwise).rem_euclid(360.0);
    if ccw == 0.0 {
        None
    } else if ccw > 180.0 {
        Some(ccw - 360.0)
    } else {
        Some(ccw)
    }
}

/// ffmpeg arguments muxing encoded intermediates into `destination`.
pub fn mux_args(
    video: &Path,
    audio: Option<&Path>,
    rotation: Option<f64>,
    network_optimized: bool,
    destination: &Path,
) -> Vec<String> {
    let mut args = to_args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y"]);
    if let Some(degrees) = rotation {
        args.push("-display_rotation:v:0".to_string());
        args.push(format!("{degrees}"));
    }
    args.push("-i".to_string());
    args.push(path_arg(video));
    if let Some(audio) = audio {
        args.push("-i".to_string());
        args.push(path_arg(audio));
    }
    args.extend(to_args(["-map", "0:v:0"]));
    if audio.is_some() {
        args.extend(to_args(["-map", "1:a:0"]));
    }
    args.extend(to_args(["-c", "copy"]));
    if network_optimized {
        args.extend(to_args(["-movflags", "+faststart"]));
    }
    args.push(path_arg(destination));
    args
}

/// Where an encoder input writes before muxing.
pub fn intermediate_path(destination: &Path, kind: TrackKind) -> PathBuf {
    let ext = match kind {
        TrackKind::Video => "video.mp4",
        TrackKind::Audio => "audio.m4a",
    };
    destination.with_extension(ext)
}

fn spawn(binary: &Path, args: &[String], stdin: Stdio, stdout: Stdio) -> EngineResult<Child> {
    tracing::debug!(binary = %binary.display(), args = ?args, "Spawning ffmpeg");
    Command::new(binary)
        .args(args)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::unavailable(format!("failed to start {}: {e}", binary.display())))
}

/// [`DecodeEngine`] running one ffmpeg process per output.
#[derive(Debug, Clone)]
pub struct FfmpegDecodeEngine {
    ffmpeg_bin: PathBuf,
    metadata: FfprobeMetadata,
}

impl FfmpegDecodeEngine {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, metadata: FfprobeMetadata) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            metadata,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.ffmpeg_bin, FfprobeMetadata::from_config(config))
    }
}

#[async_trait]
impl DecodeEngine for FfmpegDecodeEngine {
    async fn open(&self, source: &Path) -> EngineResult<Box<dyn DecodeSession>> {
        let asset = self.metadata.load(source).await?;
        Ok(Box::new(FfmpegDecodeSession {
            source: source.to_path_buf(),
            asset,
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            state: Arc::new(DecodeState::new()),
        }))
    }
}

#[derive(Debug)]
struct DecodeState {
    started: AtomicBool,
    cancelled: AtomicBool,
    /// Flipped to `true` on cancel; every decoder process watches it.
    kill: watch::Sender<bool>,
}

impl DecodeState {
    fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            kill: watch::Sender::new(false),
        }
    }
}

/// Own a decoder process until it exits, killing it as soon as `kill`
/// turns `true`.
fn supervise_decoder(
    mut child: Child,
    mut kill: watch::Receiver<bool>,
) -> JoinHandle<std::io::Result<ExitStatus>> {
    tokio::spawn(async move {
        let cancelled = async { kill.wait_for(|kill| *kill).await.is_ok() };
        tokio::select! {
            status = child.wait() => status,
            true = cancelled => {
                tracing::debug!(pid = ?child.id(), "Killing cancelled decoder");
                child.kill().await?;
                child.wait().await
            }
        }
    })
}

struct FfmpegDecodeSession {
    source: PathBuf,
    asset: AssetInfo,
    ffmpeg_bin: PathBuf,
    state: Arc<DecodeState>,
}

#[async_trait]
impl DecodeSession for FfmpegDecodeSession {
    fn asset(&self) -> &AssetInfo {
        &self.asset
    }

    fn attach_output(
        &mut self,
        track: &TrackMetadata,
        format: OutputFormat,
    ) -> EngineResult<Box<dyn DecodeOutput>> {
        if self.state.started.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_state("outputs must be attached before start"));
        }
        if format.kind() != track.kind {
            return Err(EngineError::unsupported(format!(
                "cannot decode {} track {} as {format:?}",
                track.kind, track.index
            )));
        }

        let chunk_size = match format {
            OutputFormat::Video { pixel_format } => {
                let (w, h) = track.natural_size.to_pixels();
                if w == 0 || h == 0 {
                    return Err(EngineError::unsupported(format!(
                        "video track {} reports no frame size",
                        track.index
                    )));
                }
                w as usize * h as usize * pixel_format.bytes_per_pixel()
            }
            OutputFormat::Audio { channels, .. } => AUDIO_CHUNK_FRAMES * channels as usize * 2,
        };

        let args = decode_args(&self.source, track, format);
        let mut child = spawn(&self.ffmpeg_bin, &args, Stdio::null(), Stdio::piped())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::process("failed to capture decoder stdout"))?;
        let stderr = drain_stderr(child.stderr.take());
        let exit = supervise_decoder(child, self.state.kill.subscribe());

        Ok(Box::new(FfmpegDecodeOutput {
            kind: track.kind,
            format,
            frame_rate: effective_frame_rate(track.nominal_frame_rate),
            chunk_size,
            produced: 0,
            exit: Some(exit),
            stdout,
            stderr: Some(stderr),
            state: Arc::clone(&self.state),
            done: false,
        }))
    }

    async fn start(&mut self) -> EngineResult<()> {
        self.state.started.store(true, Ordering::SeqCst);
        tracing::debug!(path = %self.source.display(), "Decode session started");
        Ok(())
    }

    async fn cancel(&mut self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.kill.send_replace(true);
        tracing::debug!(path = %self.source.display(), "Decode session cancelled");
    }
}

struct FfmpegDecodeOutput {
    kind: TrackKind,
    format: OutputFormat,
    frame_rate: f64,
    chunk_size: usize,
    /// Video frames or PCM frames delivered so far.
    produced: u64,
    exit: Option<JoinHandle<std::io::Result<ExitStatus>>>,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    state: Arc<DecodeState>,
    done: bool,
}

impl FfmpegDecodeOutput {
    async fn end_of_stream(&mut self) -> EngineResult<Option<Sample>> {
        self.done = true;
        let Some(exit) = self.exit.take() else {
            return Ok(None);
        };
        let status = exit
            .await
            .map_err(|e| EngineError::process(format!("decoder supervisor failed: {e}")))??;
        let stderr = match self.stderr.take() {
            Some(task) => collect_stderr(task).await,
            None => String::new(),
        };
        if self.state.cancelled.load(Ordering::SeqCst) {
            return Ok(None);
        }
        if !status.success() {
            return Err(EngineError::process(format!(
                "{} decoder failed (status {status}): {stderr}",
                self.kind
            )));
        }
        tracing::debug!(track = %self.kind, produced = self.produced, "Decoder drained");
        Ok(None)
    }
}

#[async_trait]
impl DecodeOutput for FfmpegDecodeOutput {
    async fn next_sample(&mut self) -> EngineResult<Option<Sample>> {
        if !self.state.started.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_state("decode session not started"));
        }
        if self.done {
            return Ok(None);
        }
        if self.state.cancelled.load(Ordering::SeqCst) {
            self.done = true;
            return Ok(None);
        }

        let data = read_chunk(&mut self.stdout, self.chunk_size).await?;
        match self.format {
            OutputFormat::Video { .. } => {
                if data.len() < self.chunk_size {
                    if !data.is_empty() {
                        tracing::warn!(bytes = data.len(), "Dropping truncated trailing frame");
                    }
                    return self.end_of_stream().await;
                }
                let pts = MediaTime::from_seconds(
                    self.produced as f64 / self.frame_rate,
                    VIDEO_TIMESCALE,
                );
                self.produced += 1;
                Ok(Some(Sample {
                    kind: TrackKind::Video,
                    pts,
                    duration: MediaTime::from_seconds(1.0 / self.frame_rate, VIDEO_TIMESCALE),
                    data,
                }))
            }
            OutputFormat::Audio {
                sample_rate,
                channels,
            } => {
                let frame_bytes = channels as usize * 2;
                let frames = (data.len() / frame_bytes) as u64;
                if frames == 0 {
                    return self.end_of_stream().await;
                }
                let timescale = sample_rate as i32;
                let pts = MediaTime::new(self.produced as i64, timescale);
                self.produced += frames;
                Ok(Some(Sample {
                    kind: TrackKind::Audio,
                    pts,
                    duration: MediaTime::new(frames as i64, timescale),
                    data,
                }))
            }
        }
    }
}

/// [`EncodeEngine`] running one ffmpeg encoder per input plus a final mux.
#[derive(Debug, Clone)]
pub struct FfmpegEncodeEngine {
    ffmpeg_bin: PathBuf,
}

impl FfmpegEncodeEngine {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.ffmpeg_bin)
    }
}

#[async_trait]
impl EncodeEngine for FfmpegEncodeEngine {
    async fn open(
        &self,
        destination: &Path,
        container: ContainerFormat,
    ) -> EngineResult<Box<dyn EncodeSession>> {
        let ContainerFormat::Mp4 = container;
        if destination.exists() {
            return Err(EngineError::invalid_state(format!(
                "{} already exists",
                destination.display()
            )));
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Box::new(FfmpegEncodeSession {
            destination: destination.to_path_buf(),
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            inputs: Vec::new(),
            rotation: None,
            network_optimized: false,
            started: Arc::new(AtomicBool::new(false)),
            done: false,
        }))
    }
}

struct EncoderProcess {
    kind: TrackKind,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    intermediate: PathBuf,
    progress: Arc<InputProgress>,
}

#[derive(Debug, Default)]
struct InputProgress {
    appended: AtomicU64,
    finished: AtomicBool,
}

struct FfmpegEncodeSession {
    destination: PathBuf,
    ffmpeg_bin: PathBuf,
    inputs: Vec<EncoderProcess>,
    rotation: Option<f64>,
    network_optimized: bool,
    started: Arc<AtomicBool>,
    done: bool,
}

impl FfmpegEncodeSession {
    async fn wait_encoders(&mut self) -> EngineResult<()> {
        for input in &mut self.inputs {
            let status = input.child.wait().await?;
            let stderr = match input.stderr.take() {
                Some(task) => collect_stderr(task).await,
                None => String::new(),
            };
            if !status.success() {
                return Err(EngineError::process(format!(
                    "{} encoder failed (status {status}): {stderr}",
                    input.kind
                )));
            }
        }
        Ok(())
    }

    fn encoded(&self, kind: TrackKind) -> Option<&Path> {
        self.inputs
            .iter()
            .find(|i| i.kind == kind && i.progress.appended.load(Ordering::SeqCst) > 0)
            .map(|i| i.intermediate.as_path())
    }

    async fn mux(&mut self) -> EngineResult<PathBuf> {
        self.wait_encoders().await?;
        let video = self
            .encoded(TrackKind::Video)
            .ok_or_else(|| EngineError::process("no video frames were encoded"))?;
        let args = mux_args(
            video,
            self.encoded(TrackKind::Audio),
            self.rotation,
            self.network_optimized,
            &self.destination,
        );
        tracing::debug!(args = ?args, "Muxing encoded tracks");
        run_tool(&self.ffmpeg_bin, &args).await?;
        Ok(self.destination.clone())
    }

    fn remove_intermediates(&self) {
        for input in &self.inputs {
            remove_quietly(&input.intermediate);
        }
    }
}

#[async_trait]
impl EncodeSession for FfmpegEncodeSession {
    fn destination(&self) -> &Path {
        &self.destination
    }

    fn add_input(&mut self, settings: EncodeSettings) -> EngineResult<Box<dyn EncoderInput>> {
        let kind = settings.kind();
        if self.started.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_state("inputs must be added before start"));
        }
        if self.inputs.iter().any(|i| i.kind == kind) {
            return Err(EngineError::invalid_state(format!("{kind} input already added")));
        }
        if let EncodeSettings::Video(video) = &settings {
            self.rotation = display_rotation(&video.transform);
        }

        let intermediate = intermediate_path(&self.destination, kind);
        let args = encoder_args(&settings, &intermediate);
        let mut child = spawn(&self.ffmpeg_bin, &args, Stdio::piped(), Stdio::null())?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::process("failed to capture encoder stdin"))?;
        let stderr = drain_stderr(child.stderr.take());
        let progress = Arc::new(InputProgress::default());

        self.inputs.push(EncoderProcess {
            kind,
            child,
            stderr: Some(stderr),
            intermediate,
            progress: Arc::clone(&progress),
        });

        Ok(Box::new(FfmpegEncoderInput {
            kind,
            stdin: Some(stdin),
            progress,
            started: Arc::clone(&self.started),
        }))
    }

    fn set_network_optimized(&mut self, enabled: bool) {
        self.network_optimized = enabled;
    }

    async fn start(&mut self) -> EngineResult<()> {
        if self.inputs.is_empty() {
            return Err(EngineError::invalid_state("no encoder inputs"));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        tracing::debug!(path = %self.destination.display(), at = %at, "Encode session started");
    }

    async fn finish(&mut self) -> EngineResult<PathBuf> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_state("encode session not started"));
        }
        if let Some(open) = self
            .inputs
            .iter()
            .find(|i| !i.progress.finished.load(Ordering::SeqCst))
        {
            return Err(EngineError::invalid_state(format!(
                "{} input still open",
                open.kind
            )));
        }

        let result = self.mux().await;
        self.remove_intermediates();
        if result.is_ok() {
            self.done = true;
        }
        result
    }

    async fn cancel(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        for input in &mut self.inputs {
            let _ = input.child.kill().await;
        }
        self.remove_intermediates();
        remove_quietly(&self.destination);
    }
}

struct FfmpegEncoderInput {
    kind: TrackKind,
    stdin: Option<ChildStdin>,
    progress: Arc<InputProgress>,
    started: Arc<AtomicBool>,
}

#[async_trait]
impl EncoderInput for FfmpegEncoderInput {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_ready(&self) -> bool {
        self.stdin.is_some()
    }

    // The pipe applies backpressure inside `append`.
    async fn ready(&mut self) {}

    async fn append(&mut self, sample: Sample) -> EngineResult<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_state("encode session not started"));
        }
        if sample.kind != self.kind {
            return Err(EngineError::invalid_state(format!(
                "{} sample appended to {} input",
                sample.kind, self.kind
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EngineError::invalid_state("append after mark_finished"))?;
        stdin.write_all(&sample.data).await?;
        self.progress.appended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_finished(&mut self) -> EngineResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
        }
        self.progress.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// [`Transcoder`] that hands the whole re-encode to a single ffmpeg run.
///
/// The stored display transform is carried over untouched, matching the
/// sample-copy pipeline.
pub struct FfmpegTranscoder {
    ffmpeg_bin: PathBuf,
    paths: Arc<dyn PathProvider>,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, paths: Arc<dyn PathProvider>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            paths,
        }
    }

    pub fn from_config(config: &EngineConfig, paths: Arc<dyn PathProvider>) -> Self {
        Self::new(&config.ffmpeg_bin, paths)
    }
}

/// ffmpeg arguments for a one-shot re-encode at `bitrate`.
pub fn direct_transcode_args(source: &Path, destination: &Path, bitrate: u64) -> Vec<String> {
    let mut args = to_args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y"]);
    args.extend(to_args(["-noautorotate", "-i"]));
    args.push(path_arg(source));
    args.extend(to_args([
        "-map", "0:v:0", "-map", "0:a:0?", "-c:v", "libx264", "-preset", "medium", "-pix_fmt",
        "yuv420p",
    ]));
    for flag in ["-b:v", "-maxrate"] {
        args.push(flag.to_string());
        args.push(bitrate.to_string());
    }
    args.push("-bufsize".to_string());
    args.push(bitrate.saturating_mul(2).to_string());
    args.extend(to_args(["-c:a", "aac", "-b:a"]));
    args.push(AUDIO_BITRATE.to_string());
    args.push("-ar".to_string());
    args.push(AUDIO_SAMPLE_RATE.to_string());
    args.push("-ac".to_string());
    args.push(AUDIO_CHANNELS.to_string());
    args.extend(to_args(["-movflags", "+faststart"]));
    args.push(path_arg(destination));
    args
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, source: &Path, target_bitrate: u64) -> VideoKitResult<PathBuf> {
        if !source.exists() {
            return Err(VideoKitError::decode_init(format!(
                "{} does not exist",
                source.display()
            )));
        }
        let destination = self
            .paths
            .unique_output()
            .map_err(|e| VideoKitError::encode_init(e.to_string()))?;
        let args = direct_transcode_args(source, &destination, target_bitrate);

        tracing::info!(
            path = %source.display(),
            bitrate = target_bitrate,
            "Starting ffmpeg transcode"
        );
        match run_tool(&self.ffmpeg_bin, &args).await {
            Ok(_) => Ok(destination),
            Err(EngineError::Unavailable { message }) => {
                Err(VideoKitError::encode_init(message))
            }
            Err(e) => {
                remove_quietly(&destination);
                Err(VideoKitError::engine(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AudioEncodeSettings, VideoEncodeSettings};
    use crate::pipeline::SampleCopyTranscoder;
    use crate::process::binary_available;
    use videokit_common::paths::TempDirPaths;
    use videokit_media_model::Size;

    fn video_track() -> TrackMetadata {
        let mut track = TrackMetadata::video(
            Size::new(640.0, 360.0),
            AffineTransform::new(0.0, 1.0, -1.0, 0.0, 360.0, 0.0),
            2e6,
        );
        track.index = 0;
        track.nominal_frame_rate = 25.0;
        track
    }

    #[test]
    fn test_decode_args_select_track_and_format() {
        let mut audio = TrackMetadata::audio(128_000.0);
        audio.index = 2;
        let args = decode_args(Path::new("/in/clip.mov"), &audio, OutputFormat::pcm_stereo());
        let joined = args.join(" ");
        assert!(joined.contains("-noautorotate -i /in/clip.mov -map 0:2"));
        assert!(joined.ends_with("-f s16le -acodec pcm_s16le -ar 44100 -ac 2 pipe:1"));

        let args = decode_args(Path::new("/in/clip.mov"), &video_track(), OutputFormat::argb());
        assert!(args.join(" ").ends_with("-map 0:0 -f rawvideo -pix_fmt argb pipe:1"));
    }

    #[test]
    fn test_encoder_args_for_video_and_audio() {
        let settings = EncodeSettings::Video(VideoEncodeSettings::h264_for(&video_track(), 1_500_000));
        let args = encoder_args(&settings, Path::new("/out/x.video.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-s 640x360 -framerate 25 -i pipe:0"));
        assert!(joined.contains("crop=640:360"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-b:v 1500000"));
        assert!(joined.ends_with("-an /out/x.video.mp4"));

        let audio = EncodeSettings::Audio(AudioEncodeSettings::default());
        let joined = encoder_args(&audio, Path::new("/out/x.audio.m4a")).join(" ");
        assert!(joined.contains("-f s16le -ar 44100 -ac 2 -i pipe:0 -c:a aac -b:a 128000"));
    }

    #[test]
    fn test_display_rotation_is_counter_clockwise() {
        assert_eq!(display_rotation(&AffineTransform::IDENTITY), None);
        let up = AffineTransform::new(0.0, 1.0, -1.0, 0.0, 1080.0, 0.0);
        assert_eq!(display_rotation(&up), Some(-90.0));
        let down = AffineTransform::new(0.0, -1.0, 1.0, 0.0, 0.0, 1920.0);
        assert_eq!(display_rotation(&down), Some(90.0));
        let left = AffineTransform::new(-1.0, 0.0, 0.0, -1.0, 1920.0, 1080.0);
        assert_eq!(display_rotation(&left), Some(180.0));
    }

    #[test]
    fn test_mux_args_optional_parts() {
        let dest = Path::new("/out/x.mp4");
        let video = intermediate_path(dest, TrackKind::Video);
        let audio = intermediate_path(dest, TrackKind::Audio);
        assert_eq!(video, Path::new("/out/x.video.mp4"));
        assert_eq!(audio, Path::new("/out/x.audio.m4a"));

        let full = mux_args(&video, Some(&audio), Some(-90.0), true, dest).join(" ");
        assert!(full.contains("-display_rotation:v:0 -90 -i /out/x.video.mp4 -i /out/x.audio.m4a"));
        assert!(full.contains("-map 0:v:0 -map 1:a:0 -c copy -movflags +faststart /out/x.mp4"));

        let bare = mux_args(&video, None, None, false, dest).join(" ");
        assert!(!bare.contains("display_rotation"));
        assert!(!bare.contains("1:a:0"));
        assert!(!bare.contains("faststart"));
    }

    #[test]
    fn test_direct_transcode_caps_rate() {
        let joined =
            direct_transcode_args(Path::new("/in.mov"), Path::new("/out.mp4"), 2_000_000).join(" ");
        assert!(joined.contains("-b:v 2000000 -maxrate 2000000 -bufsize 4000000"));
        assert!(joined.contains("-map 0:a:0?"));
        assert!(joined.ends_with("-movflags +faststart /out.mp4"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_decoder_without_reader() {
        let state = DecodeState::new();
        let child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let exit = supervise_decoder(child, state.kill.subscribe());

        state.kill.send_replace(true);
        let status = tokio::time::timeout(std::time::Duration::from_secs(5), exit)
            .await
            .expect("decoder still running after cancel")
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_decoder_exit_is_reported_without_cancel() {
        let state = DecodeState::new();
        let child = Command::new("true").spawn().unwrap();
        let status = supervise_decoder(child, state.kill.subscribe())
            .await
            .unwrap()
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_sample_copy_through_ffmpeg_when_installed() {
        let config = EngineConfig::default();
        if !binary_available(&config.ffmpeg_bin).await || !binary_available(&config.ffprobe_bin).await {
            eprintln!("ffmpeg/ffprobe not installed; skipping");
            return;
        }

        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source.mp4");
        let generated = run_tool(
            &config.ffmpeg_bin,
            [
                "-hide_banner", "-loglevel", "error", "-y", "-f", "lavfi", "-i",
                "testsrc=size=160x120:rate=10", "-f", "lavfi", "-i",
                "sine=frequency=440:sample_rate=44100", "-t", "1", "-c:v", "libx264",
                "-pix_fmt", "yuv420p", "-c:a", "aac", "-shortest",
            ]
            .iter()
            .map(|s| s.to_string())
            .chain(std::iter::once(path_arg(&source))),
        )
        .await;
        if generated.is_err() {
            eprintln!("ffmpeg build cannot generate a test clip; skipping");
            return;
        }

        let paths = Arc::new(TempDirPaths::in_dir(tmp.path().join("out")));
        let transcoder = SampleCopyTranscoder::new(
            FfmpegDecodeEngine::from_config(&config),
            FfmpegEncodeEngine::from_config(&config),
            paths,
        );
        let output = transcoder.transcode(&source, 200_000).await.unwrap();

        let asset = FfprobeMetadata::from_config(&config)
            .load(&output)
            .await
            .unwrap();
        let video = asset.first_track(TrackKind::Video).unwrap();
        assert_eq!(video.natural_size, Size::new(160.0, 120.0));
        assert!(asset.has_track(TrackKind::Audio));
        assert!(!intermediate_path(&output, TrackKind::Video).exists());
    }
}
