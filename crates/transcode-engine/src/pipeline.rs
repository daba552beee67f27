//! Dual-track sample-copy transcode pipeline.
//!
//! Re-encodes a source at a target video bitrate by pulling decoded samples
//! from a decode session and pushing them into an encode session, one pull
//! loop per track. The loops run as separate tasks and meet at a
//! [`CompletionBarrier`]; whichever loop completes it finalizes the output.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::task::JoinSet;

use videokit_common::error::{VideoKitError, VideoKitResult};
use videokit_common::paths::{remove_quietly, PathProvider};
use videokit_common::time::MediaTime;
use videokit_media_model::TrackKind;

use crate::barrier::{CompletionBarrier, Finalize};
use crate::engine::{
    AudioEncodeSettings, ContainerFormat, DecodeEngine, DecodeOutput, DecodeSession, EncodeEngine,
    EncodeSession, EncodeSettings, EncoderInput, OutputFormat, VideoEncodeSettings,
};

/// Strategy that re-encodes a file at a target video bitrate.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Transcode `source`, returning the path of a fresh output file.
    async fn transcode(&self, source: &Path, target_bitrate: u64) -> VideoKitResult<PathBuf>;
}

/// [`Transcoder`] over a pair of decode/encode engines.
pub struct SampleCopyTranscoder<D, E> {
    decoder: D,
    encoder: E,
    paths: Arc<dyn PathProvider>,
}

impl<D: DecodeEngine, E: EncodeEngine> SampleCopyTranscoder<D, E> {
    pub fn new(decoder: D, encoder: E, paths: Arc<dyn PathProvider>) -> Self {
        Self {
            decoder,
            encoder,
            paths,
        }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }
}

#[async_trait]
impl<D: DecodeEngine, E: EncodeEngine> Transcoder for SampleCopyTranscoder<D, E> {
    async fn transcode(&self, source: &Path, target_bitrate: u64) -> VideoKitResult<PathBuf> {
        tracing::info!(
            path = %source.display(),
            bitrate = target_bitrate,
            "Starting sample-copy transcode"
        );

        let mut decode = self
            .decoder
            .open(source)
            .await
            .map_err(|e| VideoKitError::decode_init(e.to_string()))?;

        let asset = decode.asset().clone();
        let Some(video_track) = asset.first_track(TrackKind::Video).cloned() else {
            decode.cancel().await;
            return Err(VideoKitError::AssetTrackInitFailed);
        };

        let audio_output = match asset.first_track(TrackKind::Audio) {
            Some(track) => match decode.attach_output(track, OutputFormat::pcm_stereo()) {
                Ok(output) => Some(output),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not attach audio output");
                    decode.cancel().await;
                    return Err(VideoKitError::OutputAttachFailed {
                        track: TrackKind::Audio,
                    });
                }
            },
            None => {
                tracing::debug!(path = %source.display(), "Source has no audio track");
                None
            }
        };

        let video_output = match decode.attach_output(&video_track, OutputFormat::argb()) {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "Could not attach video output");
                decode.cancel().await;
                return Err(VideoKitError::OutputAttachFailed {
                    track: TrackKind::Video,
                });
            }
        };

        let destination = match self.paths.unique_output() {
            Ok(path) => path,
            Err(e) => {
                decode.cancel().await;
                return Err(VideoKitError::encode_init(e.to_string()));
            }
        };

        let mut encode = match self.encoder.open(&destination, ContainerFormat::Mp4).await {
            Ok(session) => session,
            Err(e) => {
                decode.cancel().await;
                return Err(VideoKitError::encode_init(e.to_string()));
            }
        };

        let video_settings = VideoEncodeSettings::h264_for(&video_track, target_bitrate);
        let inputs = encode
            .add_input(EncodeSettings::Video(video_settings))
            .and_then(|video| {
                let audio = encode.add_input(EncodeSettings::Audio(AudioEncodeSettings::default()))?;
                Ok((video, audio))
            });
        let (video_input, audio_input) = match inputs {
            Ok(inputs) => inputs,
            Err(e) => {
                encode.cancel().await;
                decode.cancel().await;
                remove_quietly(&destination);
                return Err(VideoKitError::encode_init(e.to_string()));
            }
        };
        encode.set_network_optimized(true);

        let started = match encode.start().await {
            Ok(()) => decode.start().await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            encode.cancel().await;
            decode.cancel().await;
            remove_quietly(&destination);
            return Err(VideoKitError::engine(e.to_string()));
        }
        encode.start_session(MediaTime::ZERO);

        let sessions = Arc::new(Sessions::new(encode, decode));
        let mut loops = JoinSet::new();
        loops.spawn(copy_track(
            TrackKind::Audio,
            audio_output,
            audio_input,
            Arc::clone(&sessions),
        ));
        loops.spawn(copy_track(
            TrackKind::Video,
            Some(video_output),
            video_input,
            Arc::clone(&sessions),
        ));

        let mut failure = None;
        while let Some(joined) = loops.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(VideoKitError::engine(format!("sample copy task failed: {e}")))
            });
            if let Err(e) = outcome {
                failure = Some(e);
                break;
            }
        }

        if let Some(err) = failure {
            loops.abort_all();
            while loops.join_next().await.is_some() {}
            sessions.release().await;
            remove_quietly(&destination);
            tracing::warn!(path = %source.display(), error = %err, "Transcode failed");
            return Err(err);
        }

        let output = sessions
            .take_output()
            .ok_or_else(|| VideoKitError::engine("both tracks drained without finalizing"))?;
        tracing::info!(path = %output.display(), "Transcode complete");
        Ok(output)
    }
}

/// Sessions shared by the two pull loops for one invocation.
struct Sessions {
    barrier: CompletionBarrier,
    encode: tokio::sync::Mutex<Option<Box<dyn EncodeSession>>>,
    decode: tokio::sync::Mutex<Option<Box<dyn DecodeSession>>>,
    output: Mutex<Option<PathBuf>>,
}

impl Sessions {
    fn new(encode: Box<dyn EncodeSession>, decode: Box<dyn DecodeSession>) -> Self {
        Self {
            barrier: CompletionBarrier::new(),
            encode: tokio::sync::Mutex::new(Some(encode)),
            decode: tokio::sync::Mutex::new(Some(decode)),
            output: Mutex::new(None),
        }
    }

    /// Finish the output and stop decoding.
    async fn finalize(&self) -> VideoKitResult<()> {
        let encode = self.encode.lock().await.take();
        let Some(mut encode) = encode else {
            return Err(VideoKitError::engine("encode session already released"));
        };

        let finished = encode.finish().await;
        if let Some(mut decode) = self.decode.lock().await.take() {
            decode.cancel().await;
        }

        match finished {
            Ok(path) => {
                *self.output.lock().unwrap_or_else(PoisonError::into_inner) = Some(path);
                Ok(())
            }
            Err(e) => {
                encode.cancel().await;
                Err(VideoKitError::engine(format!("finalize failed: {e}")))
            }
        }
    }

    /// Cancel whatever sessions are still held.
    async fn release(&self) {
        if let Some(mut encode) = self.encode.lock().await.take() {
            encode.cancel().await;
        }
        if let Some(mut decode) = self.decode.lock().await.take() {
            decode.cancel().await;
        }
    }

    fn take_output(&self) -> Option<PathBuf> {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Pull loop for one track.
///
/// A missing output drains immediately, so a source without audio still
/// completes the barrier.
async fn copy_track(
    kind: TrackKind,
    mut output: Option<Box<dyn DecodeOutput>>,
    mut input: Box<dyn EncoderInput>,
    sessions: Arc<Sessions>,
) -> VideoKitResult<()> {
    let mut copied: u64 = 0;
    loop {
        input.ready().await;
        while input.is_ready() {
            let next = match output.as_mut() {
                Some(output) => output
                    .next_sample()
                    .await
                    .map_err(|e| VideoKitError::engine(format!("{kind} decode failed: {e}")))?,
                None => None,
            };

            let Some(sample) = next else {
                input
                    .mark_finished()
                    .await
                    .map_err(|e| VideoKitError::engine(format!("{kind} finish failed: {e}")))?;
                tracing::debug!(track = %kind, samples = copied, "Track drained");

                if sessions.barrier.mark_done(kind) == Finalize::Run {
                    sessions.finalize().await?;
                }
                return Ok(());
            };

            input
                .append(sample)
                .await
                .map_err(|e| VideoKitError::engine(format!("{kind} append failed: {e}")))?;
            copied += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{
        DecodeFaults, EncodeFaults, MemoryDecodeEngine, MemoryEncodeEngine, MemoryFile,
        MemorySource,
    };
    use videokit_common::error::ErrorKind;
    use videokit_common::paths::TempDirPaths;
    use videokit_media_model::{AffineTransform, AssetInfo, Size, TrackMetadata};

    const SOURCE: &str = "/media/source.mov";

    struct Harness {
        decoder: MemoryDecodeEngine,
        encoder: MemoryEncodeEngine,
        transcoder: SampleCopyTranscoder<MemoryDecodeEngine, MemoryEncodeEngine>,
        out_dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(source: MemorySource) -> Self {
            let decoder = MemoryDecodeEngine::new();
            decoder.insert(SOURCE, source);
            let encoder = MemoryEncodeEngine::new();
            let out_dir = tempfile::tempdir().unwrap();
            let transcoder = SampleCopyTranscoder::new(
                decoder.clone(),
                encoder.clone(),
                Arc::new(TempDirPaths::in_dir(out_dir.path())),
            );
            Self {
                decoder,
                encoder,
                transcoder,
                out_dir,
            }
        }

        async fn run(&self) -> VideoKitResult<PathBuf> {
            self.transcoder.transcode(Path::new(SOURCE), 2_000_000).await
        }

        fn leftover_files(&self) -> usize {
            std::fs::read_dir(self.out_dir.path()).unwrap().count()
        }
    }

    fn portrait_video() -> TrackMetadata {
        let mut video = TrackMetadata::video(
            Size::new(1920.0, 1080.0),
            AffineTransform::new(0.0, 1.0, -1.0, 0.0, 1080.0, 0.0),
            9_000_000.0,
        );
        video.nominal_frame_rate = 30.0;
        video
    }

    fn with_audio() -> MemorySource {
        MemorySource::new(
            AssetInfo::new(
                MediaTime::new(2, 1),
                vec![portrait_video(), TrackMetadata::audio(128_000.0)],
            ),
            24,
            40,
        )
    }

    #[tokio::test]
    async fn test_copies_every_sample_and_finalizes_once() {
        let harness = Harness::new(with_audio());
        let output = harness.run().await.unwrap();

        let record = harness.encoder.record();
        assert_eq!(record.video_samples, 24);
        assert_eq!(record.audio_samples, 40);
        assert_eq!((record.started, record.finished, record.cancelled), (1, 1, 0));
        assert!(record.network_optimized);
        assert_eq!(record.session_start, Some(MediaTime::ZERO));
        assert!(record.video_pts.windows(2).all(|w| w[0] < w[1]));

        match &record.settings[0] {
            EncodeSettings::Video(video) => {
                assert_eq!(video.average_bitrate, 2_000_000);
                assert_eq!(video.transform, portrait_video().preferred_transform);
                assert_eq!((video.width, video.height), (1920, 1080));
            }
            other => panic!("expected video settings first, got {other:?}"),
        }
        assert_eq!(record.settings[1], EncodeSettings::Audio(AudioEncodeSettings::default()));

        let decode = harness.decoder.record();
        assert_eq!((decode.opened, decode.started, decode.cancelled), (1, 1, 1));

        let file = MemoryFile::read(&output).await.unwrap();
        assert_eq!(file.asset.duration, MediaTime::new(2, 1));
        assert_eq!(output.extension().unwrap(), "mp4");
    }

    #[tokio::test]
    async fn test_source_without_audio_still_completes() {
        let source = MemorySource::new(
            AssetInfo::new(MediaTime::new(1, 1), vec![portrait_video()]),
            10,
            0,
        );
        let harness = Harness::new(source);
        let output = harness.run().await.unwrap();

        let record = harness.encoder.record();
        assert_eq!((record.video_samples, record.audio_samples), (10, 0));
        let file = MemoryFile::read(&output).await.unwrap();
        assert!(!file.asset.has_track(TrackKind::Audio));
    }

    #[tokio::test]
    async fn test_missing_video_track() {
        let source = MemorySource::from_asset(AssetInfo::new(
            MediaTime::new(1, 1),
            vec![TrackMetadata::audio(128_000.0)],
        ));
        let harness = Harness::new(source);
        let err = harness.run().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AssetTrackInitFailed);
        assert_eq!(harness.encoder.record().opened, 0);
        assert_eq!(harness.decoder.record().cancelled, 1);
    }

    #[tokio::test]
    async fn test_attach_failures_name_the_track() {
        for track in [TrackKind::Audio, TrackKind::Video] {
            let harness = Harness::new(with_audio());
            harness.decoder.set_faults(DecodeFaults {
                reject_attach: Some(track),
                ..Default::default()
            });
            let err = harness.run().await.unwrap_err();

            assert_eq!(err.kind(), ErrorKind::OutputAttachFailed(track));
            let decode = harness.decoder.record();
            assert_eq!((decode.started, decode.cancelled), (0, 1));
            assert_eq!(harness.encoder.record().opened, 0);
        }
    }

    #[tokio::test]
    async fn test_decode_open_failure() {
        let harness = Harness::new(with_audio());
        harness.decoder.set_faults(DecodeFaults {
            fail_open: true,
            ..Default::default()
        });
        let err = harness.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeSessionInitFailed);
        assert!(err.to_string().contains("injected"));
    }

    #[tokio::test]
    async fn test_encode_open_failure_releases_decoder() {
        let harness = Harness::new(with_audio());
        harness.encoder.set_faults(EncodeFaults {
            fail_open: true,
            ..Default::default()
        });
        let err = harness.run().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EncodeSessionInitFailed);
        let decode = harness.decoder.record();
        assert_eq!((decode.started, decode.cancelled), (0, 1));
    }

    #[tokio::test]
    async fn test_mid_stream_decode_failure_cancels_everything() {
        let harness = Harness::new(with_audio());
        harness.decoder.set_faults(DecodeFaults {
            fail_after: Some((TrackKind::Video, 5)),
            ..Default::default()
        });
        let err = harness.run().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnderlyingEngineError);
        assert!(err.to_string().contains("video decode failed"));
        let record = harness.encoder.record();
        assert_eq!((record.finished, record.cancelled), (0, 1));
        assert_eq!(harness.decoder.record().cancelled, 1);
        assert_eq!(harness.leftover_files(), 0);
    }

    #[tokio::test]
    async fn test_append_failure_is_engine_error() {
        let harness = Harness::new(with_audio());
        harness.encoder.set_faults(EncodeFaults {
            fail_append_after: Some((TrackKind::Audio, 3)),
            ..Default::default()
        });
        let err = harness.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnderlyingEngineError);
        assert!(err.to_string().contains("audio append failed"));
        assert_eq!(harness.encoder.record().finished, 0);
    }

    #[tokio::test]
    async fn test_finish_failure_removes_partial_output() {
        let harness = Harness::new(with_audio());
        harness.encoder.set_faults(EncodeFaults {
            fail_finish: true,
            ..Default::default()
        });
        let err = harness.run().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnderlyingEngineError);
        assert!(err.to_string().contains("finalize failed"));
        assert_eq!(harness.leftover_files(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_loops_finalize_exactly_once() {
        for _ in 0..25 {
            let harness = Harness::new(with_audio());
            harness.encoder.set_input_capacity(1);
            harness.run().await.unwrap();

            let record = harness.encoder.record();
            assert_eq!(record.finished, 1);
            assert_eq!(record.cancelled, 0);
            assert_eq!(record.outputs.len(), 1);
        }
    }
}
