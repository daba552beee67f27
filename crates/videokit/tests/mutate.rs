//! End-to-end mutate runs over the in-memory engines.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use videokit::{ErrorKind, MutateConfig, Orientation, PipelineOrder, Quality, Rect, Size, VideoKit};
use videokit_common::error::EngineResult;
use videokit_common::paths::TempDirPaths;
use videokit_common::time::MediaTime;
use videokit_media_model::{AffineTransform, AssetInfo, TrackKind, TrackMetadata};
use videokit_processing_core::orientation::canonical_transform;
use videokit_render_engine::{ExportFaults, MemoryExporter};
use videokit_transcode_engine::memory::{
    DecodeFaults, MemoryDecodeEngine, MemoryEncodeEngine, MemoryFile, MemorySource,
};
use videokit_transcode_engine::probe::{asset_from_probe, ProbeOutput};
use videokit_transcode_engine::{EncodeSettings, MetadataProvider, SampleCopyTranscoder};

const SOURCE: &str = "/virtual/capture.mov";

struct Fixture {
    dir: tempfile::TempDir,
    decoder: MemoryDecodeEngine,
    encoder: MemoryEncodeEngine,
    exporter: MemoryExporter,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            decoder: MemoryDecodeEngine::new(),
            encoder: MemoryEncodeEngine::new(),
            exporter: MemoryExporter::new(),
        }
    }

    fn with_source(asset: AssetInfo) -> Self {
        let fixture = Self::new();
        fixture
            .decoder
            .insert(SOURCE, MemorySource::from_asset(asset.clone()));
        fixture.exporter.insert(SOURCE, asset);
        fixture
    }

    fn kit(&self) -> VideoKit {
        self.kit_with_metadata(self.decoder.clone())
    }

    fn kit_with_metadata(&self, metadata: impl MetadataProvider + 'static) -> VideoKit {
        let paths = Arc::new(TempDirPaths::in_dir(self.dir.path()));
        VideoKit::builder()
            .metadata(metadata)
            .transcoder(SampleCopyTranscoder::new(
                self.decoder.clone(),
                self.encoder.clone(),
                paths.clone(),
            ))
            .exporter(self.exporter.clone())
            .paths(paths)
            .build()
            .unwrap()
    }

    fn files_left(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }
}

fn asset(natural: Size, orientation: Orientation, data_rate: f64, audio: bool) -> AssetInfo {
    let duration = MediaTime::new(6000, 600);
    let mut video = TrackMetadata::video(
        natural,
        canonical_transform(orientation, natural),
        data_rate,
    );
    video.duration = duration;
    let mut tracks = vec![video];
    if audio {
        let mut track = TrackMetadata::audio(128_000.0);
        track.duration = duration;
        tracks.push(track);
    }
    AssetInfo::new(duration, tracks)
}

fn landscape() -> AssetInfo {
    asset(Size::new(1920.0, 1080.0), Orientation::Right, 8_000_000.0, true)
}

/// Reports transcoded files the way ffprobe sees an ffmpeg mux: the
/// rotation survives, the display matrix translation does not.
struct MuxedMetadata {
    decoder: MemoryDecodeEngine,
}

#[async_trait]
impl MetadataProvider for MuxedMetadata {
    async fn load(&self, source: &Path) -> EngineResult<AssetInfo> {
        let asset = self.decoder.load(source).await?;
        if source == Path::new(SOURCE) {
            return Ok(asset);
        }

        let streams: Vec<_> = asset
            .tracks
            .iter()
            .enumerate()
            .map(|(index, track)| match track.kind {
                TrackKind::Video => {
                    let t = track.preferred_transform;
                    let fixed = |v: f64| (v * 65_536.0).round() as i64;
                    let matrix = format!(
                        "00000000: {} {} 0\n00000001: {} {} 0\n00000002: 0 0 1073741824\n",
                        fixed(t.a),
                        fixed(t.b),
                        fixed(t.c),
                        fixed(t.d)
                    );
                    json!({
                        "index": index,
                        "codec_type": "video",
                        "width": track.natural_size.width as u32,
                        "height": track.natural_size.height as u32,
                        "bit_rate": track.estimated_data_rate.to_string(),
                        "side_data_list": [{
                            "side_data_type": "Display Matrix",
                            "displaymatrix": matrix,
                        }],
                    })
                }
                TrackKind::Audio => json!({
                    "index": index,
                    "codec_type": "audio",
                    "bit_rate": track.estimated_data_rate.to_string(),
                }),
            })
            .collect();
        let probe: ProbeOutput = serde_json::from_value(json!({
            "streams": streams,
            "format": { "duration": asset.duration.seconds().to_string() },
        }))
        .unwrap();
        asset_from_probe(&probe)
    }
}

fn read_output(path: &Path) -> MemoryFile {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn landscape_without_crop_keeps_frame() {
    let fixture = Fixture::with_source(landscape());
    let output = fixture
        .kit()
        .mutate(SOURCE, MutateConfig::default())
        .await
        .unwrap();

    let record = fixture.exporter.record();
    assert_eq!(record.exports.len(), 1);
    let composition = &record.exports[0].composition;
    assert_eq!(composition.render_size, Size::new(1920.0, 1080.0));
    assert_eq!(composition.primary_transform().quarter_turns(), Some(0));
    assert!(composition.frame_duration.is_none());
    assert!(record.exports[0].time_range.is_none());

    let written = read_output(&output);
    let video = written.asset.first_track(TrackKind::Video).unwrap();
    assert_eq!(video.natural_size, Size::new(1920.0, 1080.0));
    assert_eq!(fixture.encoder.record().opened, 0);
}

#[tokio::test]
async fn upside_down_portrait_with_crop_and_fps() {
    let fixture = Fixture::with_source(asset(
        Size::new(1080.0, 1920.0),
        Orientation::Down,
        6_000_000.0,
        true,
    ));
    let config = MutateConfig::default()
        .with_crop_rect(Rect::new(100.0, 200.0, 600.0, 800.0))
        .with_limit_fps(24);
    let output = fixture.kit().mutate(SOURCE, config).await.unwrap();

    let call = &fixture.exporter.record().exports[0];
    assert_eq!(call.composition.render_size, Size::new(600.0, 800.0));
    assert_eq!(call.composition.frame_duration, Some(MediaTime::new(1, 24)));
    assert_eq!(call.composition.primary_transform().quarter_turns(), Some(3));

    let written = read_output(&output);
    let video = written.asset.first_track(TrackKind::Video).unwrap();
    assert_eq!(video.natural_size, Size::new(600.0, 800.0));
    assert!(video.preferred_transform.is_identity());
}

#[tokio::test]
async fn missing_video_track_opens_no_sessions() {
    let mut audio_only = landscape();
    audio_only.tracks.retain(|t| t.kind == TrackKind::Audio);
    let fixture = Fixture::with_source(audio_only);

    let err = fixture
        .kit()
        .mutate(SOURCE, MutateConfig::default().with_limit_bitrate(1_000_000))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AssetTrackInitFailed);

    assert_eq!(fixture.decoder.record().opened, 0);
    assert_eq!(fixture.encoder.record().opened, 0);
    assert!(fixture.exporter.record().prepared.is_empty());
}

#[tokio::test]
async fn audio_attach_failure_never_starts_sessions() {
    let fixture = Fixture::with_source(landscape());
    fixture.decoder.set_faults(DecodeFaults {
        reject_attach: Some(TrackKind::Audio),
        ..DecodeFaults::default()
    });

    let err = fixture
        .kit()
        .mutate(SOURCE, MutateConfig::default().with_limit_bitrate(2_000_000))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutputAttachFailed(TrackKind::Audio));

    let decode = fixture.decoder.record();
    assert_eq!(decode.started, 0);
    assert_eq!(decode.cancelled, 1);
    assert_eq!(fixture.encoder.record().started, 0);
    assert!(fixture.exporter.record().prepared.is_empty());
    assert!(fixture.files_left().is_empty());
}

#[tokio::test]
async fn over_ceiling_transcodes_first_and_drops_intermediate() {
    let fixture = Fixture::with_source(landscape());
    let output = fixture
        .kit()
        .mutate(SOURCE, MutateConfig::default().with_limit_bitrate(2_000_000))
        .await
        .unwrap();

    let encode = fixture.encoder.record();
    assert_eq!(encode.finished, 1);
    assert!(encode.network_optimized);
    assert_eq!(encode.session_start, Some(MediaTime::ZERO));
    match &encode.settings[0] {
        EncodeSettings::Video(video) => assert_eq!(video.average_bitrate, 2_000_000),
        other => panic!("expected video settings first, got {other:?}"),
    }

    let intermediate = &encode.outputs[0];
    assert_eq!(fixture.exporter.record().prepared, vec![intermediate.clone()]);
    assert!(!intermediate.exists());
    assert_eq!(fixture.files_left(), vec![output.clone()]);

    let video = read_output(&output).asset.tracks[0].clone();
    assert!(video.estimated_data_rate <= 2_000_000.0);
}

#[tokio::test]
async fn transcoded_portrait_with_bare_rotation_exports_upright() {
    let fixture = Fixture::with_source(asset(
        Size::new(1920.0, 1080.0),
        Orientation::Up,
        12_000_000.0,
        true,
    ));
    let kit = fixture.kit_with_metadata(MuxedMetadata {
        decoder: fixture.decoder.clone(),
    });
    let output = kit
        .mutate(SOURCE, MutateConfig::default().with_limit_bitrate(3_000_000))
        .await
        .unwrap();

    let call = &fixture.exporter.record().exports[0];
    assert_eq!(call.source, fixture.encoder.record().outputs[0]);
    assert_eq!(call.composition.render_size, Size::new(1080.0, 1920.0));
    assert_eq!(call.composition.primary_transform().quarter_turns(), Some(1));

    let video = read_output(&output).asset.tracks[0].clone();
    assert_eq!(video.natural_size, Size::new(1080.0, 1920.0));
}

#[tokio::test]
async fn geometry_first_transcodes_the_export() {
    let fixture = Fixture::with_source(asset(
        Size::new(1920.0, 1080.0),
        Orientation::Up,
        12_000_000.0,
        true,
    ));
    let config = MutateConfig::new(Quality::Preset1280x720)
        .with_limit_bitrate(3_000_000)
        .with_order(PipelineOrder::GeometryFirst);
    let output = fixture.kit().mutate(SOURCE, config).await.unwrap();

    let export = fixture.exporter.record();
    assert_eq!(export.prepared, vec![PathBuf::from(SOURCE)]);
    let exported = &export.exports[0].output;
    assert!(!exported.exists());

    let encode = fixture.encoder.record();
    assert_eq!(encode.outputs, vec![output.clone()]);
    match &encode.settings[0] {
        EncodeSettings::Video(video) => {
            assert_eq!(video.average_bitrate, 3_000_000);
            assert_eq!((video.width, video.height), (720, 1280));
            assert!(video.transform.is_identity());
        }
        other => panic!("expected video settings first, got {other:?}"),
    }
}

#[tokio::test]
async fn at_ceiling_skips_transcode() {
    let fixture = Fixture::with_source(landscape());
    fixture
        .kit()
        .mutate(SOURCE, MutateConfig::default().with_limit_bitrate(8_000_000))
        .await
        .unwrap();
    assert_eq!(fixture.decoder.record().opened, 0);
    assert_eq!(fixture.encoder.record().opened, 0);
}

#[tokio::test]
async fn length_limit_trims_export() {
    let fixture = Fixture::with_source(landscape());
    fixture
        .kit()
        .mutate(SOURCE, MutateConfig::default().with_limit_length(4.0))
        .await
        .unwrap();

    let range = fixture.exporter.record().exports[0].time_range.unwrap();
    assert_eq!(range.start.seconds(), 0.0);
    assert!((range.duration.seconds() - 4.0).abs() < 1e-9);
}

#[tokio::test]
async fn export_failures_are_classified() {
    let fixture = Fixture::with_source(landscape());
    fixture.exporter.set_faults(ExportFaults {
        fail_prepare: true,
        ..ExportFaults::default()
    });
    let err = fixture
        .kit()
        .mutate(SOURCE, MutateConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExportEngineInitFailed);

    fixture.exporter.set_faults(ExportFaults {
        fail_export: true,
        ..ExportFaults::default()
    });
    let err = fixture
        .kit()
        .mutate(SOURCE, MutateConfig::default().with_limit_bitrate(1_000_000))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnderlyingEngineError);
    assert!(err.to_string().contains("export failed"));
    // The transcoded intermediate is removed along with the failed export.
    assert_eq!(fixture.encoder.record().finished, 1);
    assert!(fixture.files_left().is_empty());
}

#[tokio::test]
async fn unknown_source_is_not_found() {
    let fixture = Fixture::new();
    let err = fixture
        .kit()
        .mutate("/virtual/missing.mov", MutateConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnderlyingEngineError);
    assert!(err.to_string().contains("missing.mov"));
}

#[tokio::test]
async fn invalid_config_is_rejected_before_loading() {
    let fixture = Fixture::with_source(landscape());
    let err = fixture
        .kit()
        .mutate(SOURCE, MutateConfig::default().with_limit_fps(0))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("limit_fps"));
    assert_eq!(fixture.decoder.record().metadata_loads, 0);
}

#[tokio::test]
async fn callback_resolves_exactly_once() {
    let fixture = Fixture::with_source(landscape());
    let kit = fixture.kit();
    let results = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();

    let sink = Arc::clone(&results);
    kit.mutate_with_callback(SOURCE, MutateConfig::default(), move |result| {
        sink.lock().unwrap().push(result.is_ok());
        let _ = done_tx.send(());
    });
    done_rx.await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(*results.lock().unwrap(), vec![true]);
}

#[test]
fn blocking_form_returns_output() {
    let fixture = Fixture::with_source(landscape());
    let output = fixture
        .kit()
        .mutate_blocking(SOURCE, MutateConfig::default().with_limit_bitrate(2_000_000))
        .unwrap();
    assert!(output.exists());
}

#[tokio::test]
async fn reports_render_size_and_orientation() {
    let fixture = Fixture::with_source(asset(
        Size::new(1920.0, 1080.0),
        Orientation::Up,
        5_000_000.0,
        false,
    ));
    let kit = fixture.kit();
    assert_eq!(kit.orientation(SOURCE).await.unwrap(), Orientation::Up);
    assert_eq!(
        kit.render_size(SOURCE).await.unwrap(),
        Size::new(1080.0, 1920.0)
    );
}

#[tokio::test]
async fn identity_stored_transform_is_landscape() {
    let mut source = landscape();
    source.tracks[0].preferred_transform = AffineTransform::IDENTITY;
    let fixture = Fixture::with_source(source);
    assert_eq!(
        fixture.kit().orientation(SOURCE).await.unwrap(),
        Orientation::Right
    );
}
