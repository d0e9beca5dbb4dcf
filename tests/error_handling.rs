//! Error handling integration tests.
//!
//! These tests verify that meaningful errors are returned for various
//! failure conditions.

use std::{path::PathBuf, sync::Arc};

use chaptermux::{
    ConversionError, EngineError, ErrorKind, FfmpegMetadataSource, LayoutConfig, MediaProbe,
    MetadataResolver, ProbeError, Stage, TrackInput,
};

#[test]
fn probe_nonexistent_file() {
    let result = MediaProbe::audio("this_file_does_not_exist.flac");
    let error_message = result.unwrap_err().to_string();
    assert!(
        error_message.contains("Failed to open media file"),
        "Error message should mention file open failure: {error_message}",
    );
}

#[test]
fn probe_invalid_file() {
    let temporary_directory = tempfile::tempdir().unwrap();
    let invalid_file_path = temporary_directory.path().join("invalid.flac");
    std::fs::write(&invalid_file_path, b"this is not a media file").unwrap();

    let result = MediaProbe::audio(&invalid_file_path);
    assert!(result.is_err(), "Expected error for invalid media file");
}

#[test]
fn resolving_missing_track_is_an_input_error_with_its_index() {
    let resolver = MetadataResolver::new(Arc::new(FfmpegMetadataSource));
    let error = resolver
        .resolve(4, &TrackInput::new("missing.flac"), &LayoutConfig::default())
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Input);
    assert_eq!(error.stage(), Stage::ResolvingMetadata);
    assert_eq!(error.track_index(), Some(4));
    assert!(error.message().contains("missing.flac"));
}

// ── Messages ───────────────────────────────────────────────────────

#[test]
fn conversion_error_names_stage_and_track() {
    let error = ConversionError::Encoding {
        stage: Stage::BuildingSegments,
        track_index: Some(1),
        reason: "Engine exited with status 1: Conversion failed!".to_string(),
    };
    assert_eq!(
        error.to_string(),
        "Encoding error while building segments (track 2): \
         Engine exited with status 1: Conversion failed!"
    );
    assert_eq!(error.kind().to_string(), "EncodingError");
}

#[test]
fn cancelled_error_has_no_track() {
    let error = ConversionError::Cancelled {
        stage: Stage::Assembling,
    };
    assert_eq!(error.to_string(), "Conversion cancelled while assembling");
    assert_eq!(error.track_index(), None);
    assert_eq!(error.kind(), ErrorKind::Cancelled);
}

#[test]
fn engine_errors_classify_transience() {
    let exit = EngineError::Exit {
        status: None,
        stderr: String::new(),
    };
    assert!(exit.is_transient());
    assert!(exit.to_string().contains("a signal"));

    let launch = EngineError::Launch {
        program: PathBuf::from("ffmpeg"),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    };
    assert!(launch.is_transient());

    assert!(!EngineError::Cancelled.is_transient());
    assert!(!EngineError::Output("no video stream".to_string()).is_transient());
}

#[test]
fn probe_error_messages() {
    assert_eq!(
        ProbeError::NoAudioStream.to_string(),
        "No decodable audio stream found in file"
    );
    assert_eq!(
        ProbeError::NoDuration.to_string(),
        "Audio stream has no usable duration"
    );
}
