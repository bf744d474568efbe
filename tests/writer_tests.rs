// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the elementary stream writer

use camera_stream::config::OutputSettings;
use camera_stream::media::codec::BufferInfo;
use camera_stream::media::formats::{ParameterSets, adts};
use camera_stream::media::sink::{EncodedAacFrame, EncodedAccessUnit, StreamSink};
use camera_stream::pipelines::ElementaryStreamWriter;
use std::fs;

fn access_unit(data: &[u8], key: bool) -> EncodedAccessUnit<'_> {
    EncodedAccessUnit {
        data,
        info: BufferInfo {
            size: data.len(),
            presentation_time_us: 0,
            is_key_frame: key,
            is_codec_config: false,
        },
    }
}

fn aac_frame(data: &[u8]) -> EncodedAacFrame<'_> {
    EncodedAacFrame {
        data,
        presentation_time_us: 0,
        has_adts_header: adts::has_sync_word(data),
    }
}

#[test]
fn test_writes_both_streams_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let writer =
        ElementaryStreamWriter::create(dir.path(), "take", &OutputSettings::default()).unwrap();

    let sets = ParameterSets::new(&[0, 0, 0, 1, 0x67, 0x42], &[0, 0, 0, 1, 0x68, 0xCE]);
    writer.on_parameter_sets(&sets);

    let key = sets.prefixed(&[0, 0, 0, 1, 0x65, 0x88]);
    let delta = [0, 0, 0, 1, 0x41, 0x9A];
    writer.on_video_access_unit(&access_unit(&key, true));
    writer.on_video_access_unit(&access_unit(&delta, false));

    let mut frame = adts::header(4, 4, 1).to_vec();
    frame.extend_from_slice(&[1, 2, 3, 4]);
    writer.on_audio_frame(&aac_frame(&frame));
    writer.on_audio_frame(&aac_frame(&frame));

    let stats = writer.finish().unwrap();
    assert_eq!(stats.video_units, 2);
    assert_eq!(stats.video_bytes, (key.len() + delta.len()) as u64);
    assert_eq!(stats.audio_frames, 2);
    assert_eq!(stats.audio_bytes, 2 * frame.len() as u64);

    let video_path = stats.video_path.unwrap();
    assert_eq!(video_path, dir.path().join("take.h264"));
    assert_eq!(fs::read(&video_path).unwrap(), [key.clone(), delta.to_vec()].concat());

    let audio = fs::read(stats.audio_path.unwrap()).unwrap();
    assert_eq!(audio.len(), 2 * frame.len());
    assert_eq!(adts::parse_frame_length(&audio), Some(frame.len()));
    assert!(adts::has_sync_word(&audio[frame.len()..]));
}

#[test]
fn test_disabled_stream_creates_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let output = OutputSettings {
        save_video: false,
        ..Default::default()
    };
    let writer = ElementaryStreamWriter::create(dir.path(), "audio_only", &output).unwrap();

    writer.on_video_access_unit(&access_unit(&[0, 0, 0, 1, 0x65], true));
    let stats = writer.finish().unwrap();

    assert!(stats.video_path.is_none());
    assert_eq!(stats.video_units, 0);
    assert!(!dir.path().join("audio_only.h264").exists());
    assert!(dir.path().join("audio_only.aac").exists());
}

#[test]
fn test_creates_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    let writer =
        ElementaryStreamWriter::create(&nested, "take", &OutputSettings::default()).unwrap();
    writer.finish().unwrap();
    assert!(nested.join("take.h264").exists());
}

#[test]
fn test_finish_twice_errors_and_drops_late_data() {
    let dir = tempfile::tempdir().unwrap();
    let writer =
        ElementaryStreamWriter::create(dir.path(), "take", &OutputSettings::default()).unwrap();
    writer.finish().unwrap();

    // Delivered after finish: discarded
    writer.on_video_access_unit(&access_unit(&[0, 0, 0, 1, 0x41], false));
    assert!(writer.finish().is_err());
    assert_eq!(fs::read(dir.path().join("take.h264")).unwrap().len(), 0);
}

#[test]
fn test_drop_flushes_files() {
    let dir = tempfile::tempdir().unwrap();
    {
        let writer =
            ElementaryStreamWriter::create(dir.path(), "take", &OutputSettings::default())
                .unwrap();
        writer.on_video_access_unit(&access_unit(&[0, 0, 0, 1, 0x65, 0x01], true));
    }
    assert_eq!(fs::read(dir.path().join("take.h264")).unwrap().len(), 6);
}
