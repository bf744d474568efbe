// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use camera_stream::constants::{adts, audio, timing, video};

#[test]
fn test_bitrate_scales_with_resolution() {
    assert_eq!(video::bitrate_for(640, 480), 640 * 480 * 5);

    let hd = video::bitrate_for(1280, 720);
    let fhd = video::bitrate_for(1920, 1080);
    assert!(hd < fhd);
}

#[test]
fn test_bitrate_saturates() {
    assert_eq!(video::bitrate_for(u32::MAX, 2), u32::MAX);
}

#[test]
fn test_keyframe_interval_in_frames() {
    assert_eq!(video::keyframe_interval_frames(), 30);
}

#[test]
fn test_audio_limits() {
    assert!(audio::READ_CHUNK_SIZE <= audio::MAX_INPUT_SIZE);
    assert_eq!(audio::MAX_INPUT_SIZE % audio::BYTES_PER_SAMPLE, 0);
    assert!(audio::DEFAULT_CHANNELS <= audio::MAX_CHANNELS);
}

#[test]
fn test_adts_layout() {
    assert_eq!(adts::HEADER_LEN, 7);
    assert_eq!(adts::MAX_FRAME_LEN, 0x3FFF);
    assert!(adts::MAX_FRAME_LEN >= 8191 + adts::HEADER_LEN);
}

#[test]
fn test_release_grace_exceeds_read_backoff() {
    assert!(timing::RELEASE_GRACE > timing::READ_BACKOFF);
}
