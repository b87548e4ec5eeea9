use std::fs;

use sensevoice_api::asr::AsrError;
use sensevoice_api::audio::{pcm16le_to_audio, transcode::read_wav};

/// PCM 16bit の WAV を組み立てる
fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

#[test]
fn test_read_mono_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mono.wav");
    fs::write(&path, wav_bytes(16_000, 1, &[0, 16384, -16384, 0])).unwrap();

    let audio = read_wav(&path).unwrap();
    assert_eq!(audio.samples(), &[0.0, 0.5, -0.5, 0.0]);
}

#[test]
fn test_read_stereo_wav_is_averaged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stereo.wav");
    // (L, R) = (0.5, 0.0), (-0.5, -0.5)
    fs::write(&path, wav_bytes(16_000, 2, &[16384, 0, -16384, -16384])).unwrap();

    let audio = read_wav(&path).unwrap();
    assert_eq!(audio.samples(), &[0.25, -0.5]);
}

#[test]
fn test_read_wav_rejects_other_sample_rates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("8k.wav");
    fs::write(&path, wav_bytes(8_000, 1, &[0; 160])).unwrap();

    let err = read_wav(&path).unwrap_err();
    match err {
        AsrError::DecodeFailure(msg) => assert!(msg.contains("sample_rate=8000"), "{msg}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_read_garbage_is_decode_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("noise.wav");
    fs::write(&path, b"definitely not audio").unwrap();

    assert!(matches!(read_wav(&path), Err(AsrError::DecodeFailure(_))));
}

#[test]
fn test_pcm_bytes_duration() {
    // 16000 バイト = 8000 サンプル = 0.5 秒
    let audio = pcm16le_to_audio(&vec![0u8; 16_000]);
    assert_eq!(audio.len(), 8000);
    assert_eq!(audio.duration_seconds(), 0.5);
}
