//! アップロードファイルのデコード
//!
//! 1. バイト列を一時ディレクトリへ書き出し
//! 2. ffmpeg で 16kHz/mono/16bit WAV へ変換
//! 3. symphonia で WAV を読み込み、正規化サンプルへ
use std::io::ErrorKind;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::process::Command;
use tracing::debug;

use super::{interleaved_to_mono, NormalizedAudio, SAMPLE_RATE};
use crate::asr::AsrError;

/// ffmpeg の stderr から返す末尾の文字数
const STDERR_TAIL_CHARS: usize = 500;

/// ffmpeg を使ってファイルをデコード
pub async fn decode_with_ffmpeg(
    ffmpeg: &str,
    payload: &[u8],
    filename: &str,
) -> Result<NormalizedAudio, AsrError> {
    let temp_dir = tempfile::Builder::new()
        .prefix("sensevoice_")
        .tempdir()
        .map_err(|e| AsrError::Unhandled(format!("failed to create temp dir: {e}")))?;

    let suffix = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("bin");
    let input_path = temp_dir.path().join(format!("input.{suffix}"));
    let output_path = temp_dir.path().join("output.wav");

    tokio::fs::write(&input_path, payload)
        .await
        .map_err(|e| AsrError::Unhandled(format!("failed to write upload: {e}")))?;

    let output = Command::new(ffmpeg)
        .arg("-nostdin")
        .arg("-y")
        .arg("-i")
        .arg(&input_path)
        .args(["-ac", "1", "-ar", &SAMPLE_RATE.to_string(), "-f", "wav"])
        .arg(&output_path)
        .output()
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                AsrError::DecodeFailure("ffmpeg not found. Please install ffmpeg first.".to_string())
            }
            _ => AsrError::DecodeFailure(format!("failed to run ffmpeg: {e}")),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = if stderr.trim().is_empty() {
            "unknown ffmpeg error".to_string()
        } else {
            stderr_tail(&stderr, STDERR_TAIL_CHARS).to_string()
        };
        return Err(AsrError::DecodeFailure(format!("ffmpeg convert failed: {tail}")));
    }

    debug!(filename, bytes = payload.len(), "ffmpeg conversion finished");

    // symphonia のデコードは同期処理なのでブロッキングスレッドで
    let audio = tokio::task::spawn_blocking(move || {
        let result = read_wav(&output_path);
        drop(temp_dir);
        result
    })
    .await
    .map_err(|e| AsrError::Unhandled(format!("decode worker failed: {e}")))??;

    Ok(audio)
}

/// 16bit/16kHz WAV を読み込み（多チャネルは平均してモノラル化）
pub fn read_wav(path: &Path) -> Result<NormalizedAudio, AsrError> {
    let file = std::fs::File::open(path)
        .map_err(|e| AsrError::DecodeFailure(format!("failed to open decoded wav: {e}")))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("wav");

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AsrError::DecodeFailure(format!("unreadable wav: {e}")))?;
    let mut format = probed.format;

    let (track_id, codec_params) = {
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AsrError::DecodeFailure("no audio track in wav".to_string()))?;
        (track.id, track.codec_params.clone())
    };

    if let Some(bits) = codec_params.bits_per_sample {
        if bits != 16 {
            return Err(AsrError::DecodeFailure(format!(
                "WAV sample width {bits} bits unsupported, expected 16-bit PCM"
            )));
        }
    }
    match codec_params.sample_rate {
        Some(rate) if rate == SAMPLE_RATE => {}
        other => {
            return Err(AsrError::DecodeFailure(format!(
                "WAV sample_rate={} unsupported, expected {SAMPLE_RATE}Hz",
                other.map_or_else(|| "unknown".to_string(), |r| r.to_string())
            )))
        }
    }

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| AsrError::DecodeFailure(format!("no decoder for wav: {e}")))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::ResetRequired) => break,
            Err(symphonia::core::errors::Error::IoError(ref err))
                if err.kind() == ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => return Err(AsrError::DecodeFailure(format!("packet read error: {err}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| AsrError::DecodeFailure(format!("decode error: {e}")))?;
        mix_down(decoded, &mut samples)?;
    }

    Ok(NormalizedAudio::new(samples))
}

fn mix_down(audio_buf: AudioBufferRef<'_>, samples: &mut Vec<f32>) -> Result<(), AsrError> {
    if !matches!(audio_buf, AudioBufferRef::S16(_)) {
        return Err(AsrError::DecodeFailure(
            "decoded wav is not 16-bit PCM".to_string(),
        ));
    }

    let spec = *audio_buf.spec();
    let mut interleaved = SampleBuffer::<i16>::new(audio_buf.capacity() as u64, spec);
    interleaved.copy_interleaved_ref(audio_buf);
    let mono = interleaved_to_mono(interleaved.samples(), spec.channels.count());
    samples.extend_from_slice(mono.samples());
    Ok(())
}

/// 末尾 `max_chars` 文字（文字境界を保つ）
fn stderr_tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    let start = text.char_indices().nth(skip).map_or(0, |(idx, _)| idx);
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_tail_keeps_last_chars() {
        assert_eq!(stderr_tail("abcdef", 3), "def");
        assert_eq!(stderr_tail("abc", 10), "abc");
        assert_eq!(stderr_tail("ああいう", 2), "いう");
    }

    #[tokio::test]
    async fn missing_ffmpeg_is_decode_failure() {
        let err = decode_with_ffmpeg("/nonexistent/ffmpeg-binary", b"RIFF", "a.wav")
            .await
            .unwrap_err();
        match err {
            AsrError::DecodeFailure(msg) => assert!(msg.contains("ffmpeg not found")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
