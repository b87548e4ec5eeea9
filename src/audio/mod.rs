//! 音声正規化
//!
//! トランスポート固有のバイト列を 16kHz モノラルの f32 サンプル列へ変換します。
//! リサンプリングは行いません（ファイル入力は外部トランスコーダが 16kHz/mono 化済み）。
pub mod transcode;

/// 推論モデルが期待するサンプルレート
pub const SAMPLE_RATE: u32 = 16_000;

/// 正規化済み音声（16kHz, mono, -1.0..1.0）
///
/// 推論呼び出しへ move して一度だけ消費する。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedAudio {
    samples: Vec<f32>,
}

impl NormalizedAudio {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// 無音（ウォームアップ用）
    pub fn silence(len: usize) -> Self {
        Self::new(vec![0.0; len])
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// 音声の長さ（秒）
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / SAMPLE_RATE as f64
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// 16bit little-endian PCM(mono) → 正規化サンプル
/// - 末尾の奇数バイトは捨てる
pub fn pcm16le_to_audio(raw: &[u8]) -> NormalizedAudio {
    let samples = raw
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();
    NormalizedAudio::new(samples)
}

/// チャネルインターリーブ済み i16 → モノラル（フレームごとに平均）
pub fn interleaved_to_mono(samples: &[i16], channels: usize) -> NormalizedAudio {
    if channels <= 1 {
        return NormalizedAudio::new(samples.iter().map(|s| *s as f32 / 32768.0).collect());
    }

    let mono = samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|s| *s as i32).sum();
            sum as f32 / channels as f32 / 32768.0
        })
        .collect();
    NormalizedAudio::new(mono)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_scaling_matches_int16_range() {
        let mut raw = Vec::new();
        for v in [0_i16, 16384, -32768, 32767] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let audio = pcm16le_to_audio(&raw);
        assert_eq!(audio.samples(), &[0.0, 0.5, -1.0, 32767.0 / 32768.0]);
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        let audio = pcm16le_to_audio(&[0x00, 0x40, 0x7f]);
        assert_eq!(audio.len(), 1);
        assert!(pcm16le_to_audio(&[0x01]).is_empty());
        assert!(pcm16le_to_audio(&[]).is_empty());
    }

    #[test]
    fn stereo_is_averaged_per_frame() {
        let audio = interleaved_to_mono(&[16384, 0, -16384, -16384], 2);
        assert_eq!(audio.samples(), &[0.25, -0.5]);
        // 端数のフレームは捨てる
        assert_eq!(interleaved_to_mono(&[1, 2, 3], 2).len(), 1);
    }

    #[test]
    fn duration_uses_fixed_rate() {
        assert_eq!(NormalizedAudio::silence(8000).duration_seconds(), 0.5);
    }
}
