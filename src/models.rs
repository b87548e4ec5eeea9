use serde::{Deserialize, Serialize};

// =============================================================================
// Inference Result
// =============================================================================

/// 推論1回分の結果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub text: String,
    pub latency_ms: u64,
    /// 音声の長さ（秒、小数4桁）
    pub audio_duration: f64,
    /// real-time factor = 推論時間 / 音声長（小数4桁、音声長0なら0）
    pub rtf: f64,
}

impl InferenceResult {
    /// 空音声・短すぎる入力に返すゼロ値
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_measurement(text: String, latency_secs: f64, audio_duration_secs: f64) -> Self {
        let rtf = if audio_duration_secs > 0.0 {
            round4(latency_secs / audio_duration_secs)
        } else {
            0.0
        };
        Self {
            text,
            latency_ms: (latency_secs * 1000.0) as u64,
            audio_duration: round4(audio_duration_secs),
            rtf,
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// =============================================================================
// API Request/Response Models
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct TranscribeParams {
    pub language: Option<String>,
    pub use_itn: Option<String>,
}

impl TranscribeParams {
    pub fn language(&self) -> String {
        match self.language.as_deref().map(str::trim) {
            Some(lang) if !lang.is_empty() => lang.to_string(),
            _ => "auto".to_string(),
        }
    }

    pub fn use_itn(&self) -> bool {
        self.use_itn
            .as_deref()
            .map(crate::config::str_to_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileTranscribeResponse {
    #[serde(flatten)]
    pub result: InferenceResult,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ready: bool,
    pub status: String,
    pub version: String,
    pub model_path: String,
    pub model_name: String,
    pub model_size_mb: f64,
    pub uptime_sec: u64,
    pub max_concurrent_inference: usize,
    pub startup_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub details: Option<String>,
}

// =============================================================================
// Service Statistics
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub total_requests: u64,
    pub successful_transcriptions: u64,
    pub failed_transcriptions: u64,
    pub timed_out_transcriptions: u64,
    pub active_requests: usize,
    pub total_latency_ms: u64,
    pub average_latency_ms: f64,
    pub total_audio_seconds: f64,
    pub average_rtf: f64,
    pub uptime_seconds: u64,
}

impl ServiceStats {
    pub fn record_request(&mut self) {
        self.total_requests += 1;
        self.active_requests += 1;
    }

    pub fn record_success(&mut self, result: &InferenceResult) {
        self.successful_transcriptions += 1;
        self.active_requests = self.active_requests.saturating_sub(1);
        self.total_latency_ms += result.latency_ms;
        self.total_audio_seconds += result.audio_duration;

        self.average_latency_ms =
            self.total_latency_ms as f64 / self.successful_transcriptions as f64;
        if self.total_audio_seconds > 0.0 {
            self.average_rtf = round4(self.total_latency_ms as f64 / 1000.0 / self.total_audio_seconds);
        }
    }

    pub fn record_failure(&mut self, timed_out: bool) {
        self.failed_transcriptions += 1;
        if timed_out {
            self.timed_out_transcriptions += 1;
        }
        self.active_requests = self.active_requests.saturating_sub(1);
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_transcriptions as f64 / self.total_requests as f64 * 100.0
        }
    }
}

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiErrorCode {
    InvalidInput,
    FileTooLarge,
    DecodeFailed,
    ModelNotLoaded,
    InferenceTimeout,
    InternalError,
}

impl ApiErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorCode::InvalidInput => "INVALID_INPUT",
            ApiErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ApiErrorCode::DecodeFailed => "DECODE_FAILED",
            ApiErrorCode::ModelNotLoaded => "MODEL_NOT_LOADED",
            ApiErrorCode::InferenceTimeout => "INFERENCE_TIMEOUT",
            ApiErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtf_is_zero_without_audio() {
        let result = InferenceResult::from_measurement("x".into(), 0.25, 0.0);
        assert_eq!(result.rtf, 0.0);
        assert_eq!(result.latency_ms, 250);
    }

    #[test]
    fn rtf_and_duration_are_rounded() {
        let result = InferenceResult::from_measurement("x".into(), 0.1, 0.3);
        assert_eq!(result.rtf, 0.3333);
        assert_eq!(result.audio_duration, 0.3);
    }

    #[test]
    fn stats_track_success_and_failure() {
        let mut stats = ServiceStats::default();
        stats.record_request();
        stats.record_success(&InferenceResult::from_measurement("a".into(), 0.5, 1.0));
        stats.record_request();
        stats.record_failure(true);

        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.timed_out_transcriptions, 1);
        assert_eq!(stats.active_requests, 0);
        assert_eq!(stats.average_latency_ms, 500.0);
        assert_eq!(stats.average_rtf, 0.5);
        assert_eq!(stats.success_rate(), 50.0);
    }

    #[test]
    fn transcribe_params_defaults() {
        let params = TranscribeParams::default();
        assert_eq!(params.language(), "auto");
        assert!(!params.use_itn());

        let params = TranscribeParams {
            language: Some("ja".into()),
            use_itn: Some("yes".into()),
        };
        assert_eq!(params.language(), "ja");
        assert!(params.use_itn());
    }
}
