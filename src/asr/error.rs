use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AsrError {
    /// モデル未ロード（バックオフ後に再試行可能）
    #[error("{reason}")]
    NotReady { reason: String },
    /// 推論が制限時間を超過（過負荷のシグナル）
    #[error("Inference timeout after {:.1}s", .limit.as_secs_f64())]
    Timeout { limit: Duration },
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    DecodeFailure(String),
    #[error("{0}")]
    Unhandled(String),
}

impl AsrError {
    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::NotReady {
            reason: reason.into(),
        }
    }
}
