//! 推論の同時実行制御
//!
//! 許可証（セマフォ）で同時推論数を `max_concurrent` 以下に抑え、
//! 推論はブロッキングスレッドで実行して制限時間で打ち切る。
//! タイムアウト時は許可証を返却し、実行中のスレッドは結果を捨てて放置する。
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::asr::{AsrError, SpeechModel};
use crate::audio::NormalizedAudio;
use crate::models::InferenceResult;

#[derive(Debug, Clone)]
pub struct InferenceScheduler {
    semaphore: Arc<Semaphore>,
    budget: usize,
    timeout: Duration,
}

impl InferenceScheduler {
    pub fn new(budget: usize, timeout: Duration) -> Self {
        let budget = budget.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(budget)),
            budget,
            timeout,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 現在空いている許可証の数
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 許可証を取得してから推論を実行する
    ///
    /// 許可証は成功・失敗・タイムアウトのいずれでもこの関数を抜けた時点で返却される。
    /// レイテンシは許可証の待ち時間を含む。
    pub async fn run(
        &self,
        model: Arc<dyn SpeechModel>,
        audio: NormalizedAudio,
        language: &str,
        use_itn: bool,
    ) -> Result<InferenceResult, AsrError> {
        let started = Instant::now();
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| AsrError::Unhandled("inference gate closed".to_string()))?;

        let duration = audio.duration_seconds();
        let language = language.to_string();

        let task = tokio::task::spawn_blocking(move || {
            model
                .infer(audio.samples(), &language, use_itn)
                .map(|raw| raw.into_text())
        });

        let text = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => {
                return Err(AsrError::Unhandled(format!("inference task failed: {join_err}")));
            }
            Err(_) => {
                warn!(
                    limit_secs = self.timeout.as_secs_f64(),
                    audio_secs = duration,
                    "inference timed out, abandoning in-flight call"
                );
                return Err(AsrError::Timeout { limit: self.timeout });
            }
        };

        let result = InferenceResult::from_measurement(text, started.elapsed().as_secs_f64(), duration);
        debug!(
            latency_ms = result.latency_ms,
            audio_duration = result.audio_duration,
            rtf = result.rtf,
            "inference finished"
        );
        Ok(result)
    }
}
