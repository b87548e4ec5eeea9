//! 音声認識サービス本体
//!
//! モデルのライフサイクル（Loading → Ready / Failed → Stopped）と、
//! 同時実行制御付きの推論呼び出しを一つのオブジェクトにまとめる。
//! HTTP / WebSocket の各ハンドラは `Arc<AsrService>` を共有する。
mod scheduler;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::asr::{AsrError, ModelFile, ModelLoader, SpeechModel};
use crate::audio::{NormalizedAudio, SAMPLE_RATE};
use crate::config::Config;
use crate::models::{HealthResponse, InferenceResult, ServiceStats};

pub use scheduler::InferenceScheduler;

/// 外部公開用の準備状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Loading,
    Ready,
    Failed(String),
    Stopped,
}

impl Readiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Readiness::Loading => "loading",
            Readiness::Ready => "ready",
            Readiness::Failed(_) => "failed",
            Readiness::Stopped => "stopped",
        }
    }
}

enum Lifecycle {
    Loading,
    Ready(Arc<dyn SpeechModel>),
    Failed(String),
    Stopped,
}

pub struct AsrService {
    lifecycle: RwLock<Lifecycle>,
    model_file: RwLock<Option<ModelFile>>,
    configured_model_path: String,
    loader: Arc<dyn ModelLoader>,
    scheduler: InferenceScheduler,
    stats: Mutex<ServiceStats>,
    started_at: Instant,
}

impl AsrService {
    pub fn new(config: &Config, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            lifecycle: RwLock::new(Lifecycle::Loading),
            model_file: RwLock::new(None),
            configured_model_path: config.model.model_path.clone(),
            loader,
            scheduler: InferenceScheduler::new(
                config.inference.max_concurrent,
                config.inference_timeout(),
            ),
            stats: Mutex::new(ServiceStats::default()),
            started_at: Instant::now(),
        }
    }

    /// モデル検出・ロード・ウォームアップ（1秒の無音）を行い Ready へ遷移する
    ///
    /// ブロッキングスレッドで実行するため、起動中もリクエストは受け付けられる。
    /// Loading 以外の状態からは何もしない。
    pub async fn startup(&self) {
        let loading = matches!(*self.lifecycle.read(), Lifecycle::Loading);
        if !loading {
            warn!(status = self.readiness().as_str(), "startup skipped");
            return;
        }

        info!(model_path = %self.configured_model_path, "loading speech model");
        let loader = self.loader.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let loaded = loader.load()?;
            let warmup = NormalizedAudio::silence(SAMPLE_RATE as usize);
            loaded
                .model
                .infer(warmup.samples(), "auto", false)
                .map_err(|e| anyhow::anyhow!("warm-up inference failed: {e}"))?;
            anyhow::Ok(loaded)
        })
        .await
        .map_err(|e| anyhow::anyhow!("startup task failed: {e}"))
        .and_then(|r| r);

        let mut lifecycle = self.lifecycle.write();
        if !matches!(*lifecycle, Lifecycle::Loading) {
            // 起動中に shutdown された
            return;
        }
        match outcome {
            Ok(loaded) => {
                info!(
                    model = %loaded.file.name,
                    size_mb = loaded.file.size_mb,
                    elapsed_ms = self.started_at.elapsed().as_millis() as u64,
                    "speech model ready"
                );
                *self.model_file.write() = Some(loaded.file);
                *lifecycle = Lifecycle::Ready(loaded.model);
            }
            Err(e) => {
                let detail = format!("{e:#}");
                error!(error = %detail, "speech model failed to start");
                *lifecycle = Lifecycle::Failed(detail);
            }
        }
    }

    /// モデルを解放し、以降の推論を拒否する
    pub fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.write();
        if !matches!(*lifecycle, Lifecycle::Stopped) {
            *lifecycle = Lifecycle::Stopped;
            info!("speech model released");
        }
    }

    pub fn readiness(&self) -> Readiness {
        match &*self.lifecycle.read() {
            Lifecycle::Loading => Readiness::Loading,
            Lifecycle::Ready(_) => Readiness::Ready,
            Lifecycle::Failed(reason) => Readiness::Failed(reason.clone()),
            Lifecycle::Stopped => Readiness::Stopped,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.lifecycle.read(), Lifecycle::Ready(_))
    }

    pub fn scheduler(&self) -> &InferenceScheduler {
        &self.scheduler
    }

    /// 準備状態のスナップショット（推論ゲートには触れない）
    pub fn health(&self) -> HealthResponse {
        let readiness = self.readiness();
        let model_file = self.model_file.read();
        let (model_path, model_name, model_size_mb) = match model_file.as_ref() {
            Some(file) => (
                file.path.display().to_string(),
                file.name.clone(),
                (file.size_mb * 100.0).round() / 100.0,
            ),
            None => (self.configured_model_path.clone(), String::new(), 0.0),
        };
        let startup_error = match &readiness {
            Readiness::Failed(reason) => Some(reason.clone()),
            _ => None,
        };

        HealthResponse {
            ready: readiness == Readiness::Ready,
            status: readiness.as_str().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            model_path,
            model_name,
            model_size_mb,
            uptime_sec: self.started_at.elapsed().as_secs(),
            max_concurrent_inference: self.scheduler.budget(),
            startup_error,
        }
    }

    pub fn stats(&self) -> ServiceStats {
        let mut stats = self.stats.lock().clone();
        stats.uptime_seconds = self.started_at.elapsed().as_secs();
        stats
    }

    /// 音声を文字起こしする
    ///
    /// - Ready でなければ `NotReady`（失敗理由があればそれを返す）
    /// - 空音声は推論せずゼロ値
    /// - それ以外は許可証を取得して推論（制限時間超過は `Timeout`）
    pub async fn transcribe(
        &self,
        audio: NormalizedAudio,
        language: &str,
        use_itn: bool,
    ) -> Result<InferenceResult, AsrError> {
        let model = self.ready_model()?;
        if audio.is_empty() {
            return Ok(InferenceResult::empty());
        }

        self.stats.lock().record_request();
        let result = self.scheduler.run(model, audio, language, use_itn).await;
        {
            let mut stats = self.stats.lock();
            match &result {
                Ok(r) => stats.record_success(r),
                Err(e) => stats.record_failure(matches!(e, AsrError::Timeout { .. })),
            }
        }
        result
    }

    fn ready_model(&self) -> Result<Arc<dyn SpeechModel>, AsrError> {
        match &*self.lifecycle.read() {
            Lifecycle::Ready(model) => Ok(model.clone()),
            Lifecycle::Loading => Err(AsrError::not_ready("Model is not ready")),
            Lifecycle::Failed(reason) => Err(AsrError::not_ready(reason.clone())),
            Lifecycle::Stopped => Err(AsrError::not_ready("Service is shutting down")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::{MockModelLoader, MockSpeechModel};

    fn service_with(loader: MockModelLoader) -> AsrService {
        AsrService::new(&Config::default(), Arc::new(loader))
    }

    #[tokio::test]
    async fn startup_runs_warmup_once() {
        let model = Arc::new(MockSpeechModel::new("hi"));
        let service = service_with(MockModelLoader::new(model.clone()));
        assert_eq!(service.readiness(), Readiness::Loading);

        service.startup().await;
        assert!(service.is_ready());
        assert_eq!(model.calls(), 1);

        // 二重起動は無視
        service.startup().await;
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn shutdown_after_ready_rejects_requests() {
        let service = service_with(MockModelLoader::new(Arc::new(MockSpeechModel::new("hi"))));
        service.startup().await;
        service.shutdown();

        let err = service
            .transcribe(NormalizedAudio::silence(100), "auto", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AsrError::NotReady { .. }));
        assert_eq!(service.health().status, "stopped");
    }

    #[tokio::test]
    async fn empty_audio_skips_stats() {
        let service = service_with(MockModelLoader::new(Arc::new(MockSpeechModel::new("hi"))));
        service.startup().await;
        let result = service
            .transcribe(NormalizedAudio::silence(0), "auto", false)
            .await
            .unwrap();
        assert_eq!(result, InferenceResult::empty());
        assert_eq!(service.stats().total_requests, 0);
    }
}
