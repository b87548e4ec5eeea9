use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sensevoice_api::asr::{
    AsrError, MockModelLoader, MockSpeechModel, RawTranscript, SpeechModel,
};
use sensevoice_api::audio::NormalizedAudio;
use sensevoice_api::config::Config;
use sensevoice_api::service::{AsrService, Readiness};

fn config_with(max_concurrent: usize, timeout_seconds: f64) -> Config {
    let mut config = Config::default();
    config.inference.max_concurrent = max_concurrent;
    config.inference.timeout_seconds = timeout_seconds;
    config
}

async fn ready_service(config: &Config, model: Arc<dyn SpeechModel>) -> Arc<AsrService> {
    let service = Arc::new(AsrService::new(config, Arc::new(MockModelLoader::new(model))));
    service.startup().await;
    assert!(service.is_ready());
    service
}

/// 起動後に `hang` を立てると推論が `hold` だけ止まるモデル
struct GatedModel {
    hang: AtomicBool,
    hold: Duration,
}

impl SpeechModel for GatedModel {
    fn infer(&self, _samples: &[f32], _language: &str, _use_itn: bool) -> Result<RawTranscript, AsrError> {
        if self.hang.load(Ordering::SeqCst) {
            std::thread::sleep(self.hold);
        }
        Ok(RawTranscript::Text("<|ja|>done".to_string()))
    }
}

/// ウォームアップで失敗するモデル
struct BrokenModel;

impl SpeechModel for BrokenModel {
    fn infer(&self, _samples: &[f32], _language: &str, _use_itn: bool) -> Result<RawTranscript, AsrError> {
        Err(AsrError::Unhandled("runtime exploded".to_string()))
    }
}

#[tokio::test]
async fn test_loading_service_rejects_requests() {
    let config = Config::default();
    let service = AsrService::new(
        &config,
        Arc::new(MockModelLoader::new(Arc::new(MockSpeechModel::new("x")))),
    );

    let err = service
        .transcribe(NormalizedAudio::silence(16_000), "auto", false)
        .await
        .unwrap_err();
    assert!(matches!(err, AsrError::NotReady { .. }));

    let health = service.health();
    assert!(!health.ready);
    assert_eq!(health.status, "loading");
    assert_eq!(health.model_path, "sensevoice-small");
}

#[tokio::test]
async fn test_failed_startup_reports_reason() {
    let config = Config::default();
    let service = AsrService::new(
        &config,
        Arc::new(MockModelLoader::failing("Model path not found: /models/x")),
    );
    service.startup().await;

    assert_eq!(
        service.readiness(),
        Readiness::Failed("Model path not found: /models/x".to_string())
    );
    let err = service
        .transcribe(NormalizedAudio::silence(16_000), "auto", false)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Model path not found: /models/x");

    let health = service.health();
    assert_eq!(health.startup_error.as_deref(), Some("Model path not found: /models/x"));
}

#[tokio::test]
async fn test_warmup_failure_marks_service_failed() {
    let config = Config::default();
    let service = AsrService::new(&config, Arc::new(MockModelLoader::new(Arc::new(BrokenModel))));
    service.startup().await;

    match service.readiness() {
        Readiness::Failed(reason) => assert!(reason.contains("warm-up"), "{reason}"),
        other => panic!("unexpected readiness: {other:?}"),
    }
}

#[tokio::test]
async fn test_result_metrics() {
    let config = Config::default();
    let service = ready_service(&config, Arc::new(MockSpeechModel::new("<|en|>hello"))).await;

    let result = service
        .transcribe(NormalizedAudio::silence(8_000), "en", true)
        .await
        .unwrap();

    assert_eq!(result.text, "hello");
    assert_eq!(result.audio_duration, 0.5);
    let expected_rtf = (result.latency_ms as f64 / 1000.0) / 0.5;
    assert!((result.rtf - expected_rtf).abs() < 0.01);

    let stats = service.stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.successful_transcriptions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_budget() {
    let config = config_with(2, 10.0);
    let model = Arc::new(MockSpeechModel::new("ok").with_delay(Duration::from_millis(50)));
    let service = ready_service(&config, model.clone()).await;

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .transcribe(NormalizedAudio::silence(1_600), "auto", false)
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().text, "ok");
    }

    // ウォームアップ 1 回 + 6 回
    assert_eq!(model.calls(), 7);
    assert!(model.max_in_flight() <= 2, "max in flight = {}", model.max_in_flight());
    assert_eq!(service.scheduler().available_permits(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_releases_permits() {
    let config = config_with(2, 0.2);
    let model = Arc::new(GatedModel {
        hang: AtomicBool::new(false),
        hold: Duration::from_millis(800),
    });
    let service = ready_service(&config, model.clone()).await;

    model.hang.store(true, Ordering::SeqCst);
    let hung: Vec<_> = (0..2)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .transcribe(NormalizedAudio::silence(1_600), "auto", false)
                    .await
            })
        })
        .collect();
    for handle in hung {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, AsrError::Timeout { .. }), "{err:?}");
        assert_eq!(err.to_string(), "Inference timeout after 0.2s");
    }
    assert_eq!(service.scheduler().available_permits(), 2);

    // 放置された推論が残っていても次の K 件は受け付けられる
    model.hang.store(false, Ordering::SeqCst);
    let next: Vec<_> = (0..2)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .transcribe(NormalizedAudio::silence(1_600), "auto", false)
                    .await
            })
        })
        .collect();
    for handle in next {
        assert_eq!(handle.await.unwrap().unwrap().text, "done");
    }

    let stats = service.stats();
    assert_eq!(stats.timed_out_transcriptions, 2);
    assert_eq!(stats.successful_transcriptions, 2);
    assert_eq!(stats.active_requests, 0);
}

#[tokio::test]
async fn test_health_reports_budget_and_model() {
    let config = config_with(3, 45.0);
    let service = ready_service(&config, Arc::new(MockSpeechModel::new("x"))).await;

    let health = service.health();
    assert!(health.ready);
    assert_eq!(health.status, "ready");
    assert_eq!(health.model_name, "mock");
    assert_eq!(health.max_concurrent_inference, 3);
    assert!(health.startup_error.is_none());

    service.shutdown();
    assert!(!service.health().ready);
}
