//! テストや開発用のモック推論
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{AsrError, LoadedModel, ModelFile, ModelLoader, RawTranscript, SpeechModel};

/// 固定テキストを返すモデル
///
/// `delay` を設定すると推論中にブロックし、同時実行数を計測する。
#[derive(Debug, Default)]
pub struct MockSpeechModel {
    text: String,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockSpeechModel {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 呼び出し回数（ウォームアップを含む）
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 観測した最大同時実行数
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl SpeechModel for MockSpeechModel {
    fn infer(&self, samples: &[f32], _language: &str, _use_itn: bool) -> Result<RawTranscript, AsrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.text.is_empty() {
            return Ok(RawTranscript::Text(format!("{} samples", samples.len())));
        }
        Ok(RawTranscript::Segments(vec![self.text.clone()]))
    }
}

/// 任意の `SpeechModel` をそのまま返すローダ
pub struct MockModelLoader {
    model: Arc<dyn SpeechModel>,
    fail_with: Option<String>,
}

impl MockModelLoader {
    pub fn new(model: Arc<dyn SpeechModel>) -> Self {
        Self {
            model,
            fail_with: None,
        }
    }

    /// ロードに失敗するローダ
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            model: Arc::new(MockSpeechModel::default()),
            fail_with: Some(reason.into()),
        }
    }
}

impl ModelLoader for MockModelLoader {
    fn load(&self) -> anyhow::Result<LoadedModel> {
        if let Some(reason) = &self.fail_with {
            return Err(anyhow::anyhow!("{reason}"));
        }
        Ok(LoadedModel {
            model: self.model.clone(),
            file: ModelFile {
                path: PathBuf::from("mock"),
                name: "mock".to_string(),
                size_mb: 0.0,
                quantized: false,
            },
        })
    }
}
