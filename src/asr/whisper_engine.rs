//! whisper.cpp（whisper-rs）による推論バックエンド
//!
//! - `WhisperContext` は `Arc` で共有し、推論ごとに独立した `state` を生成
//! - ITN は whisper の出力が既に書き言葉のため無視する
use std::sync::Arc;

use tracing::{info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{AsrError, LoadedModel, ModelFile, ModelLoader, RawTranscript, SpeechModel};
use crate::config::ModelConfig;

pub struct WhisperModel {
    context: Arc<WhisperContext>,
    threads: i32,
}

impl SpeechModel for WhisperModel {
    fn infer(&self, samples: &[f32], language: &str, _use_itn: bool) -> Result<RawTranscript, AsrError> {
        let mut state = self
            .context
            .create_state()
            .map_err(|e| AsrError::Unhandled(format!("failed to create whisper state: {e}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(self.threads);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_translate(false);
        if !language.is_empty() && !language.eq_ignore_ascii_case("auto") {
            params.set_language(Some(language));
        }

        state
            .full(params, samples)
            .map_err(|e| AsrError::Unhandled(format!("whisper inference failed: {e}")))?;

        let count = state
            .full_n_segments()
            .map_err(|e| AsrError::Unhandled(format!("segment count failed: {e}")))?;
        let mut segments = Vec::with_capacity(count.max(0) as usize);
        for i in 0..count {
            let text = state
                .full_get_segment_text(i)
                .map_err(|e| AsrError::Unhandled(format!("get segment {i} failed: {e}")))?;
            segments.push(text);
        }
        Ok(RawTranscript::Segments(segments))
    }
}

pub struct WhisperLoader {
    config: ModelConfig,
}

impl WhisperLoader {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for WhisperLoader {
    fn load(&self) -> anyhow::Result<LoadedModel> {
        let file = ModelFile::detect(&self.config.model_path)?;
        let path = file
            .path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("invalid model path: {}", file.path.display()))?
            .to_string();

        let mut params = WhisperContextParameters::default();
        params.use_gpu = self.config.enable_gpu;

        // GPU 初期化に失敗した場合は CPU で再試行
        let context = match WhisperContext::new_with_params(&path, params) {
            Ok(ctx) => ctx,
            Err(e) if self.config.enable_gpu => {
                warn!(error = %e, "GPU context init failed, retrying on CPU");
                let mut cpu_params = WhisperContextParameters::default();
                cpu_params.use_gpu = false;
                WhisperContext::new_with_params(&path, cpu_params)
                    .map_err(|e| anyhow::anyhow!("failed to load whisper model: {e}"))?
            }
            Err(e) => return Err(anyhow::anyhow!("failed to load whisper model: {e}")),
        };

        info!(model = %file.name, size_mb = file.size_mb, "whisper context initialized");

        Ok(LoadedModel {
            model: Arc::new(WhisperModel {
                context: Arc::new(context),
                threads: self.config.threads as i32,
            }),
            file,
        })
    }
}
