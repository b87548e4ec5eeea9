//! 推論モデルとの境界
//!
//! - `SpeechModel` はステートレスな推論関数（呼び出しごとに独立）
//! - `ModelLoader` は起動時にモデルを検出・ロードする
//! - モデル出力の揺れ（セグメント列 / 単一テキスト）は `RawTranscript` で受け、
//!   `into_text()` で一つの文字列に正規化してからタグを除去する
mod error;
pub mod mock;
pub mod model_file;
#[cfg(feature = "whisper")]
pub mod whisper_engine;

use std::sync::{Arc, LazyLock};

use regex::Regex;

pub use error::AsrError;
pub use mock::{MockModelLoader, MockSpeechModel};
pub use model_file::ModelFile;

/// モデルの生出力
#[derive(Debug, Clone, PartialEq)]
pub enum RawTranscript {
    Segments(Vec<String>),
    Text(String),
}

impl RawTranscript {
    /// 一つの文字列へ正規化し、`<|...|>` 形式のタグを除去
    pub fn into_text(self) -> String {
        let joined = match self {
            RawTranscript::Segments(segments) => segments.concat(),
            RawTranscript::Text(text) => text,
        };
        clean_text(&joined)
    }
}

/// 推論コラボレータ（音声 → テキスト）
pub trait SpeechModel: Send + Sync {
    fn infer(&self, samples: &[f32], language: &str, use_itn: bool) -> Result<RawTranscript, AsrError>;
}

/// ロード済みモデルとそのメタ情報
pub struct LoadedModel {
    pub model: Arc<dyn SpeechModel>,
    pub file: ModelFile,
}

/// 起動時のモデル読み込み
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> anyhow::Result<LoadedModel>;
}

/// 推論バックエンドがビルドに含まれていない場合のローダ
pub struct UnavailableLoader;

impl ModelLoader for UnavailableLoader {
    fn load(&self) -> anyhow::Result<LoadedModel> {
        Err(anyhow::anyhow!(
            "no inference backend compiled in (rebuild with `--features whisper`)"
        ))
    }
}

/// 設定に応じた既定ローダ
pub fn default_loader(config: &crate::config::Config) -> Arc<dyn ModelLoader> {
    #[cfg(feature = "whisper")]
    {
        Arc::new(whisper_engine::WhisperLoader::new(config.model.clone()))
    }
    #[cfg(not(feature = "whisper"))]
    {
        let _ = config;
        Arc::new(UnavailableLoader)
    }
}

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|.*?\|>").expect("tag pattern is valid"));

/// `<|ja|><|NEUTRAL|>こんにちは` のような制御タグを取り除く（改行をまたぐタグは対象外）
pub fn clean_text(text: &str) -> String {
    TAG_RE.replace_all(text, "").trim().to_string()
}
