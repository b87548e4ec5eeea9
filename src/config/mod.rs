//! 設定モジュール
//!
//! 既定値 → TOMLファイル（任意）→ 環境変数 の順に上書きし、
//! 最後に `validate()` で整合性を確認します。
mod error;

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::SAMPLE_RATE;

pub use error::ConfigError;

/// 設定ファイルのパスを指す環境変数名
pub const CONFIG_FILE_ENV: &str = "SENSEVOICE_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub inference: InferenceConfig,
    pub limits: LimitsConfig,
    pub streaming: StreamingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// tracing のフィルタ（`RUST_LOG` 未設定時に使用）
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// モデルファイル、または候補ファイルを含むディレクトリ
    pub model_path: String,
    /// 推論1回あたりのスレッド数
    pub threads: usize,
    pub enable_gpu: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub max_concurrent: usize,
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_upload_mb: usize,
    /// これ未満のPCMボディは推論せず空結果を返す
    pub min_pcm_bytes: usize,
    pub ffmpeg_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub partial_interval_seconds: f64,
    pub max_buffer_seconds: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8008,
            log_level: "INFO".to_string(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: "sensevoice-small".to_string(),
            threads: 1,
            enable_gpu: false,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            timeout_seconds: 45.0,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_mb: 50,
            min_pcm_bytes: 6400, // 0.2秒分
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            partial_interval_seconds: 1.2,
            max_buffer_seconds: 30.0,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// ファイルがあれば読み込み、無ければ既定値
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// プロセス環境から設定を構築（`SENSEVOICE_CONFIG` → 環境変数上書き → 検証）
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| "config.toml".to_string());
        let mut config = Self::load_or_default(path)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// 環境変数による上書き
    /// - テストから任意の取得関数を渡せるよう `lookup` を受け取る
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MODEL_PATH") {
            self.model.model_path = v;
        }
        if let Some(v) = lookup("HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.server.log_level = v.to_uppercase();
        }
        if let Some(v) = lookup("FFMPEG_PATH") {
            self.limits.ffmpeg_path = v;
        }
        override_parsed(&lookup, "PORT", &mut self.server.port)?;
        override_parsed(&lookup, "INTRA_OP_THREADS", &mut self.model.threads)?;
        override_parsed(&lookup, "MAX_CONCURRENT_INFERENCE", &mut self.inference.max_concurrent)?;
        override_parsed(&lookup, "INFERENCE_TIMEOUT_SEC", &mut self.inference.timeout_seconds)?;
        override_parsed(&lookup, "MAX_UPLOAD_MB", &mut self.limits.max_upload_mb)?;
        override_parsed(
            &lookup,
            "WS_PARTIAL_INTERVAL_SEC",
            &mut self.streaming.partial_interval_seconds,
        )?;
        override_parsed(&lookup, "WS_MAX_BUFFER_SEC", &mut self.streaming.max_buffer_seconds)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".to_string()));
        }
        if self.model.threads == 0 {
            return Err(ConfigError::Invalid("inference threads must be at least 1".to_string()));
        }
        if self.inference.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "max concurrent inference must be at least 1".to_string(),
            ));
        }
        let timeout = self.inference.timeout_seconds;
        if !(timeout > 0.0 && Duration::try_from_secs_f64(timeout).is_ok()) {
            return Err(ConfigError::Invalid(format!(
                "inference timeout must be a positive, representable duration, got {timeout}"
            )));
        }
        if self.limits.max_upload_mb == 0 {
            return Err(ConfigError::Invalid("max upload size must be at least 1MB".to_string()));
        }
        for (name, value) in [
            ("partial interval", self.streaming.partial_interval_seconds),
            ("max buffer", self.streaming.max_buffer_seconds),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} seconds must be positive, got {value}")));
            }
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.limits.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn inference_timeout(&self) -> Duration {
        // validate 済みでない設定でも panic させない
        Duration::try_from_secs_f64(self.inference.timeout_seconds).unwrap_or(Duration::MAX)
    }

    /// 部分結果を出す間隔（サンプル数、最低1）
    pub fn partial_interval_samples(&self) -> usize {
        ((SAMPLE_RATE as f64 * self.streaming.partial_interval_seconds) as usize).max(1)
    }

    /// ストリーミングバッファの上限（サンプル数、最低でも部分結果間隔）
    pub fn max_buffer_samples(&self) -> usize {
        ((SAMPLE_RATE as f64 * self.streaming.max_buffer_seconds) as usize)
            .max(self.partial_interval_samples())
    }
}

fn override_parsed<F, T>(lookup: &F, name: &'static str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { name, value: raw.clone() })?;
    }
    Ok(())
}

/// クエリ文字列等の真偽値解釈（"1", "true", "yes", "on"）
pub fn str_to_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_sample_counts_follow_defaults() {
        let config = Config::default();
        assert_eq!(config.partial_interval_samples(), 19_200);
        assert_eq!(config.max_buffer_samples(), 480_000);
    }

    #[test]
    fn max_buffer_never_below_partial_interval() {
        let mut config = Config::default();
        config.streaming.partial_interval_seconds = 5.0;
        config.streaming.max_buffer_seconds = 1.0;
        assert_eq!(config.max_buffer_samples(), config.partial_interval_samples());
    }

    #[test]
    fn str_to_bool_accepts_common_truthy_values() {
        for v in ["1", "true", "TRUE", " yes ", "On"] {
            assert!(str_to_bool(v), "{v}");
        }
        for v in ["0", "false", "", "nope"] {
            assert!(!str_to_bool(v), "{v}");
        }
    }
}
