//! モデルファイルの検出
//!
//! `model_path` はモデルファイルそのもの、または候補ファイルを含むディレクトリ。
//! ディレクトリの場合は `MODEL_CANDIDATES` の順に最初に存在するものを使う。
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

/// ディレクトリ指定時の候補（優先順）
pub const MODEL_CANDIDATES: &[&str] = &["model.bin", "model_quant.bin", "model_full.bin"];

/// 分割されたままのモデル断片の接尾辞
const FRAGMENT_SUFFIX: &str = ".part000";

#[derive(Debug, Clone, Serialize)]
pub struct ModelFile {
    pub path: PathBuf,
    pub name: String,
    pub size_mb: f64,
    pub quantized: bool,
}

impl ModelFile {
    pub fn detect<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(anyhow::anyhow!(
                "Model path not found: {}",
                absolute(model_path).display()
            ));
        }

        if model_path.is_file() {
            return Self::from_file(model_path);
        }

        for candidate in MODEL_CANDIDATES {
            let path = model_path.join(candidate);
            if path.is_file() {
                return Self::from_file(&path);
            }
        }

        let has_fragments = std::fs::read_dir(model_path)?
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.file_name().to_string_lossy().ends_with(FRAGMENT_SUFFIX));
        if has_fragments {
            return Err(anyhow::anyhow!(
                "Model fragments detected under {}. Merge the *{} parts into a single file first.",
                absolute(model_path).display(),
                FRAGMENT_SUFFIX
            ));
        }

        Err(anyhow::anyhow!(
            "No {} under {}",
            MODEL_CANDIDATES.join("/"),
            absolute(model_path).display()
        ))
    }

    fn from_file(path: &Path) -> Result<Self> {
        let size = std::fs::metadata(path)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let quantized = name.contains("quant") || name.contains("-q");
        Ok(Self {
            path: absolute(path),
            name,
            size_mb: size as f64 / (1024.0 * 1024.0),
            quantized,
        })
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
