//! ストリーミングセッションの音声バッファ
//!
//! 生PCM(S16LE)を上限付きで蓄積し、次に部分結果を出すしきい値を管理する。
//! 上限を超えた場合は古いサンプルから捨てる（リングバッファ相当）。
//! 継続的なオーバーフロー時は音声が失われる点に注意。
//!
//! 部分結果のしきい値は保持量ではなく受信した累計サンプル数で判定するため、
//! 上限に達した後も一定間隔で部分結果が出続ける。
use tracing::{debug, warn};

use crate::audio::{pcm16le_to_audio, NormalizedAudio};

#[derive(Debug)]
pub struct StreamSession {
    partial_interval_samples: usize,
    max_buffer_samples: usize,
    /// 常にサンプル境界（偶数バイト）で揃える
    buffer: Vec<u8>,
    /// チャンク末尾の奇数バイト（次のチャンク先頭と結合する）
    carry: Option<u8>,
    /// reset 以降に受信した累計サンプル数（破棄分を含む）
    received_samples: usize,
    /// `received_samples` がこの値に達したら部分結果を出す
    next_threshold: usize,
    /// reset のたびに進む世代番号
    epoch: u64,
    evicted_samples: u64,
}

impl StreamSession {
    /// `max_buffer_samples` は `partial_interval_samples` 未満にならない
    pub fn new(partial_interval_samples: usize, max_buffer_samples: usize) -> Self {
        let partial_interval_samples = partial_interval_samples.max(1);
        Self {
            partial_interval_samples,
            max_buffer_samples: max_buffer_samples.max(partial_interval_samples),
            buffer: Vec::new(),
            carry: None,
            received_samples: 0,
            next_threshold: partial_interval_samples,
            epoch: 0,
            evicted_samples: 0,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.partial_interval_samples(), config.max_buffer_samples())
    }

    /// 蓄積済みサンプル数
    pub fn total_samples(&self) -> usize {
        self.buffer.len() / 2
    }

    /// reset 以降に受信した累計サンプル数
    pub fn received_samples(&self) -> usize {
        self.received_samples
    }

    pub fn next_threshold(&self) -> usize {
        self.next_threshold
    }

    pub fn partial_interval_samples(&self) -> usize {
        self.partial_interval_samples
    }

    pub fn max_buffer_samples(&self) -> usize {
        self.max_buffer_samples
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// 上限超過で捨てた累計サンプル数
    pub fn evicted_samples(&self) -> u64 {
        self.evicted_samples
    }

    /// 保持中の生バイト列
    pub fn raw_pcm(&self) -> &[u8] {
        &self.buffer
    }

    /// チャンクを追加し、上限超過分を先頭から捨てる
    pub fn append(&mut self, chunk: &[u8]) {
        let mut chunk = chunk;
        let before = self.buffer.len();
        if let Some(low) = self.carry.take() {
            match chunk.split_first() {
                Some((high, rest)) => {
                    self.buffer.extend_from_slice(&[low, *high]);
                    chunk = rest;
                }
                None => {
                    self.carry = Some(low);
                    return;
                }
            }
        }

        let whole = chunk.len() & !1;
        self.buffer.extend_from_slice(&chunk[..whole]);
        if whole < chunk.len() {
            self.carry = Some(chunk[whole]);
        }
        self.received_samples = self
            .received_samples
            .saturating_add((self.buffer.len() - before) / 2);

        let max_bytes = self.max_buffer_samples.saturating_mul(2);
        if self.buffer.len() > max_bytes {
            let excess = self.buffer.len() - max_bytes;
            self.buffer.drain(..excess);
            let first_eviction = self.evicted_samples == 0;
            self.evicted_samples += (excess / 2) as u64;
            if first_eviction {
                warn!(
                    max_samples = self.max_buffer_samples,
                    evicted = excess / 2,
                    "stream buffer over capacity, dropping oldest audio"
                );
            } else {
                debug!(
                    evicted = excess / 2,
                    total_evicted = self.evicted_samples,
                    "stream buffer over capacity, dropped oldest samples"
                );
            }
        }
    }

    pub fn should_emit_partial(&self) -> bool {
        self.received_samples >= self.next_threshold
    }

    /// 部分結果を出した直後に呼び、同じ増分での再発火を防ぐ
    pub fn advance_threshold(&mut self) {
        self.next_threshold = self
            .received_samples
            .saturating_add(self.partial_interval_samples);
    }

    /// バッファ全体を正規化サンプルとして取り出す（部分/最終とも全履歴を再デコード）
    pub fn snapshot(&self) -> NormalizedAudio {
        pcm16le_to_audio(&self.buffer)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.carry = None;
        self.received_samples = 0;
        self.next_threshold = self.partial_interval_samples;
        self.epoch += 1;
    }
}
