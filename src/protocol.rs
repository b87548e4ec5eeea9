//! WebSocket ストリーミングのプロトコル状態機械
//!
//! 接続ごとに一つの `StreamProtocol` を持ち、受信メッセージを順番に処理する。
//! トランスポート（axum の WebSocket）からは切り離してあり、単体でテストできる。
//!
//! - バイナリ: PCM S16LE を追記し、しきい値を超えたら `partial`
//! - テキスト: `{"event": "flush" | "end" | "reset" | "ping"}`
//! - `end` の後は Closed となり、以降の入力はすべて拒否する
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::audio::SAMPLE_RATE;
use crate::models::InferenceResult;
use crate::service::AsrService;
use crate::session::StreamSession;

/// これより短いバイナリフレームは無視する
const MIN_FRAME_BYTES: usize = 2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON command")]
    InvalidJson,
    #[error("Unsupported event: {0}")]
    UnsupportedEvent(String),
    #[error("stream session is closed")]
    Closed,
}

/// クライアントからのコマンド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    Flush,
    End,
    Reset,
    Ping,
}

impl ClientCommand {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;
        let object = value.as_object().ok_or(ProtocolError::InvalidJson)?;
        let event = object.get("event").and_then(|v| v.as_str()).unwrap_or("");

        match event {
            "flush" => Ok(Self::Flush),
            "end" => Ok(Self::End),
            "reset" => Ok(Self::Reset),
            "ping" => Ok(Self::Ping),
            other => Err(ProtocolError::UnsupportedEvent(other.to_string())),
        }
    }
}

/// サーバーから送るイベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ServerEvent {
    Ready { sample_rate: u32 },
    Partial(InferenceResult),
    Final(InferenceResult),
    Reset,
    Pong,
    Error { detail: String },
    Closed,
}

impl ServerEvent {
    pub fn error(detail: impl ToString) -> Self {
        Self::Error {
            detail: detail.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        // 全バリアントが文字列と数値のみで構成されるため失敗しない
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"event":"error"}"#.to_string())
    }
}

/// 受信メッセージ
#[derive(Debug, Clone)]
pub enum Inbound {
    Audio(Bytes),
    Command(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Open,
    Closed,
}

pub struct StreamProtocol {
    session: StreamSession,
    service: Arc<AsrService>,
    language: String,
    use_itn: bool,
    state: ProtocolState,
}

impl StreamProtocol {
    pub fn new(
        service: Arc<AsrService>,
        session: StreamSession,
        language: impl Into<String>,
        use_itn: bool,
    ) -> Self {
        Self {
            session,
            service,
            language: language.into(),
            use_itn,
            state: ProtocolState::Open,
        }
    }

    /// 接続直後に送るイベント
    pub fn greeting(&self) -> ServerEvent {
        ServerEvent::Ready {
            sample_rate: SAMPLE_RATE,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ProtocolState::Closed
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    /// 受信メッセージを1件処理し、送信すべきイベントを順に返す
    pub async fn handle(&mut self, inbound: Inbound) -> Result<Vec<ServerEvent>, ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::Closed);
        }

        match inbound {
            Inbound::Audio(chunk) => Ok(self.on_audio(&chunk).await),
            Inbound::Command(text) => match ClientCommand::parse(&text) {
                Ok(command) => Ok(self.on_command(command).await),
                Err(e) => {
                    debug!(error = %e, "rejected client command");
                    Ok(vec![ServerEvent::error(e)])
                }
            },
        }
    }

    async fn on_audio(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        if chunk.len() < MIN_FRAME_BYTES {
            return Vec::new();
        }

        self.session.append(chunk);
        if !self.session.should_emit_partial() {
            return Vec::new();
        }

        let result = self.transcribe_buffer().await;
        // 失敗しても次の区間まで再試行しない
        self.session.advance_threshold();
        match result {
            Ok(result) => vec![ServerEvent::Partial(result)],
            Err(detail) => vec![ServerEvent::Error { detail }],
        }
    }

    async fn on_command(&mut self, command: ClientCommand) -> Vec<ServerEvent> {
        match command {
            ClientCommand::Flush => match self.transcribe_buffer().await {
                Ok(result) => {
                    self.session.reset();
                    vec![ServerEvent::Final(result)]
                }
                // バッファは保持し、クライアントの再送を許す
                Err(detail) => vec![ServerEvent::Error { detail }],
            },
            ClientCommand::End => {
                let first = match self.transcribe_buffer().await {
                    Ok(result) => ServerEvent::Final(result),
                    Err(detail) => ServerEvent::Error { detail },
                };
                self.session.reset();
                self.state = ProtocolState::Closed;
                vec![first, ServerEvent::Closed]
            }
            ClientCommand::Reset => {
                self.session.reset();
                vec![ServerEvent::Reset]
            }
            ClientCommand::Ping => vec![ServerEvent::Pong],
        }
    }

    async fn transcribe_buffer(&self) -> Result<InferenceResult, String> {
        let audio = self.session.snapshot();
        let samples = audio.len();
        self.service
            .transcribe(audio, &self.language, self.use_itn)
            .await
            .map_err(|e| {
                warn!(
                    error = %e,
                    samples,
                    epoch = self.session.epoch(),
                    "stream inference failed"
                );
                e.to_string()
            })
    }
}
