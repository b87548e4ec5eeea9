use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Multipart, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::asr::AsrError;
use crate::audio::{pcm16le_to_audio, transcode::decode_with_ffmpeg};
use crate::config::Config;
use crate::models::*;
use crate::protocol::{Inbound, ServerEvent, StreamProtocol};
use crate::service::AsrService;
use crate::session::StreamSession;

// =============================================================================
// Application State
// - ハンドラ間で共有する情報（設定、音声認識サービス）
// - サービスは起動処理と並行して参照されるため `Arc` で共有
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<AsrService>,
}

impl AppState {
    pub fn new(config: Config, service: Arc<AsrService>) -> Self {
        Self {
            config: Arc::new(config),
            service,
        }
    }
}

// =============================================================================
// Error Handling
// - 型安全な API エラーを定義し、`IntoResponse` で JSON へ変換
// =============================================================================

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn status_code(&self) -> StatusCode {
        match self.code {
            ApiErrorCode::InvalidInput | ApiErrorCode::DecodeFailed => StatusCode::BAD_REQUEST,
            ApiErrorCode::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiErrorCode::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::InferenceTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AsrError> for ApiError {
    fn from(err: AsrError) -> Self {
        let code = match &err {
            AsrError::NotReady { .. } => ApiErrorCode::ModelNotLoaded,
            AsrError::Timeout { .. } => ApiErrorCode::InferenceTimeout,
            AsrError::InvalidInput(_) => ApiErrorCode::InvalidInput,
            AsrError::DecodeFailure(_) => ApiErrorCode::DecodeFailed,
            AsrError::Unhandled(_) => ApiErrorCode::InternalError,
        };
        ApiError::new(code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            warn!(status = status_code.as_u16(), code = self.code.as_str(), error = %self.message, "request failed");
        }

        let response = ErrorResponse {
            error: self.message,
            code: self.code.as_str().to_string(),
            details: self.details,
        };

        (status_code, Json(response)).into_response()
    }
}

// =============================================================================
// Request Handlers
// =============================================================================

/// 生PCM(S16LE, 16kHz, mono)の文字起こし
pub async fn transcribe_pcm(
    State(state): State<AppState>,
    Query(params): Query<TranscribeParams>,
    body: Bytes,
) -> ApiResult<Json<InferenceResult>> {
    // 短すぎるボディは推論せずゼロ値を返す
    if body.len() < state.config.limits.min_pcm_bytes {
        debug!(bytes = body.len(), "pcm body below minimum, skipping inference");
        return Ok(Json(InferenceResult::empty()));
    }

    let audio = pcm16le_to_audio(&body);
    let result = state
        .service
        .transcribe(audio, &params.language(), params.use_itn())
        .await?;
    Ok(Json(result))
}

/// 旧クライアント向けの互換エンドポイント（`transcribe_pcm` と同一）
pub async fn transcribe_stream(
    state: State<AppState>,
    params: Query<TranscribeParams>,
    body: Bytes,
) -> ApiResult<Json<InferenceResult>> {
    transcribe_pcm(state, params, body).await
}

/// 任意形式の音声ファイルを ffmpeg で変換して文字起こし
pub async fn transcribe_file(
    State(state): State<AppState>,
    Query(params): Query<TranscribeParams>,
    mut multipart: Multipart,
) -> ApiResult<Json<FileTranscribeResponse>> {
    let max_bytes = state.config.max_upload_bytes();
    let too_large = || {
        ApiError::new(
            ApiErrorCode::FileTooLarge,
            format!("File too large, max {}MB", state.config.limits.max_upload_mb),
        )
    };

    // `file` フィールドのみ受け取り、その他は読み飛ばす
    let mut upload: Option<(Option<String>, Bytes)> = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            too_large()
        } else {
            ApiError::new(ApiErrorCode::InvalidInput, "Failed to parse multipart data")
                .with_details(e.body_text())
        }
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                too_large()
            } else {
                ApiError::new(ApiErrorCode::InvalidInput, "Failed to read file data")
                    .with_details(e.body_text())
            }
        })?;
        upload = Some((filename, data));
        break;
    }

    let (filename, payload) = upload
        .ok_or_else(|| ApiError::new(ApiErrorCode::InvalidInput, "Missing file field"))?;
    if payload.is_empty() {
        return Err(ApiError::new(ApiErrorCode::InvalidInput, "Empty file"));
    }
    if payload.len() > max_bytes {
        return Err(too_large());
    }

    info!(
        filename = filename.as_deref().unwrap_or("-"),
        bytes = payload.len(),
        "decoding uploaded audio"
    );
    let audio = decode_with_ffmpeg(
        &state.config.limits.ffmpeg_path,
        &payload,
        filename.as_deref().unwrap_or("audio.bin"),
    )
    .await?;

    let result = state
        .service
        .transcribe(audio, &params.language(), params.use_itn())
        .await?;
    Ok(Json(FileTranscribeResponse { result, filename }))
}

/// サービスの状態（常に 200）
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.service.health())
}

/// Ready でなければ同じ内容を 503 で返す
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let health = state.service.health();
    let status = if health.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

pub async fn stats(State(state): State<AppState>) -> Json<ServiceStats> {
    Json(state.service.stats())
}

// =============================================================================
// WebSocket Streaming
// - 接続ごとに `StreamProtocol` を持ち、メッセージを逐次処理する
// =============================================================================

pub async fn ws_transcribe(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<TranscribeParams>,
) -> Response {
    let language = params.language();
    let use_itn = params.use_itn();
    ws.on_upgrade(move |socket| handle_stream(socket, state, language, use_itn))
}

async fn handle_stream(socket: WebSocket, state: AppState, language: String, use_itn: bool) {
    let session_id = Uuid::new_v4();
    info!(%session_id, %language, use_itn, "stream connected");

    let (mut sender, mut receiver) = socket.split();
    let mut protocol = StreamProtocol::new(
        state.service.clone(),
        StreamSession::from_config(&state.config),
        language,
        use_itn,
    );

    if send_event(&mut sender, &protocol.greeting()).await.is_err() {
        warn!(%session_id, "failed to send ready event");
        return;
    }

    while let Some(message) = receiver.next().await {
        let inbound = match message {
            Ok(Message::Binary(data)) => Inbound::Audio(data),
            Ok(Message::Text(text)) => Inbound::Command(text.as_str().to_string()),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(%session_id, error = %e, "stream receive error");
                break;
            }
        };

        let events = match protocol.handle(inbound).await {
            Ok(events) => events,
            Err(e) => {
                debug!(%session_id, error = %e, "message after close rejected");
                break;
            }
        };

        for event in &events {
            if send_event(&mut sender, event).await.is_err() {
                warn!(%session_id, "stream send failed, dropping connection");
                return;
            }
        }

        if protocol.is_closed() {
            let _ = sender.send(Message::Close(None)).await;
            break;
        }
    }

    info!(
        %session_id,
        buffered_samples = protocol.session().total_samples(),
        "stream disconnected"
    );
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    sender.send(Message::Text(event.to_json().into())).await
}
