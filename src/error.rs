//! # 에러 처리 모듈
//!
//! 애플리케이션에서 발생할 수 있는 에러 타입을 정의합니다.
//! Rust에서는 예외(exception) 대신 `Result<T, E>` 타입으로 에러를 처리합니다.
//!
//! 이 모듈의 핵심:
//! - `RaceError`: 레이스 세션/레지스트리 연산이 거부되는 이유 (실시간 이벤트용)
//! - `AppError`: HTTP 핸들러용 에러. `IntoResponse` 구현으로 JSON 응답으로 자동 변환

use axum::{
    http::StatusCode,                   // HTTP 상태 코드 (200, 404, 500 등)
    response::{IntoResponse, Response}, // Axum의 응답 변환 트레이트
    Json,                               // JSON 응답 래퍼
};
use serde_json::json;
use thiserror::Error;

use crate::models::RaceStatus;

/// 레이스 연산이 거부되는 이유
///
/// 한 연결에서 보낸 이벤트가 거부되더라도 세션 전체에는 영향을 주지 않습니다.
/// 게이트웨이는 이 에러를 `rejected` 이벤트로 바꿔 요청한 연결에게만 돌려보냅니다.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaceError {
    /// 정원이 가득 찬 세션에 참가하려 함
    #[error("race is full")]
    CapacityExceeded,

    /// 현재 세션 상태에서 허용되지 않는 이벤트
    /// (예: `waiting` 상태에서 진행률 보고)
    #[error("cannot {action} while race is {status}")]
    InvalidTransition {
        action: &'static str,
        status: RaceStatus,
    },

    /// 이미 기록된 값보다 작은 진행률: 네트워크 재정렬로 흔히 발생하므로 조용히 무시됩니다
    #[error("progress is older than the last recorded value")]
    StaleProgress,

    /// 0~100 범위를 벗어났거나 유한하지 않은 진행률
    #[error("progress must be a number between 0 and 100")]
    InvalidProgress,

    #[error("race not found")]
    UnknownSession,

    #[error("player not found in race")]
    UnknownPlayer,

    /// 진행 중인 세션을 레지스트리에서 제거하려 함
    #[error("race is still in progress")]
    SessionNotRemovable,

    /// 호스트가 아닌 플레이어가 강제 시작을 요청함
    #[error("only the host can start the race")]
    NotHost,

    /// 아직 어떤 레이스에도 참가하지 않은 연결의 이벤트
    #[error("join a race first")]
    NotInRace,
}

impl RaceError {
    /// 와이어 프로토콜에 실리는 안정적인 에러 코드
    pub fn code(&self) -> &'static str {
        match self {
            RaceError::CapacityExceeded => "capacity_exceeded",
            RaceError::InvalidTransition { .. } => "invalid_transition",
            RaceError::StaleProgress => "stale_progress",
            RaceError::InvalidProgress => "invalid_progress",
            RaceError::UnknownSession => "unknown_session",
            RaceError::UnknownPlayer => "unknown_player",
            RaceError::SessionNotRemovable => "session_not_removable",
            RaceError::NotHost => "not_host",
            RaceError::NotInRace => "not_in_race",
        }
    }
}

/// HTTP 핸들러에서 발생할 수 있는 에러 종류
///
/// 핸들러에서 `Result<T, AppError>`를 반환하면,
/// Axum이 자동으로 `IntoResponse`를 호출하여 HTTP 응답으로 변환합니다.
#[derive(Debug, Error)]
pub enum AppError {
    /// 요청한 리소스를 찾을 수 없음 (HTTP 404)
    #[error("Resource not found")]
    NotFound,

    /// 잘못된 요청 (HTTP 400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// 리소스 충돌 (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// 환경변수 설정 오류: 서버 시작 단계에서만 발생합니다
    #[error("Invalid configuration: {0}")]
    Config(String),
}

// 레이스 에러를 HTTP 의미에 맞게 매핑합니다.
// `?` 연산자가 RaceError를 AppError로 자동 변환할 수 있게 됩니다.
impl From<RaceError> for AppError {
    fn from(err: RaceError) -> Self {
        match err {
            RaceError::UnknownSession | RaceError::UnknownPlayer => AppError::NotFound,
            RaceError::SessionNotRemovable
            | RaceError::CapacityExceeded
            | RaceError::InvalidTransition { .. } => AppError::Conflict(err.to_string()),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    /// AppError를 HTTP 응답으로 변환합니다.
    ///
    /// 설정 에러(Config)는 실제 내용을 로그에만 기록하고,
    /// 클라이언트에는 일반적인 메시지만 반환합니다.
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::BadRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", msg.clone())
            }
            AppError::Conflict(ref msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::Config(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        // 결과: { "error": { "code": "not_found", "message": "Resource not found" } }
        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
