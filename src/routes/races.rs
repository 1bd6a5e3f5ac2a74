//! # 레이스 API 라우트 핸들러
//!
//! ## 엔드포인트 목록
//! | 메서드 | 경로 | 핸들러 | 설명 |
//! |--------|------|--------|------|
//! | GET | /api/v1/races | `list_races` | 활성 레이스 스냅샷 목록 (생성 순) |
//! | POST | /api/v1/races | `create_race` | 빈 대기실 생성 |
//! | GET | /api/v1/races/{id} | `get_race` | 레이스 하나의 스냅샷 |
//!
//! 레이스 참가와 진행은 HTTP가 아니라 `/ws` 실시간 채널로만 이루어집니다.
//! 여기서는 조회와 대기실 생성만 제공합니다.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::AppError,
    models::RaceSnapshot,
    race::{lock_session, JoinRequest},
    routes::AppState,
};

/// `POST /races` 요청 본문. 두 필드 모두 생략 가능하며, 서버 설정 범위로 잘립니다.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRaceRequest {
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub countdown_seconds: Option<u64>,
}

/// `GET /races` → `{ "races": [...] }`
pub async fn list_races(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "races": state.registry.snapshots() }))
}

/// `POST /races` → 201 Created + 스냅샷
///
/// 만들어진 대기실은 같은 조건의 `join` 요청이 들어오면 가장 먼저 채워집니다.
pub async fn create_race(
    State(state): State<AppState>,
    Json(req): Json<CreateRaceRequest>,
) -> (StatusCode, Json<RaceSnapshot>) {
    let request = JoinRequest {
        capacity: req.capacity,
        countdown_seconds: req.countdown_seconds,
    };
    let (_, session) = state.registry.create_race(request, Utc::now());
    let snapshot = lock_session(&session).snapshot();
    (StatusCode::CREATED, Json(snapshot))
}

/// `GET /races/{id}` → 스냅샷, 없으면 404
pub async fn get_race(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RaceSnapshot>, AppError> {
    // RaceError::UnknownSession → AppError::NotFound (`?`가 From으로 변환)
    let session = state.registry.get(&id)?;
    let snapshot = lock_session(&session).snapshot();
    Ok(Json(snapshot))
}
