//! # 라우트 핸들러 모듈
//!
//! HTTP 요청을 처리하는 핸들러 함수들을 모아둔 모듈입니다.
//! Axum에서 핸들러는 HTTP 요청을 받아 응답을 반환하는 async 함수입니다.
//!
//! 각 하위 모듈:
//! - `health`: 서버 상태 확인 (헬스체크)
//! - `races`: 레이스 목록/생성/조회
//! - `leaderboard`: 누적 순위표
//! - `realtime`: WebSocket 업그레이드와 연결 루프

pub mod health;
pub mod leaderboard;
pub mod races;
pub mod realtime;

// 각 모듈의 핸들러 함수들을 재공개하여
// main.rs에서 `routes::list_races`처럼 바로 접근 가능하게 합니다.
pub use health::*;
pub use leaderboard::*;
pub use races::*;
pub use realtime::*;

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{gateway::Gateway, race::Registry, services::leaderboard::Leaderboard};

/// 애플리케이션 공유 상태
///
/// 모든 요청 핸들러가 `State(state): State<AppState>`로 접근합니다.
/// 내부 값은 모두 `Arc`이므로 clone해도 같은 레지스트리를 가리킵니다.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub gateway: Gateway,
    pub leaderboard: Arc<Leaderboard>,
    /// 가동 시간 계산용 서버 시작 시각
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, leaderboard: Arc<Leaderboard>) -> Self {
        Self {
            gateway: Gateway::new(Arc::clone(&registry)),
            registry,
            leaderboard,
            started_at: Utc::now(),
        }
    }
}

/// `/api/v1` 아래에 붙는 라우트와 `/ws`를 하나로 묶은 라우터
///
/// CORS, 트레이싱 레이어는 main.rs에서 바깥에 씌웁니다.
pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        // 헬스체크 API (서버 상태 확인용)
        .route("/health", get(health_check))
        // 레이스 API. {id}는 URL 경로 파라미터 (axum 0.8 문법)
        .route("/races", get(list_races).post(create_race))
        .route("/races/{id}", get(get_race))
        .route("/leaderboard", get(get_leaderboard));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/ws", get(ws_handler))
        // .with_state(): 모든 핸들러에서 AppState를 사용할 수 있게 합니다.
        .with_state(state)
}
