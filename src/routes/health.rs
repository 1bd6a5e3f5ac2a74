//! # 헬스체크(Health Check) 핸들러
//!
//! 서버가 정상적으로 동작하는지 확인하는 엔드포인트입니다.
//!
//! ## 엔드포인트
//! - `GET /api/v1/health`
//!   → `{ "status": "ok", "timestamp": "...", "uptime": 12.3, "activeRaces": 2 }`
//!
//! 주로 다음 용도로 사용됩니다:
//! - 로드밸런서의 서버 상태 확인
//! - 컨테이너 오케스트레이터(Docker)의 헬스체크
//! - 모니터링 시스템의 가동 시간 추적

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::routes::AppState;

/// `GET /health`: 서버 상태를 확인합니다.
///
/// 레지스트리 잠금을 잠깐 잡아 활성 레이스 수를 세는 것 외에는 하는 일이 없습니다.
/// `Result`를 사용하지 않으므로 이 핸들러는 실패하지 않습니다.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let now = Utc::now();
    // 초 단위 가동 시간 (밀리초 정밀도)
    let uptime = (now - state.started_at).num_milliseconds() as f64 / 1000.0;

    Json(json!({
        "status": "ok",
        "timestamp": now,
        "uptime": uptime,
        "activeRaces": state.registry.len(),
    }))
}
