//! # 레이스 모델 정의
//!
//! 레이스 세션의 상태, 읽기 전용 스냅샷, 플레이어 결과 레코드를 정의합니다.
//! 모두 JSON으로 직렬화되어 WebSocket 이벤트와 HTTP 응답에 그대로 실립니다.
//!
//! ## 세션 상태 흐름
//! ```text
//! waiting ──(전원 준비 / 정원 도달 / 호스트 강제 시작)──▶ countdown
//! countdown ──(카운트다운 만료)──▶ racing
//! racing ──(전원 완주 / 종료 기한 경과)──▶ finished
//! ```
//! 역방향 전이나 단계 건너뛰기는 없습니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 레이스 세션의 생명주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaceStatus {
    /// 대기실: 참가와 준비 상태 변경을 받는 단계
    Waiting,
    /// 출발 전 동기화 구간: 입력이 점수에 반영되지 않음
    Countdown,
    /// 진행 중: 진행률 보고를 받는 단계
    Racing,
    /// 종료: 읽기만 가능
    Finished,
}

impl RaceStatus {
    /// 이 상태에서 다음으로 갈 수 있는 유일한 상태
    pub fn next(self) -> Option<RaceStatus> {
        match self {
            RaceStatus::Waiting => Some(RaceStatus::Countdown),
            RaceStatus::Countdown => Some(RaceStatus::Racing),
            RaceStatus::Racing => Some(RaceStatus::Finished),
            RaceStatus::Finished => None,
        }
    }
}

impl fmt::Display for RaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RaceStatus::Waiting => "waiting",
            RaceStatus::Countdown => "countdown",
            RaceStatus::Racing => "racing",
            RaceStatus::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// 로스터(참가자 목록)에 표시되는 플레이어 한 명의 공개 정보
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: String,
    pub username: String,
    pub is_ready: bool,
    pub is_host: bool,
    /// 0~100 퍼센트
    pub progress: f64,
    pub wpm: f64,
    pub accuracy: f64,
    pub finished_at: Option<DateTime<Utc>>,
    /// 레이스 도중 연결이 끊겨 마지막 진행률로 고정된 플레이어
    pub left: bool,
}

/// 레이스 세션의 읽기 전용 스냅샷
///
/// HTTP 조회(`GET /api/v1/races/{id}`)에 사용됩니다.
/// 목표 텍스트는 대기 중에 노출하지 않고 길이만 알려줍니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceSnapshot {
    pub id: String,
    pub status: RaceStatus,
    pub text_length: usize,
    pub players: Vec<PlayerInfo>,
    pub max_players: usize,
    pub countdown_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub countdown_ends_at: Option<DateTime<Utc>>,
    /// 모든 WPM 계산의 기준이 되는 서버 발행 출발 시각
    pub started_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// 한 플레이어의 레이스 결과: 한 번 만들어지면 바뀌지 않습니다
///
/// 플레이어가 100%에 도달한 순간 또는 레이스 종료 기한이 지난 순간 중
/// 먼저 오는 시점에 정확히 한 번 계산됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceResult {
    pub race_id: String,
    pub player_id: String,
    pub username: String,
    pub wpm: f64,
    pub accuracy: f64,
    /// 완주 순위 (1부터). 완주하지 못한 플레이어(DNF)는 `None`
    pub position: Option<u32>,
    /// 결과가 확정된 시점의 진행률
    pub progress: f64,
    /// 출발 시각부터 결과 확정까지 걸린 시간(ms)
    pub time_ms: i64,
    pub mistakes: u32,
    pub finished_at: DateTime<Utc>,
}

impl RaceResult {
    pub fn did_finish(&self) -> bool {
        self.position.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_forward_only() {
        assert_eq!(RaceStatus::Waiting.next(), Some(RaceStatus::Countdown));
        assert_eq!(RaceStatus::Countdown.next(), Some(RaceStatus::Racing));
        assert_eq!(RaceStatus::Racing.next(), Some(RaceStatus::Finished));
        assert_eq!(RaceStatus::Finished.next(), None);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&RaceStatus::Countdown).unwrap();
        assert_eq!(json, "\"countdown\"");
        assert_eq!(RaceStatus::Racing.to_string(), "racing");
    }
}
