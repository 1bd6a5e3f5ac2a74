//! # 실시간 와이어 프로토콜
//!
//! WebSocket 텍스트 프레임으로 주고받는 JSON 메시지입니다.
//! 모든 메시지는 `type` 필드로 종류를 구분합니다 (serde의 internally tagged enum).
//!
//! ```text
//! → {"type":"join","name":"ada","capacity":2,"countdownSeconds":3}
//! ← {"type":"joined","raceId":"...","playerId":"...","text":"...", ...}
//! → {"type":"ready"}
//! ← {"type":"countdownStarted","raceId":"...","startsAt":"...","durationSeconds":3}
//! ← {"type":"raceStarted","raceId":"...","startTimestamp":"...","text":"...","endsAt":"..."}
//! → {"type":"progress","progress":42.5,"wpm":61.0,"accuracy":97.0}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::race::{PlayerInfo, RaceResult, RaceStatus};

/// 클라이언트 → 서버 이벤트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// 참가 가능한 레이스에 들어갑니다. 조건이 맞는 대기실이 없으면 새로 만들어집니다.
    Join {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        capacity: Option<usize>,
        #[serde(default)]
        countdown_seconds: Option<u64>,
    },
    /// 준비 상태를 설정합니다. `ready`가 없으면 현재 상태를 뒤집습니다.
    Ready {
        #[serde(default)]
        ready: Option<bool>,
    },
    /// 호스트의 강제 시작 (혼자 하는 레이스도 이 요청으로만 시작됩니다)
    Start,
    Progress(ProgressReport),
    Leave,
}

/// 진행 중인 레이스에서 보내는 진행률 보고
///
/// `typed`가 있으면 서버가 목표 텍스트와 직접 비교하여 진행률, 정확도를 다시 계산합니다.
/// WPM은 항상 서버의 출발 시각을 기준으로 서버가 계산하며,
/// 클라이언트가 보낸 `wpm`은 로그 비교용으로만 쓰입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub progress: f64,
    #[serde(default)]
    pub wpm: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub mistakes: Option<u32>,
    #[serde(default)]
    pub typed: Option<String>,
}

impl ProgressReport {
    pub fn at(progress: f64) -> Self {
        Self {
            progress,
            ..Self::default()
        }
    }
}

/// 서버 → 클라이언트 이벤트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// 연결 직후 한 번 전송: 이 연결에 배정된 플레이어 ID
    Welcome { player_id: String },
    /// 참가 성공 (참가한 연결에게만)
    Joined {
        race_id: String,
        player_id: String,
        text: String,
        status: RaceStatus,
        max_players: usize,
        countdown_seconds: u64,
    },
    Roster {
        race_id: String,
        status: RaceStatus,
        players: Vec<PlayerInfo>,
    },
    CountdownStarted {
        race_id: String,
        /// 레이스가 실제로 출발하는 서버 시각
        starts_at: DateTime<Utc>,
        duration_seconds: u64,
    },
    RaceStarted {
        race_id: String,
        /// 모든 클라이언트가 경과 시간을 계산할 때 쓰는 유일한 기준 시각
        start_timestamp: DateTime<Utc>,
        text: String,
        ends_at: DateTime<Utc>,
    },
    /// 다른 플레이어의 진행 상황 (전체 세션 상태가 아닌 가벼운 델타)
    ProgressUpdate {
        race_id: String,
        player_id: String,
        progress: f64,
        wpm: f64,
        accuracy: f64,
        /// 현재 진행률 기준 순위 (1부터)
        position: usize,
    },
    PlayerFinished { result: RaceResult },
    RaceFinished {
        race_id: String,
        results: Vec<RaceResult>,
    },
    /// 요청이 거부됨 (요청한 연결에게만)
    Rejected { code: String, message: String },
    /// 서버 종료로 레이스가 정리됨
    ServerShutdown,
}

impl ServerMessage {
    pub fn rejected(err: &crate::error::RaceError) -> Self {
        ServerMessage::Rejected {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_with_camel_case_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"join","name":"ada","countdownSeconds":0}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                name: Some("ada".into()),
                capacity: None,
                countdown_seconds: Some(0),
            }
        );
    }

    #[test]
    fn parses_bare_commands() {
        let ready: ClientMessage = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert_eq!(ready, ClientMessage::Ready { ready: None });
        let leave: ClientMessage = serde_json::from_str(r#"{"type":"leave"}"#).unwrap();
        assert_eq!(leave, ClientMessage::Leave);
    }

    #[test]
    fn parses_progress_report() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"progress","progress":42.5,"wpm":61,"accuracy":97.5}"#,
        )
        .unwrap();
        let ClientMessage::Progress(report) = msg else {
            panic!("expected progress, got {msg:?}");
        };
        assert_eq!(report.progress, 42.5);
        assert_eq!(report.accuracy, Some(97.5));
        assert_eq!(report.typed, None);
    }

    #[test]
    fn server_messages_are_tagged() {
        let json = serde_json::to_value(ServerMessage::Welcome {
            player_id: "p1".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "welcome");
        assert_eq!(json["playerId"], "p1");
    }
}
