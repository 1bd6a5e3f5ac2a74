//! # 플레이어 상태
//!
//! 레이스 세션 하나에 속한 참가자 레코드입니다.
//! 플레이어는 항상 자신이 속한 세션이 소유하며, 세션 밖에서 따로 존재하지 않습니다.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::models::{PlayerInfo, ServerMessage};

/// 연결별 발신 큐의 송신 핸들
///
/// unbounded 채널이므로 `send`는 절대 블로킹되지 않습니다.
/// 느리거나 끊어진 수신자가 이벤트를 보낸 쪽을 지연시키지 않습니다.
pub type Subscriber = mpsc::UnboundedSender<ServerMessage>;

/// 표시 이름의 최대 글자 수
pub const MAX_NAME_CHARS: usize = 32;

#[derive(Debug)]
pub struct Player {
    pub id: String,
    pub username: String,
    pub ready: bool,
    /// 0~100. 레이스 중에는 줄어들지 않습니다
    pub progress: f64,
    pub wpm: f64,
    pub accuracy: f64,
    pub mistakes: u32,
    /// 한 번 설정되면 바뀌지 않습니다
    pub finished_at: Option<DateTime<Utc>>,
    /// 레이스 도중 연결이 끊겨 마지막 진행률로 고정됨
    pub left: bool,
    outbound: Subscriber,
}

impl Player {
    pub fn new(id: String, username: String, outbound: Subscriber) -> Self {
        Self {
            id,
            username,
            ready: false,
            progress: 0.0,
            wpm: 0.0,
            accuracy: 100.0,
            mistakes: 0,
            finished_at: None,
            left: false,
            outbound,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// 아직 달리고 있는 플레이어인지 (완주하지도, 떠나지도 않음)
    pub fn is_running(&self) -> bool {
        !self.is_finished() && !self.left
    }

    /// 이 플레이어의 발신 큐에 이벤트를 넣습니다.
    ///
    /// 수신 측이 이미 닫혔다면 조용히 버립니다. 연결 종료는 게이트웨이가
    /// 별도로 `leave`로 처리하므로 여기서 에러로 취급하지 않습니다.
    pub fn send(&self, msg: ServerMessage) {
        if self.left {
            return;
        }
        if self.outbound.send(msg).is_err() {
            tracing::debug!(player_id = %self.id, "outbound queue closed, dropping event");
        }
    }

    pub fn info(&self, is_host: bool) -> PlayerInfo {
        PlayerInfo {
            id: self.id.clone(),
            username: self.username.clone(),
            is_ready: self.ready,
            is_host,
            progress: self.progress,
            wpm: self.wpm,
            accuracy: self.accuracy,
            finished_at: self.finished_at,
            left: self.left,
        }
    }
}

/// 요청된 표시 이름을 정리합니다.
///
/// 앞뒤 공백과 제어 문자를 제거하고 `MAX_NAME_CHARS`로 자릅니다.
/// 남는 글자가 없으면 플레이어 ID 끝 4자리로 `guest-xxxx` 이름을 만듭니다.
pub fn display_name(requested: Option<&str>, player_id: &str) -> String {
    let cleaned: String = requested
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_CHARS)
        .collect();

    if cleaned.is_empty() {
        let tail: String = player_id
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("guest-{tail}")
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_capped() {
        assert_eq!(display_name(Some("  ada  "), "id"), "ada");
        let long = "x".repeat(100);
        assert_eq!(display_name(Some(&long), "id").chars().count(), MAX_NAME_CHARS);
    }

    #[test]
    fn blank_names_become_guests() {
        assert_eq!(display_name(None, "0191-abcd-1234"), "guest-1234");
        assert_eq!(display_name(Some("   "), "0191-abcd-9f9f"), "guest-9f9f");
    }

    #[test]
    fn left_players_receive_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut player = Player::new("p1".into(), "ada".into(), tx);
        player.send(ServerMessage::ServerShutdown);
        player.left = true;
        player.send(ServerMessage::ServerShutdown);
        assert_eq!(rx.try_recv().ok(), Some(ServerMessage::ServerShutdown));
        assert!(rx.try_recv().is_err());
    }
}
