//! # 실시간 게이트웨이
//!
//! 연결 하나에서 들어오는 이벤트를 레지스트리/세션 연산으로 바꾸는 계층입니다.
//! 전송 계층(WebSocket)과 분리되어 있어서 채널만으로 테스트할 수 있습니다.
//!
//! 흐름:
//! ```text
//! 소켓 수신 ──▶ Connection::handle_text ──▶ Registry / RaceSession
//!                                               │ (세션이 구독자 핸들에 직접 발행)
//! 소켓 송신 ◀── mpsc::UnboundedReceiver ◀───────┘
//! ```
//!
//! - 거부된 요청은 요청한 연결에게만 `rejected`로 돌아가고,
//!   다른 참가자는 아무 변화도 보지 못합니다.
//! - 세션을 바꾼 뒤에는 다음 기상 시각(카운트다운 만료, 종료 기한)에 tokio 타이머를 겁니다.
//!   같은 시각에 대한 타이머는 하나만 생깁니다.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{
    error::RaceError,
    models::{ClientMessage, ProgressReport, RaceStatus, ServerMessage},
    race::{
        display_name, lock_session, JoinRequest, LeaveOutcome, Player, RaceSession, Registry,
        SharedSession, Subscriber,
    },
};

/// 새 연결을 만드는 진입점. 레지스트리를 소유(공유)합니다.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<Registry>,
}

impl Gateway {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// 연결을 등록하고 `welcome`을 보냅니다. 이 시점에는 어떤 레이스에도 속하지 않습니다.
    pub fn connect(&self, outbound: Subscriber) -> Connection {
        let player_id = uuid::Uuid::now_v7().to_string();
        tracing::debug!(%player_id, "client connected");
        // 수신 측이 이미 닫혔다면 곧 disconnect가 뒤따릅니다
        let _ = outbound.send(ServerMessage::Welcome {
            player_id: player_id.clone(),
        });
        Connection {
            player_id,
            registry: Arc::clone(&self.registry),
            outbound,
            membership: None,
        }
    }
}

struct Membership {
    race_id: String,
    session: SharedSession,
}

/// 연결 하나의 상태: 배정된 플레이어 ID와 현재 참가 중인 세션
///
/// 한 연결의 이벤트는 이 구조체를 통해 도착 순서대로 처리됩니다.
pub struct Connection {
    player_id: String,
    registry: Arc<Registry>,
    outbound: Subscriber,
    membership: Option<Membership>,
}

impl Connection {
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn race_id(&self) -> Option<&str> {
        self.membership.as_ref().map(|m| m.race_id.as_str())
    }

    /// 텍스트 프레임 하나를 처리합니다. JSON이 아니면 `bad_message`로 거부합니다.
    pub fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => self.handle(msg),
            Err(err) => {
                tracing::debug!(
                    player_id = %self.player_id,
                    error = %err,
                    "unparsable client message"
                );
                self.reply(ServerMessage::Rejected {
                    code: "bad_message".to_string(),
                    message: format!("could not parse message: {err}"),
                });
            }
        }
    }

    /// 클라이언트 이벤트 하나를 처리합니다.
    pub fn handle(&mut self, msg: ClientMessage) {
        let result = match msg {
            ClientMessage::Join {
                name,
                capacity,
                countdown_seconds,
            } => self.join(
                name.as_deref(),
                JoinRequest {
                    capacity,
                    countdown_seconds,
                },
            ),
            ClientMessage::Ready { ready } => self.ready(ready),
            ClientMessage::Start => self.start(),
            ClientMessage::Progress(report) => self.progress(&report),
            ClientMessage::Leave => self.leave(),
        };

        match result {
            Ok(()) => {}
            // 네트워크 재정렬로 늦게 도착한 값: 조용히 버립니다
            Err(RaceError::StaleProgress) => {
                tracing::debug!(player_id = %self.player_id, "stale progress ignored");
            }
            Err(err) => {
                tracing::debug!(
                    player_id = %self.player_id,
                    code = err.code(),
                    %err,
                    "request rejected"
                );
                self.reply(ServerMessage::rejected(&err));
            }
        }
    }

    /// 연결 종료. 참가 중인 세션에서 빠져나갑니다.
    pub fn disconnect(mut self) {
        tracing::debug!(player_id = %self.player_id, "client disconnected");
        if let Err(err) = self.leave() {
            if err != RaceError::NotInRace {
                tracing::warn!(player_id = %self.player_id, %err, "leave on disconnect failed");
            }
        }
    }

    // ── 이벤트 처리 ──

    fn join(&mut self, name: Option<&str>, request: JoinRequest) -> Result<(), RaceError> {
        if let Some(current) = &self.membership {
            let status = lock_session(&current.session).status();
            if status != RaceStatus::Finished {
                return Err(RaceError::InvalidTransition {
                    action: "join",
                    status,
                });
            }
            // 끝난 레이스에서는 먼저 분리한 뒤 새 레이스로 갑니다
            self.leave()?;
        }

        let username = display_name(name, &self.player_id);
        let player = Player::new(self.player_id.clone(), username, self.outbound.clone());
        let (race_id, session) = self.registry.join(request, player, Utc::now())?;
        arm_timer(&session, &mut lock_session(&session));
        self.membership = Some(Membership { race_id, session });
        Ok(())
    }

    fn ready(&mut self, ready: Option<bool>) -> Result<(), RaceError> {
        let player_id = self.player_id.clone();
        self.mutate(|session, now| session.set_ready(&player_id, ready, now).map(|_| ()))
    }

    fn start(&mut self) -> Result<(), RaceError> {
        let player_id = self.player_id.clone();
        self.mutate(|session, now| session.force_start(&player_id, now))
    }

    fn progress(&mut self, report: &ProgressReport) -> Result<(), RaceError> {
        let player_id = self.player_id.clone();
        self.mutate(|session, now| session.record_progress(&player_id, report, now))
    }

    fn leave(&mut self) -> Result<(), RaceError> {
        let membership = self.membership.take().ok_or(RaceError::NotInRace)?;
        let outcome = {
            let mut session = lock_session(&membership.session);
            let outcome = session.leave(&self.player_id, Utc::now())?;
            arm_timer(&membership.session, &mut session);
            (outcome, session.is_removable())
        };

        // 세션 잠금을 놓은 뒤에 레지스트리를 건드립니다 (레지스트리 → 세션 순서 유지)
        if let (LeaveOutcome::Removed, true) = outcome {
            match self.registry.remove_session(&membership.race_id) {
                Ok(()) => tracing::debug!(race_id = %membership.race_id, "empty race removed"),
                // 그 사이에 누군가 들어왔거나 이미 정리됨
                Err(err) => tracing::debug!(race_id = %membership.race_id, %err, "race kept"),
            }
        }
        Ok(())
    }

    /// 현재 세션을 잠그고 변경한 뒤 타이머를 겁니다.
    fn mutate<T>(
        &mut self,
        f: impl FnOnce(&mut RaceSession, DateTime<Utc>) -> Result<T, RaceError>,
    ) -> Result<T, RaceError> {
        let membership = self.membership.as_ref().ok_or(RaceError::NotInRace)?;
        let mut session = lock_session(&membership.session);
        let result = f(&mut session, Utc::now());
        // 거부된 요청도 내부에서 advance를 했을 수 있으므로 항상 확인합니다
        arm_timer(&membership.session, &mut session);
        result
    }

    fn reply(&self, msg: ServerMessage) {
        if self.outbound.send(msg).is_err() {
            tracing::debug!(player_id = %self.player_id, "reply dropped, connection closed");
        }
    }
}

/// 세션의 다음 기상 시각에 타이머를 겁니다. 이미 걸려 있으면 아무것도 하지 않습니다.
///
/// 호출자가 세션 잠금을 쥐고 있어야 합니다. 타이머 태스크는 잠금을 쥔 채 대기하지 않습니다.
fn arm_timer(shared: &SharedSession, session: &mut RaceSession) {
    if let Some(at) = session.claim_wakeup() {
        tracing::trace!(race_id = %session.id(), %at, "timer armed");
        tokio::spawn(run_timer(Arc::clone(shared), at));
    }
}

async fn run_timer(shared: SharedSession, mut at: DateTime<Utc>) {
    loop {
        let wait = (at - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        if Utc::now() < at {
            continue;
        }

        let next = {
            let mut session = lock_session(&shared);
            session.advance(Utc::now());
            session.claim_wakeup()
        };
        match next {
            Some(next) => at = next,
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::RegistryConfig;
    use crate::services::texts::FixedText;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Client {
        conn: Connection,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    fn gateway() -> Gateway {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = Registry::new(
            RegistryConfig::default(),
            Arc::new(FixedText("the quick brown fox".into())),
            tx,
        );
        Gateway::new(Arc::new(registry))
    }

    fn client(gateway: &Gateway) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        Client {
            conn: gateway.connect(tx),
            rx,
        }
    }

    fn join(name: &str, capacity: usize, countdown: u64) -> ClientMessage {
        ClientMessage::Join {
            name: Some(name.into()),
            capacity: Some(capacity),
            countdown_seconds: Some(countdown),
        }
    }

    fn rejection_code(messages: &[ServerMessage]) -> Option<&str> {
        messages.iter().find_map(|m| match m {
            ServerMessage::Rejected { code, .. } => Some(code.as_str()),
            _ => None,
        })
    }

    /// 두 명이 정원 2, 카운트다운 0초로 참가해 모두 준비 → 즉시 출발
    fn racing_pair(gateway: &Gateway) -> (Client, Client) {
        let mut a = client(gateway);
        let mut b = client(gateway);
        a.conn.handle(join("ada", 2, 0));
        b.conn.handle(join("bob", 2, 0));
        a.conn.handle(ClientMessage::Ready { ready: Some(true) });
        b.conn.handle(ClientMessage::Ready { ready: Some(true) });
        a.drain();
        b.drain();
        (a, b)
    }

    #[tokio::test]
    async fn welcome_is_sent_on_connect() {
        let gateway = gateway();
        let mut a = client(&gateway);
        let messages = a.drain();
        assert_eq!(
            messages,
            vec![ServerMessage::Welcome {
                player_id: a.conn.player_id().to_string()
            }]
        );
        assert!(a.conn.race_id().is_none());
    }

    #[tokio::test]
    async fn join_sends_joined_then_roster() {
        let gateway = gateway();
        let mut a = client(&gateway);
        a.drain();
        a.conn.handle(join("ada", 2, 3));

        let messages = a.drain();
        assert!(matches!(messages[0], ServerMessage::Joined { max_players: 2, .. }));
        match &messages[1] {
            ServerMessage::Roster { players, .. } => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].username, "ada");
                assert!(players[0].is_host);
            }
            other => panic!("expected roster, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejections_reach_only_the_sender() {
        let gateway = gateway();
        let (mut a, mut b) = racing_pair(&gateway);

        a.conn.handle(ClientMessage::Progress(ProgressReport::at(150.0)));
        assert_eq!(rejection_code(&a.drain()), Some("invalid_progress"));
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn commands_before_joining_are_rejected() {
        let gateway = gateway();
        let mut a = client(&gateway);
        a.drain();
        a.conn.handle(ClientMessage::Ready { ready: None });
        assert_eq!(rejection_code(&a.drain()), Some("not_in_race"));
        a.conn.handle(ClientMessage::Leave);
        assert_eq!(rejection_code(&a.drain()), Some("not_in_race"));
    }

    #[tokio::test]
    async fn bad_json_is_rejected() {
        let gateway = gateway();
        let mut a = client(&gateway);
        a.drain();
        a.conn.handle_text("{not json");
        assert_eq!(rejection_code(&a.drain()), Some("bad_message"));
        a.conn.handle_text(r#"{"type":"teleport"}"#);
        assert_eq!(rejection_code(&a.drain()), Some("bad_message"));
    }

    #[tokio::test]
    async fn progress_is_broadcast_to_others_and_stale_values_are_silent() {
        let gateway = gateway();
        let (mut a, mut b) = racing_pair(&gateway);

        a.conn.handle_text(r#"{"type":"progress","progress":40}"#);
        assert!(a.drain().is_empty());
        let seen = b.drain();
        assert!(matches!(
            seen.as_slice(),
            [ServerMessage::ProgressUpdate { progress, position: 1, .. }] if *progress == 40.0
        ));

        a.conn.handle(ClientMessage::Progress(ProgressReport::at(20.0)));
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn second_join_while_racing_is_rejected() {
        let gateway = gateway();
        let (mut a, _b) = racing_pair(&gateway);
        let race = a.conn.race_id().map(str::to_string);

        a.conn.handle(join("ada", 2, 0));
        assert_eq!(rejection_code(&a.drain()), Some("invalid_transition"));
        assert_eq!(a.conn.race_id().map(str::to_string), race);
    }

    #[tokio::test]
    async fn finished_players_can_join_a_new_race() {
        let gateway = gateway();
        let (mut a, mut b) = racing_pair(&gateway);
        let first = a.conn.race_id().map(str::to_string);

        a.conn.handle(ClientMessage::Progress(ProgressReport::at(100.0)));
        b.conn.handle(ClientMessage::Progress(ProgressReport::at(100.0)));
        let finished = a.drain();
        assert!(finished.iter().any(|m| {
            matches!(m, ServerMessage::RaceFinished { results, .. } if results.len() == 2)
        }));

        a.conn.handle(join("ada", 2, 0));
        assert!(a.drain().iter().any(|m| matches!(m, ServerMessage::Joined { .. })));
        assert_ne!(a.conn.race_id().map(str::to_string), first);
    }

    #[tokio::test]
    async fn leaving_an_empty_lobby_removes_it() {
        let gateway = gateway();
        let mut a = client(&gateway);
        a.conn.handle(join("ada", 3, 3));
        assert_eq!(gateway.registry().len(), 1);

        a.conn.handle(ClientMessage::Leave);
        assert!(a.conn.race_id().is_none());
        assert!(gateway.registry().is_empty());
    }

    #[tokio::test]
    async fn disconnect_mid_race_freezes_player() {
        let gateway = gateway();
        let (mut a, b) = racing_pair(&gateway);
        let race_id = a.conn.race_id().map(str::to_string).unwrap_or_default();

        b.conn.disconnect();
        let roster = a.drain();
        assert!(roster.iter().any(|m| matches!(
            m,
            ServerMessage::Roster { players, .. } if players.iter().any(|p| p.left)
        )));

        a.conn.handle(ClientMessage::Progress(ProgressReport::at(100.0)));
        let messages = a.drain();
        match messages.last() {
            Some(ServerMessage::RaceFinished { results, .. }) => {
                assert_eq!(results[0].position, Some(1));
                assert_eq!(results[1].position, None);
            }
            other => panic!("expected raceFinished, got {other:?}"),
        }
        let session = gateway.registry().get(&race_id).unwrap();
        assert_eq!(lock_session(&session).status(), RaceStatus::Finished);
    }

    #[tokio::test]
    async fn countdown_timer_starts_the_race() {
        let gateway = gateway();
        let mut a = client(&gateway);
        let mut b = client(&gateway);
        a.conn.handle(join("ada", 2, 1));
        b.conn.handle(join("bob", 2, 1));
        a.conn.handle(ClientMessage::Ready { ready: Some(true) });
        b.conn.handle(ClientMessage::Ready { ready: Some(true) });

        let started = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match a.rx.recv().await {
                    Some(ServerMessage::RaceStarted { start_timestamp, .. }) => {
                        break Some(start_timestamp)
                    }
                    Some(_) => continue,
                    None => break None,
                }
            }
        })
        .await
        .unwrap();
        assert!(started.is_some());
    }
}
