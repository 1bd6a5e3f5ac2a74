//! # 레이스 레지스트리
//!
//! 프로세스 전체에서 활성 레이스 세션을 모아두는 컨테이너입니다.
//! 참가 요청을 알맞은 대기실로 보내고, 끝났거나 버려진 세션을 정리합니다.
//!
//! ## 잠금 규칙
//! - 세션 목록(`BTreeMap`)은 세션 간에 공유되는 유일한 구조이며, 하나의 `Mutex`로 보호됩니다.
//! - 각 세션은 자기만의 `Mutex`를 가집니다.
//! - 두 잠금을 함께 잡을 때는 항상 **레지스트리 → 세션** 순서입니다.
//!   세션 잠금을 쥔 채로 레지스트리 잠금을 잡는 코드는 없으므로 교착 상태가 생기지 않습니다.
//!
//! 참가 처리는 레지스트리 잠금 안에서 "빈자리 확인 → 플레이어 추가"를 한 번에 수행합니다
//! (compare-and-commit). 동시에 여러 참가 요청이 와도 정원을 초과해서 받지 않습니다.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    error::RaceError,
    models::{RaceSnapshot, RaceStatus},
    race::{
        lock_session,
        player::Player,
        session::{RaceSession, RaceSettings, ResultSink},
        SharedSession,
    },
    services::texts::TextSource,
};

/// 레지스트리 동작 설정
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// 클라이언트가 값을 지정하지 않았을 때 쓰는 세션 설정
    pub defaults: RaceSettings,
    pub max_capacity: usize,
    pub max_countdown_seconds: u64,
    /// 종료된 세션(또는 빈 대기실)을 보관하는 기간
    pub retention: TimeDelta,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            defaults: RaceSettings::default(),
            max_capacity: 10,
            max_countdown_seconds: 30,
            retention: TimeDelta::seconds(60),
        }
    }
}

/// `join` 이벤트에서 넘어온 세션 조건
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinRequest {
    pub capacity: Option<usize>,
    pub countdown_seconds: Option<u64>,
}

pub struct Registry {
    sessions: Mutex<BTreeMap<String, SharedSession>>,
    texts: Arc<dyn TextSource>,
    results_tx: ResultSink,
    config: RegistryConfig,
}

impl Registry {
    pub fn new(config: RegistryConfig, texts: Arc<dyn TextSource>, results_tx: ResultSink) -> Self {
        Self {
            sessions: Mutex::new(BTreeMap::new()),
            texts,
            results_tx,
            config,
        }
    }

    /// 요청값을 허용 범위로 잘라 세션 설정을 만듭니다.
    pub fn settings_for(&self, request: JoinRequest) -> RaceSettings {
        let defaults = &self.config.defaults;
        RaceSettings {
            max_players: request
                .capacity
                .unwrap_or(defaults.max_players)
                .clamp(1, self.config.max_capacity.max(1)),
            countdown_seconds: request
                .countdown_seconds
                .unwrap_or(defaults.countdown_seconds)
                .min(self.config.max_countdown_seconds),
            ..defaults.clone()
        }
    }

    /// 참가 가능한 대기실을 찾아 플레이어를 넣고, 없으면 새 세션을 만들어 넣습니다.
    ///
    /// 가장 먼저 만들어진(ID가 가장 작은) 대기실부터 채웁니다.
    /// UUIDv7은 시간 순으로 정렬되므로 `BTreeMap` 순서가 곧 생성 순서입니다.
    pub fn join(
        &self,
        request: JoinRequest,
        player: Player,
        now: DateTime<Utc>,
    ) -> Result<(String, SharedSession), RaceError> {
        let settings = self.settings_for(request);
        let mut sessions = self.lock_map();

        for (id, shared) in sessions.iter() {
            let mut session = lock_session(shared);
            if session.accepts(settings.max_players, settings.countdown_seconds) {
                session.join(player, now)?;
                return Ok((id.clone(), Arc::clone(shared)));
            }
        }

        let (id, mut session) = self.new_session(settings, now);
        session.join(player, now)?;
        let shared = Arc::new(Mutex::new(session));
        sessions.insert(id.clone(), Arc::clone(&shared));
        tracing::info!(race_id = %id, sessions = sessions.len(), "created race for join");
        Ok((id, shared))
    }

    /// 빈 대기실을 명시적으로 만듭니다.
    pub fn create_race(&self, request: JoinRequest, now: DateTime<Utc>) -> (String, SharedSession) {
        let settings = self.settings_for(request);
        let (id, session) = self.new_session(settings, now);
        let shared = Arc::new(Mutex::new(session));
        self.lock_map().insert(id.clone(), Arc::clone(&shared));
        tracing::info!(race_id = %id, "created race");
        (id, shared)
    }

    pub fn get(&self, id: &str) -> Result<SharedSession, RaceError> {
        self.lock_map()
            .get(id)
            .cloned()
            .ok_or(RaceError::UnknownSession)
    }

    /// 세션을 제거합니다. 끝난 세션이나 빈 대기실만 제거할 수 있습니다.
    pub fn remove_session(&self, id: &str) -> Result<(), RaceError> {
        let mut sessions = self.lock_map();
        let shared = sessions.get(id).ok_or(RaceError::UnknownSession)?;
        if !lock_session(shared).is_removable() {
            return Err(RaceError::SessionNotRemovable);
        }
        sessions.remove(id);
        tracing::debug!(race_id = %id, "race removed");
        Ok(())
    }

    /// 주기적 정리 작업
    ///
    /// - 만료된 타이머를 대신 적용합니다 (놓친 기상 시각에 대한 안전망)
    /// - 보관 기간이 지난 종료 세션을 제거합니다
    /// - 보관 기간 동안 아무도 없는 대기실을 제거합니다
    ///
    /// 제거한 세션 수를 반환합니다.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let retention = self.config.retention;
        let mut sessions = self.lock_map();
        let before = sessions.len();

        sessions.retain(|id, shared| {
            let mut session = lock_session(shared);
            session.advance(now);
            let abandoned = session.status() == RaceStatus::Waiting
                && session.player_count() == 0
                && session
                    .created_at()
                    .checked_add_signed(retention)
                    .is_some_and(|expires_at| now >= expires_at);
            let keep = !(session.is_expired(now, retention) || abandoned);
            if !keep {
                tracing::debug!(race_id = %id, status = %session.status(), "sweeping race");
            }
            keep
        });

        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, remaining = sessions.len(), "swept races");
        }
        removed
    }

    /// 종료 처리: 모든 세션을 정리하고 레지스트리를 비웁니다.
    ///
    /// 진행 중인 레이스는 강제로 끝나 미완주 결과까지 결과 소비자에게 전달됩니다.
    pub fn drain(&self, now: DateTime<Utc>) -> usize {
        let sessions = std::mem::take(&mut *self.lock_map());
        for shared in sessions.values() {
            lock_session(shared).shutdown(now);
        }
        tracing::info!(drained = sessions.len(), "registry drained");
        sessions.len()
    }

    /// 모든 세션의 스냅샷 (생성 순)
    pub fn snapshots(&self) -> Vec<RaceSnapshot> {
        self.lock_map()
            .values()
            .map(|shared| lock_session(shared).snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_map().is_empty()
    }

    fn new_session(&self, settings: RaceSettings, now: DateTime<Utc>) -> (String, RaceSession) {
        let id = uuid::Uuid::now_v7().to_string();
        let text = self.texts.next_text();
        let session = RaceSession::new(id.clone(), text, settings, self.results_tx.clone(), now);
        (id, session)
    }

    fn lock_map(&self) -> MutexGuard<'_, BTreeMap<String, SharedSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::texts::FixedText;
    use tokio::sync::mpsc;

    fn registry(retention_secs: i64) -> Registry {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = RegistryConfig {
            retention: TimeDelta::seconds(retention_secs),
            ..RegistryConfig::default()
        };
        Registry::new(config, Arc::new(FixedText("hello world".into())), tx)
    }

    fn player(id: &str) -> Player {
        let (tx, _rx) = mpsc::unbounded_channel();
        Player::new(id.into(), id.into(), tx)
    }

    fn request(capacity: usize) -> JoinRequest {
        JoinRequest {
            capacity: Some(capacity),
            countdown_seconds: Some(0),
        }
    }

    #[test]
    fn joins_fill_existing_race_before_creating() {
        let registry = registry(60);
        let now = Utc::now();
        let (first, _) = registry.join(request(2), player("a"), now).unwrap();
        let (second, _) = registry.join(request(2), player("b"), now).unwrap();
        let (third, _) = registry.join(request(2), player("c"), now).unwrap();

        assert_eq!(first, second);
        assert_ne!(first, third);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn joins_are_routed_by_settings() {
        let registry = registry(60);
        let now = Utc::now();
        let (two, _) = registry.join(request(2), player("a"), now).unwrap();
        let (four, _) = registry.join(request(4), player("b"), now).unwrap();
        assert_ne!(two, four);
    }

    #[test]
    fn requests_are_clamped() {
        let registry = registry(60);
        let settings = registry.settings_for(JoinRequest {
            capacity: Some(500),
            countdown_seconds: Some(999),
        });
        assert_eq!(settings.max_players, 10);
        assert_eq!(settings.countdown_seconds, 30);

        let settings = registry.settings_for(JoinRequest {
            capacity: Some(0),
            countdown_seconds: None,
        });
        assert_eq!(settings.max_players, 1);
        assert_eq!(settings.countdown_seconds, 3);
    }

    #[test]
    fn started_race_is_not_joinable() {
        let registry = registry(60);
        let now = Utc::now();
        let (id, shared) = registry.join(request(3), player("a"), now).unwrap();
        lock_session(&shared).force_start("a", now).unwrap();

        let (other, _) = registry.join(request(3), player("b"), now).unwrap();
        assert_ne!(id, other);
    }

    #[test]
    fn active_race_cannot_be_removed() {
        let registry = registry(60);
        let now = Utc::now();
        let (id, shared) = registry.join(request(2), player("a"), now).unwrap();
        assert_eq!(registry.remove_session(&id), Err(RaceError::SessionNotRemovable));

        lock_session(&shared).leave("a", now).unwrap();
        assert_eq!(registry.remove_session(&id), Ok(()));
        assert_eq!(registry.remove_session(&id), Err(RaceError::UnknownSession));
        assert!(matches!(registry.get(&id), Err(RaceError::UnknownSession)));
    }

    #[test]
    fn sweep_reclaims_finished_and_abandoned_races() {
        let registry = registry(30);
        let now = Utc::now();

        let (finished, shared) = registry.join(request(1), player("a"), now).unwrap();
        {
            let mut session = lock_session(&shared);
            session.force_start("a", now).unwrap();
            session
                .record_progress("a", &crate::models::ProgressReport::at(100.0), now)
                .unwrap();
            assert_eq!(session.status(), RaceStatus::Finished);
        }
        let (empty, _) = registry.create_race(JoinRequest::default(), now);
        let (busy, _) = registry.join(request(3), player("b"), now).unwrap();

        assert_eq!(registry.sweep(now + TimeDelta::seconds(10)), 0);
        assert_eq!(registry.sweep(now + TimeDelta::seconds(31)), 2);
        assert!(registry.get(&finished).is_err());
        assert!(registry.get(&empty).is_err());
        assert!(registry.get(&busy).is_ok());
    }

    #[test]
    fn sweep_advances_overdue_timers() {
        let registry = registry(30);
        let now = Utc::now();
        let request = JoinRequest {
            capacity: Some(2),
            countdown_seconds: Some(5),
        };
        let (id, shared) = registry.join(request, player("a"), now).unwrap();
        registry.join(request, player("b"), now).unwrap();
        {
            let mut session = lock_session(&shared);
            session.set_ready("a", Some(true), now).unwrap();
            session.set_ready("b", Some(true), now).unwrap();
            assert_eq!(session.status(), RaceStatus::Countdown);
        }

        // 타이머가 울리지 않았어도 정리 작업이 카운트다운을 끝냅니다
        assert_eq!(registry.sweep(now + TimeDelta::seconds(6)), 0);
        let ends_at = {
            let session = lock_session(&shared);
            assert_eq!(session.status(), RaceStatus::Racing);
            assert_eq!(session.started_at(), Some(now + TimeDelta::seconds(5)));
            session.ends_at().unwrap()
        };

        // 종료 기한도 마찬가지로 정리 작업에서 처리되고, 보관 기간이 지나면 제거됩니다
        assert_eq!(registry.sweep(ends_at), 0);
        assert_eq!(lock_session(&shared).status(), RaceStatus::Finished);
        assert_eq!(registry.sweep(ends_at + TimeDelta::seconds(30)), 1);
        assert!(registry.get(&id).is_err());
    }

    #[test]
    fn drain_empties_registry() {
        let registry = registry(60);
        let now = Utc::now();
        registry.join(request(2), player("a"), now).unwrap();
        registry.create_race(JoinRequest::default(), now);
        assert_eq!(registry.drain(now), 2);
        assert!(registry.is_empty());
    }
}
