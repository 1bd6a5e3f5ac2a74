//! # 레이스 세션 상태 머신
//!
//! 하나의 타이핑 레이스를 구성부터 종료까지 관리하는 집합체(aggregate)입니다.
//!
//! ## 상태 전이
//! ```text
//! waiting ──▶ countdown ──▶ racing ──▶ finished
//! ```
//! - `waiting`: 정원까지 참가를 받습니다. 2명 이상이 모두 준비되면(또는 정원 도달 정책,
//!   호스트의 강제 시작) 카운트다운으로 넘어갑니다. 혼자서는 절대 자동 출발하지 않습니다.
//! - `countdown`: 고정된 시간 동안 진행률을 받지 않습니다. 만료되는 순간이
//!   모든 WPM 계산의 기준이 되는 출발 시각입니다.
//! - `racing`: 진행률을 받습니다. 100%에 도달한 플레이어는 즉시 결과가 확정되고,
//!   전원이 완주하거나 종료 기한이 지나면 레이스가 끝납니다.
//! - `finished`: 더 이상 변경되지 않습니다.
//!
//! ## 시간
//! 모든 연산은 현재 시각(`now`)을 인자로 받습니다. 세션은 시계를 직접 읽지 않으므로
//! 테스트에서 시간을 자유롭게 조작할 수 있고, 타이머는 게이트웨이가 담당합니다.
//!
//! ## 동시성
//! 세션 자체는 잠금을 갖지 않습니다. 레지스트리가 세션마다 `Mutex`를 하나씩 두어
//! 한 세션에 대한 변경을 직렬화합니다.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;

use crate::{
    error::RaceError,
    models::{PlayerInfo, ProgressReport, RaceResult, RaceSnapshot, RaceStatus, ServerMessage},
    race::player::Player,
    services::scoring::{self, chars_for_progress, diff_typed, race_deadline, words_per_minute},
};

/// 레이스 결과를 받아가는 외부 소비자(리더보드)의 송신 핸들
pub type ResultSink = mpsc::UnboundedSender<RaceResult>;

/// 세션 생성 시 고정되는 설정값
#[derive(Debug, Clone, PartialEq)]
pub struct RaceSettings {
    pub max_players: usize,
    pub countdown_seconds: u64,
    /// 종료 기한 계산에 쓰는 최저 WPM
    pub min_wpm: f64,
    /// 종료 기한에 더하는 여유 시간
    pub deadline_grace: TimeDelta,
    /// 정원이 차면 준비 여부와 무관하게 카운트다운을 시작할지
    pub start_when_full: bool,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            max_players: 4,
            countdown_seconds: 3,
            min_wpm: 10.0,
            deadline_grace: TimeDelta::seconds(10),
            start_when_full: false,
        }
    }
}

/// 플레이어가 떠났을 때 세션에 일어난 일
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// 출발 전이라 플레이어가 세션에서 제거됨
    Removed,
    /// 레이스 도중이라 마지막 진행률로 고정됨
    Frozen,
    /// 이미 끝난 레이스에서 연결만 분리됨
    Detached,
}

// 진행률 보고 하나를 정규화한 값
struct ProgressSample {
    progress: f64,
    accuracy: f64,
    mistakes: u32,
    correct_chars: usize,
}

pub struct RaceSession {
    id: String,
    text: String,
    text_chars: usize,
    status: RaceStatus,
    /// 참가 순서 = 벡터 순서. 동률 처리와 결과 정렬에 사용됩니다
    players: Vec<Player>,
    settings: RaceSettings,
    created_at: DateTime<Utc>,
    countdown_ends_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    /// 확정된 결과 (계산된 순서 그대로)
    results: Vec<RaceResult>,
    finishers: u32,
    results_tx: ResultSink,
    armed_wakeup: Option<DateTime<Utc>>,
}

impl RaceSession {
    pub fn new(
        id: String,
        text: String,
        settings: RaceSettings,
        results_tx: ResultSink,
        now: DateTime<Utc>,
    ) -> Self {
        let text_chars = text.chars().count();
        Self {
            id,
            text,
            text_chars,
            status: RaceStatus::Waiting,
            players: Vec::new(),
            settings,
            created_at: now,
            countdown_ends_at: None,
            started_at: None,
            ends_at: None,
            finished_at: None,
            results: Vec::new(),
            finishers: 0,
            results_tx,
            armed_wakeup: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> RaceStatus {
        self.status
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.settings.max_players
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.ends_at
    }

    /// 지금까지 확정된 결과 (완주자는 순위 순, 그 뒤로 미완주자)
    pub fn results(&self) -> &[RaceResult] {
        &self.results
    }

    /// 요청한 조건으로 새 플레이어를 받을 수 있는 대기실인지
    pub fn accepts(&self, max_players: usize, countdown_seconds: u64) -> bool {
        self.status == RaceStatus::Waiting
            && !self.is_full()
            && self.settings.max_players == max_players
            && self.settings.countdown_seconds == countdown_seconds
    }

    /// 레지스트리에서 제거해도 되는지: 끝났거나, 아무도 없는 대기실
    pub fn is_removable(&self) -> bool {
        match self.status {
            RaceStatus::Finished => true,
            RaceStatus::Waiting => self.players.is_empty(),
            _ => false,
        }
    }

    /// 종료 후 보관 기간이 지났는지
    pub fn is_expired(&self, now: DateTime<Utc>, retention: TimeDelta) -> bool {
        match self.finished_at {
            Some(finished_at) => finished_at
                .checked_add_signed(retention)
                .is_some_and(|expires_at| now >= expires_at),
            None => false,
        }
    }

    /// 호스트: 아직 남아 있는 플레이어 중 가장 먼저 참가한 사람
    pub fn host_id(&self) -> Option<&str> {
        self.players
            .iter()
            .find(|p| !p.left)
            .map(|p| p.id.as_str())
    }

    // ── 플레이어 연산 ──

    /// 대기실에 플레이어를 추가합니다.
    ///
    /// 참가한 플레이어에게 `joined`를 보내고, 세션 전체에 로스터를 전파합니다.
    pub fn join(&mut self, player: Player, now: DateTime<Utc>) -> Result<(), RaceError> {
        self.require(RaceStatus::Waiting, "join")?;
        if self.is_full() {
            return Err(RaceError::CapacityExceeded);
        }

        tracing::info!(
            race_id = %self.id,
            player_id = %player.id,
            username = %player.username,
            "player joined race"
        );
        player.send(ServerMessage::Joined {
            race_id: self.id.clone(),
            player_id: player.id.clone(),
            text: self.text.clone(),
            status: self.status,
            max_players: self.settings.max_players,
            countdown_seconds: self.settings.countdown_seconds,
        });
        self.players.push(player);

        if self.players.len() > self.settings.max_players {
            tracing::error!(
                race_id = %self.id,
                players = self.players.len(),
                capacity = self.settings.max_players,
                "race over capacity"
            );
        }

        self.broadcast_roster();
        self.maybe_begin_countdown(now);
        Ok(())
    }

    /// 준비 상태를 바꿉니다. `ready`가 `None`이면 현재 값을 뒤집습니다.
    ///
    /// 최종 준비 상태를 반환합니다.
    pub fn set_ready(
        &mut self,
        player_id: &str,
        ready: Option<bool>,
        now: DateTime<Utc>,
    ) -> Result<bool, RaceError> {
        self.require(RaceStatus::Waiting, "change readiness")?;
        let index = self.index_of(player_id).ok_or(RaceError::UnknownPlayer)?;

        let player = &mut self.players[index];
        let value = ready.unwrap_or(!player.ready);
        let changed = player.ready != value;
        player.ready = value;

        if changed {
            self.broadcast_roster();
            self.maybe_begin_countdown(now);
        }
        Ok(value)
    }

    /// 호스트의 강제 시작. 혼자 있는 대기실도 이 경로로만 출발합니다.
    pub fn force_start(&mut self, player_id: &str, now: DateTime<Utc>) -> Result<(), RaceError> {
        self.require(RaceStatus::Waiting, "start")?;
        if self.index_of(player_id).is_none() {
            return Err(RaceError::UnknownPlayer);
        }
        if self.host_id() != Some(player_id) {
            return Err(RaceError::NotHost);
        }
        self.begin_countdown(now, "host override");
        Ok(())
    }

    /// 진행률 보고를 반영합니다.
    ///
    /// - 이전 값보다 작은 진행률은 `StaleProgress`로 거부됩니다 (호출자가 조용히 무시)
    /// - 같은 값의 재전송은 아무것도 바꾸지 않습니다
    /// - 100%에 도달하면 그 자리에서 결과가 확정됩니다
    pub fn record_progress(
        &mut self,
        player_id: &str,
        report: &ProgressReport,
        now: DateTime<Utc>,
    ) -> Result<(), RaceError> {
        // 기한이 지난 보고가 늦게 도착했다면 먼저 레이스를 끝냅니다
        self.advance(now);
        self.require(RaceStatus::Racing, "report progress")?;
        let Some(started_at) = self.started_at else {
            return Err(self.invalid("report progress"));
        };

        let index = self.index_of(player_id).ok_or(RaceError::UnknownPlayer)?;
        if self.players[index].left {
            return Err(RaceError::UnknownPlayer);
        }

        let sample = self.sample(index, report)?;
        let player = &mut self.players[index];
        if sample.progress < player.progress {
            return Err(RaceError::StaleProgress);
        }
        if sample.progress == player.progress {
            return Ok(());
        }

        player.progress = sample.progress;
        player.accuracy = sample.accuracy;
        player.mistakes = sample.mistakes;
        player.wpm = words_per_minute(sample.correct_chars, now - started_at);
        let (wpm, accuracy) = (player.wpm, player.accuracy);
        tracing::trace!(
            race_id = %self.id,
            player_id,
            progress = sample.progress,
            wpm,
            reported_wpm = ?report.wpm,
            "progress recorded"
        );

        let update = ServerMessage::ProgressUpdate {
            race_id: self.id.clone(),
            player_id: player_id.to_string(),
            progress: sample.progress,
            wpm,
            accuracy,
            position: self.position_of(index),
        };
        self.broadcast_except(player_id, update);

        if sample.progress >= 100.0 {
            self.finish_player(index, now);
        }
        self.advance(now);
        Ok(())
    }

    /// 플레이어가 나가거나 연결이 끊겼을 때 호출됩니다.
    pub fn leave(
        &mut self,
        player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LeaveOutcome, RaceError> {
        self.advance(now);
        let index = self.index_of(player_id).ok_or(RaceError::UnknownPlayer)?;

        match self.status {
            RaceStatus::Waiting | RaceStatus::Countdown => {
                let player = self.players.remove(index);
                tracing::info!(
                    race_id = %self.id,
                    player_id = %player.id,
                    "player left before start"
                );
                self.broadcast_roster();
                self.maybe_begin_countdown(now);
                Ok(LeaveOutcome::Removed)
            }
            RaceStatus::Racing => {
                let player = &mut self.players[index];
                if !player.left {
                    player.left = true;
                    tracing::info!(
                        race_id = %self.id,
                        player_id,
                        progress = player.progress,
                        "player left mid-race, progress frozen"
                    );
                    self.broadcast_roster();
                    self.advance(now);
                }
                Ok(LeaveOutcome::Frozen)
            }
            RaceStatus::Finished => {
                self.players[index].left = true;
                Ok(LeaveOutcome::Detached)
            }
        }
    }

    // ── 시간 기반 전이 ──

    /// 지금 시각 기준으로 만료된 전이를 모두 적용합니다.
    ///
    /// 여러 번 호출해도 안전합니다(idempotent). 타이머가 늦게 깨어나더라도
    /// 카운트다운 만료 → 레이스 종료가 순서대로 모두 적용됩니다.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        if self.status == RaceStatus::Countdown {
            if let Some(starts_at) = self.countdown_ends_at {
                if now >= starts_at {
                    self.start_racing(starts_at);
                }
            }
        }

        if self.status == RaceStatus::Racing {
            if let Some(ends_at) = self.ends_at {
                if now >= ends_at {
                    tracing::info!(race_id = %self.id, "race deadline elapsed");
                    self.finish_race(ends_at);
                    return;
                }
            }
            if !self.players.iter().any(Player::is_running) {
                self.finish_race(now);
            }
        }
    }

    /// 다음으로 깨어나야 할 시각 (카운트다운 만료 또는 레이스 종료 기한)
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        match self.status {
            RaceStatus::Countdown => self.countdown_ends_at,
            RaceStatus::Racing => self.ends_at,
            _ => None,
        }
    }

    /// 아직 타이머가 걸리지 않은 다음 기상 시각을 가져갑니다.
    ///
    /// 같은 시각에 대해 한 번만 `Some`을 반환하므로 타이머가 중복으로 생기지 않습니다.
    pub fn claim_wakeup(&mut self) -> Option<DateTime<Utc>> {
        let next = self.next_wakeup()?;
        if self.armed_wakeup == Some(next) {
            return None;
        }
        self.armed_wakeup = Some(next);
        Some(next)
    }

    /// 서버 종료 시 세션을 정리합니다.
    ///
    /// 진행 중인 레이스는 강제로 끝내 미완주 결과까지 내보낸 뒤,
    /// 모든 플레이어에게 종료를 알립니다.
    pub fn shutdown(&mut self, now: DateTime<Utc>) {
        if self.status == RaceStatus::Racing {
            self.finish_race(now);
        }
        self.broadcast(ServerMessage::ServerShutdown);
    }

    // ── 조회 ──

    pub fn roster(&self) -> Vec<PlayerInfo> {
        let host = self.host_id();
        self.players
            .iter()
            .map(|p| p.info(host == Some(p.id.as_str())))
            .collect()
    }

    pub fn snapshot(&self) -> RaceSnapshot {
        RaceSnapshot {
            id: self.id.clone(),
            status: self.status,
            text_length: self.text_chars,
            players: self.roster(),
            max_players: self.settings.max_players,
            countdown_seconds: self.settings.countdown_seconds,
            created_at: self.created_at,
            countdown_ends_at: self.countdown_ends_at,
            started_at: self.started_at,
            ends_at: self.ends_at,
            finished_at: self.finished_at,
        }
    }

    // ── 내부 구현 ──

    fn require(&self, status: RaceStatus, action: &'static str) -> Result<(), RaceError> {
        if self.status == status {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> RaceError {
        RaceError::InvalidTransition {
            action,
            status: self.status,
        }
    }

    fn index_of(&self, player_id: &str) -> Option<usize> {
        self.players.iter().position(|p| p.id == player_id)
    }

    fn transition(&mut self, to: RaceStatus) {
        debug_assert_eq!(self.status.next(), Some(to), "race states only move forward");
        tracing::debug!(race_id = %self.id, from = %self.status, to = %to, "race transition");
        self.status = to;
    }

    fn maybe_begin_countdown(&mut self, now: DateTime<Utc>) {
        if self.status != RaceStatus::Waiting || self.players.len() < 2 {
            return;
        }
        if self.players.iter().all(|p| p.ready) {
            self.begin_countdown(now, "all players ready");
        } else if self.settings.start_when_full && self.is_full() {
            self.begin_countdown(now, "race is full");
        }
    }

    fn begin_countdown(&mut self, now: DateTime<Utc>, reason: &str) {
        self.transition(RaceStatus::Countdown);
        let duration = self.settings.countdown_seconds;
        let starts_at = i64::try_from(duration)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.countdown_ends_at = Some(starts_at);
        tracing::info!(race_id = %self.id, reason, %starts_at, "countdown started");

        self.broadcast(ServerMessage::CountdownStarted {
            race_id: self.id.clone(),
            starts_at,
            duration_seconds: duration,
        });
        // 0초 카운트다운은 같은 변경 안에서 바로 출발합니다
        self.advance(now);
    }

    fn start_racing(&mut self, at: DateTime<Utc>) {
        let deadline = race_deadline(
            self.text_chars,
            self.settings.min_wpm,
            self.settings.deadline_grace,
        );
        let ends_at = at.checked_add_signed(deadline).unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.transition(RaceStatus::Racing);
        self.started_at = Some(at);
        self.ends_at = Some(ends_at);
        tracing::info!(
            race_id = %self.id,
            players = self.players.len(),
            %ends_at,
            "race started"
        );

        self.broadcast(ServerMessage::RaceStarted {
            race_id: self.id.clone(),
            start_timestamp: at,
            text: self.text.clone(),
            ends_at,
        });
    }

    fn sample(&self, index: usize, report: &ProgressReport) -> Result<ProgressSample, RaceError> {
        let player = &self.players[index];

        if let Some(typed) = &report.typed {
            let diff = diff_typed(typed, &self.text);
            let mistakes = report
                .mistakes
                .unwrap_or(diff.incorrect_chars as u32)
                .max(player.mistakes);
            return Ok(ProgressSample {
                progress: diff.progress(),
                accuracy: diff.accuracy(),
                mistakes,
                correct_chars: diff.correct_chars,
            });
        }

        let progress = report.progress;
        if !progress.is_finite() || !(0.0..=100.0).contains(&progress) {
            return Err(RaceError::InvalidProgress);
        }
        let accuracy = report
            .accuracy
            .filter(|a| a.is_finite())
            .map(|a| scoring::round1(a.clamp(0.0, 100.0)))
            .unwrap_or(player.accuracy);

        Ok(ProgressSample {
            progress,
            accuracy,
            mistakes: report.mistakes.unwrap_or(0).max(player.mistakes),
            correct_chars: chars_for_progress(progress, self.text_chars),
        })
    }

    fn rank_of(&self, player_id: &str) -> Option<u32> {
        self.results
            .iter()
            .find(|r| r.player_id == player_id)
            .and_then(|r| r.position)
    }

    /// 현재 순위: 완주자(순위 순) → 진행률 높은 순 → 먼저 참가한 순
    fn position_of(&self, index: usize) -> usize {
        let me = &self.players[index];
        let my_rank = self.rank_of(&me.id);

        let ahead = self
            .players
            .iter()
            .enumerate()
            .filter(|(i, other)| {
                if *i == index {
                    return false;
                }
                match (self.rank_of(&other.id), my_rank) {
                    (Some(theirs), Some(mine)) => theirs < mine,
                    (Some(_), None) => true,
                    (None, Some(_)) => false,
                    (None, None) => {
                        other.progress > me.progress
                            || (other.progress == me.progress && *i < index)
                    }
                }
            })
            .count();
        ahead + 1
    }

    fn finish_player(&mut self, index: usize, now: DateTime<Utc>) {
        let started_at = self.started_at.unwrap_or(now);
        self.finishers += 1;
        let position = self.finishers;

        let player = &mut self.players[index];
        player.finished_at = Some(now);
        let result = RaceResult {
            race_id: self.id.clone(),
            player_id: player.id.clone(),
            username: player.username.clone(),
            wpm: player.wpm,
            accuracy: player.accuracy,
            position: Some(position),
            progress: player.progress,
            time_ms: (now - started_at).num_milliseconds(),
            mistakes: player.mistakes,
            finished_at: now,
        };
        tracing::info!(
            race_id = %self.id,
            player_id = %result.player_id,
            position,
            wpm = result.wpm,
            "player finished"
        );

        self.emit(result.clone());
        self.broadcast(ServerMessage::PlayerFinished { result });
    }

    fn finish_race(&mut self, at: DateTime<Utc>) {
        let started_at = self.started_at.unwrap_or(at);
        let elapsed = at - started_at;

        let mut unfinished: Vec<RaceResult> = self
            .players
            .iter()
            .filter(|p| !p.is_finished())
            .map(|p| RaceResult {
                race_id: self.id.clone(),
                player_id: p.id.clone(),
                username: p.username.clone(),
                wpm: words_per_minute(chars_for_progress(p.progress, self.text_chars), elapsed),
                accuracy: p.accuracy,
                position: None,
                progress: p.progress,
                time_ms: elapsed.num_milliseconds(),
                mistakes: p.mistakes,
                finished_at: at,
            })
            .collect();
        // 안정 정렬이므로 진행률이 같으면 참가 순서가 유지됩니다
        unfinished.sort_by(|a, b| b.progress.total_cmp(&a.progress));
        for result in unfinished {
            self.emit(result);
        }

        self.transition(RaceStatus::Finished);
        self.finished_at = Some(at);
        tracing::info!(
            race_id = %self.id,
            finishers = self.finishers,
            results = self.results.len(),
            "race finished"
        );

        self.broadcast(ServerMessage::RaceFinished {
            race_id: self.id.clone(),
            results: self.results.clone(),
        });
    }

    /// 결과를 정확히 한 번 기록하고 외부 소비자에게 내보냅니다.
    fn emit(&mut self, result: RaceResult) {
        if self.results.iter().any(|r| r.player_id == result.player_id) {
            tracing::error!(
                race_id = %self.id,
                player_id = %result.player_id,
                "result already emitted for player"
            );
            return;
        }
        if self.results_tx.send(result.clone()).is_err() {
            tracing::warn!(race_id = %self.id, "result consumer is gone");
        }
        self.results.push(result);
    }

    fn broadcast(&self, msg: ServerMessage) {
        for player in &self.players {
            player.send(msg.clone());
        }
    }

    fn broadcast_except(&self, player_id: &str, msg: ServerMessage) {
        for player in self.players.iter().filter(|p| p.id != player_id) {
            player.send(msg.clone());
        }
    }

    fn broadcast_roster(&self) {
        self.broadcast(ServerMessage::Roster {
            race_id: self.id.clone(),
            status: self.status,
            players: self.roster(),
        });
    }
}
