//! # 리더보드 집계 서비스
//!
//! 레이스 세션이 내보내는 `RaceResult` 스트림을 받아 플레이어별 누적 기록을 만듭니다.
//! 세션의 의무는 결과를 정확히 한 번, 계산된 순서대로 내보내는 것까지이고,
//! 집계는 이 모듈이 채널 반대편에서 따로 수행합니다.
//!
//! 저장소 없이 메모리에만 유지되므로 서버를 재시작하면 초기화됩니다.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::models::{LeaderboardEntry, RaceResult};
use crate::services::scoring::round1;

#[derive(Debug, Default)]
struct Aggregate {
    player_id: String,
    username: String,
    best_wpm: f64,
    wpm_sum: f64,
    accuracy_sum: f64,
    races_completed: u32,
    races_won: u32,
    races_entered: u32,
}

/// 표시 이름을 키로 하는 메모리 내 순위표
#[derive(Default)]
pub struct Leaderboard {
    entries: RwLock<HashMap<String, Aggregate>>,
}

impl Leaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 결과 하나를 누적합니다.
    ///
    /// 완주하지 못한 결과는 참가 횟수만 올리고 평균에는 반영하지 않습니다.
    pub async fn record(&self, result: &RaceResult) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(result.username.clone()).or_default();

        entry.player_id = result.player_id.clone();
        entry.username = result.username.clone();
        entry.races_entered += 1;

        if let Some(position) = result.position {
            entry.races_completed += 1;
            entry.wpm_sum += result.wpm;
            entry.accuracy_sum += result.accuracy;
            entry.best_wpm = entry.best_wpm.max(result.wpm);
            if position == 1 {
                entry.races_won += 1;
            }
        }
    }

    /// 최고 WPM 순으로 정렬한 상위 `limit`개 항목
    ///
    /// 동률이면 우승 횟수, 그다음 이름 순입니다.
    pub async fn top(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let entries = self.entries.read().await;
        let mut rows: Vec<&Aggregate> = entries.values().collect();
        rows.sort_by(|a, b| {
            b.best_wpm
                .total_cmp(&a.best_wpm)
                .then(b.races_won.cmp(&a.races_won))
                .then_with(|| a.username.cmp(&b.username))
        });

        rows.into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, agg)| {
                let completed = f64::from(agg.races_completed.max(1));
                LeaderboardEntry {
                    rank: i + 1,
                    player_id: agg.player_id.clone(),
                    username: agg.username.clone(),
                    best_wpm: agg.best_wpm,
                    average_wpm: round1(agg.wpm_sum / completed),
                    average_accuracy: round1(agg.accuracy_sum / completed),
                    races_completed: agg.races_completed,
                    races_won: agg.races_won,
                    races_entered: agg.races_entered,
                }
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// 결과 채널을 끝까지 읽어 리더보드에 반영합니다.
///
/// 모든 송신 핸들(레지스트리와 세션들)이 사라지면 종료됩니다.
pub async fn consume_results(mut rx: mpsc::UnboundedReceiver<RaceResult>, board: Arc<Leaderboard>) {
    while let Some(result) = rx.recv().await {
        tracing::debug!(
            race_id = %result.race_id,
            username = %result.username,
            position = ?result.position,
            wpm = result.wpm,
            "recording race result"
        );
        board.record(&result).await;
    }
    tracing::info!("result stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(username: &str, wpm: f64, accuracy: f64, position: Option<u32>) -> RaceResult {
        RaceResult {
            race_id: "r".into(),
            player_id: format!("{username}-id"),
            username: username.into(),
            wpm,
            accuracy,
            position,
            progress: if position.is_some() { 100.0 } else { 40.0 },
            time_ms: 30_000,
            mistakes: 0,
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn aggregates_best_and_averages() {
        let board = Leaderboard::new();
        board.record(&result("ada", 60.0, 95.0, Some(1))).await;
        board.record(&result("ada", 80.0, 100.0, Some(2))).await;
        board.record(&result("ada", 10.0, 50.0, None)).await;
        board.record(&result("bob", 70.0, 90.0, Some(1))).await;

        let top = board.top(10).await;
        assert_eq!(top.len(), 2);
        let ada = &top[0];
        assert_eq!(ada.username, "ada");
        assert_eq!(ada.rank, 1);
        assert_eq!(ada.best_wpm, 80.0);
        assert_eq!(ada.average_wpm, 70.0);
        assert_eq!(ada.average_accuracy, 97.5);
        assert_eq!(ada.races_completed, 2);
        assert_eq!(ada.races_won, 1);
        assert_eq!(ada.races_entered, 3);
        assert_eq!(top[1].username, "bob");
    }

    #[tokio::test]
    async fn limit_truncates() {
        let board = Leaderboard::new();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            board.record(&result(name, 50.0 + i as f64, 100.0, Some(1))).await;
        }
        let top = board.top(2).await;
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].username, "c");
    }

    #[tokio::test]
    async fn consumer_drains_channel() {
        let board = Arc::new(Leaderboard::new());
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(result("ada", 42.0, 99.0, Some(1))).unwrap();
        drop(tx);
        consume_results(rx, Arc::clone(&board)).await;
        assert_eq!(board.len().await, 1);
    }
}
