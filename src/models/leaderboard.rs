use serde::{Deserialize, Serialize};

/// 여러 레이스에 걸친 플레이어 누적 기록
///
/// 인증이 없으므로 연결이 바뀌어도 유지되는 식별자는 표시 이름뿐입니다.
/// `player_id`에는 가장 최근 레이스의 플레이어 ID가 들어갑니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub player_id: String,
    pub username: String,
    pub best_wpm: f64,
    pub average_wpm: f64,
    pub average_accuracy: f64,
    pub races_completed: u32,
    pub races_won: u32,
    pub races_entered: u32,
}
