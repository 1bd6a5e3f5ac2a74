//! # 데이터 모델 모듈
//!
//! 애플리케이션에서 사용하는 데이터 구조체(struct)들을 정의합니다.
//! - `race`: 레이스 상태, 스냅샷, 결과
//! - `protocol`: WebSocket으로 주고받는 클라이언트/서버 메시지
//! - `leaderboard`: 레이스 결과를 누적한 순위표 항목
//!
//! `pub use X::*;`로 재공개하여 `crate::models::RaceResult`처럼 짧게 접근합니다.

pub mod leaderboard;
pub mod protocol;
pub mod race;

pub use leaderboard::*;
pub use protocol::*;
pub use race::*;
