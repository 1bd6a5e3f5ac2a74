//! # 서비스 모듈
//!
//! 레이스 코어 바깥의 보조 기능들입니다.
//! - `scoring`: WPM/정확도/진행률 계산 (순수 함수)
//! - `texts`: 레이스 텍스트 공급자
//! - `leaderboard`: 레이스 결과 누적 집계

pub mod leaderboard;
pub mod scoring;
pub mod texts;
