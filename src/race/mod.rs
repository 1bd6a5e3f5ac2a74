//! # 레이스 코어
//!
//! 서버가 권위(authority)를 갖는 레이스 조율 로직입니다.
//! - `player`: 세션에 속한 참가자 레코드와 발신 큐 핸들
//! - `session`: 레이스 하나의 생명주기 상태 머신
//! - `registry`: 활성 세션 모음, 참가 라우팅, 정리 작업

pub mod player;
pub mod registry;
pub mod session;

pub use player::{display_name, Player, Subscriber};
pub use registry::{JoinRequest, Registry, RegistryConfig};
pub use session::{LeaveOutcome, RaceSession, RaceSettings, ResultSink};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 여러 연결 핸들러가 함께 쥐는 세션 핸들
///
/// 세션 하나에 대한 모든 변경은 이 `Mutex`로 직렬화되고,
/// 서로 다른 세션은 완전히 독립적으로 동시에 변경됩니다.
pub type SharedSession = Arc<Mutex<RaceSession>>;

/// 세션 잠금을 잡습니다.
///
/// 다른 스레드가 세션 변경 중 패닉했더라도 상태 머신은 매 연산이 끝날 때마다
/// 일관된 상태를 유지하므로 poison 표시는 무시하고 계속 사용합니다.
pub fn lock_session(session: &SharedSession) -> MutexGuard<'_, RaceSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}
