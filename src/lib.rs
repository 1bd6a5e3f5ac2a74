//! # TypeForge 레이스 서버 라이브러리
//!
//! 멀티플레이어 타이핑 레이스를 조율하는 서버 측 코어입니다.
//! 바이너리(`main.rs`)와 통합 테스트(`tests/`)가 모두 이 라이브러리를 사용합니다.
//!
//! 모듈 구성 (의존 순서, 잎(leaf)부터):
//! - `services`: 순수 계산(WPM/정확도), 레이스 텍스트 공급, 리더보드 집계
//! - `race`: 플레이어 상태, 레이스 세션 상태 머신, 세션 레지스트리
//! - `gateway`: 실시간 연결 이벤트를 세션 명령으로 변환하고 결과를 전파
//! - `routes`: HTTP/WebSocket 핸들러
//! - `models`: 와이어 프로토콜과 응답용 데이터 구조체
//! - `config`, `error`: 설정과 에러 타입

pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod race;
pub mod routes;
pub mod services;
