//! # 애플리케이션 설정(Configuration) 모듈
//!
//! 환경변수에서 서버 설정값을 읽어오는 모듈입니다.
//! `.env` 파일이나 시스템 환경변수에서 값을 가져옵니다.
//!
//! 설정 항목 (괄호 안은 기본값):
//! - `HOST` (0.0.0.0), `PORT` (8000): 서버 바인딩 주소
//! - `FRONTEND_URL` (`*`): CORS 허용 출처. `*`이면 모든 출처 허용
//! - `RACE_DEFAULT_CAPACITY` (4), `RACE_MAX_CAPACITY` (10): 레이스 정원
//! - `RACE_COUNTDOWN_SECONDS` (3), `RACE_MAX_COUNTDOWN_SECONDS` (30): 카운트다운 길이
//! - `RACE_MIN_WPM` (10): 종료 기한 계산에 쓰는 최저 WPM
//! - `RACE_DEADLINE_GRACE_SECONDS` (10): 종료 기한에 더하는 여유 시간
//! - `RACE_RETENTION_SECONDS` (60): 끝난 레이스 보관 기간
//! - `RACE_SWEEP_INTERVAL_SECONDS` (5): 정리 작업 주기
//! - `RACE_START_WHEN_FULL` (false): 정원이 차면 준비 여부와 무관하게 출발
//!
//! `RACE_MIN_WPM`은 1 이상, 초 단위 값은 모두 하루(`MAX_DURATION_SECONDS`) 이하여야 합니다.

use chrono::TimeDelta;
use std::env;
use std::str::FromStr;

use crate::error::AppError;
use crate::race::{RaceSettings, RegistryConfig};

/// 시간 관련 설정값의 상한 (하루)
pub const MAX_DURATION_SECONDS: i64 = 86_400;

/// 애플리케이션 전체 설정을 담는 구조체
///
/// 서버 시작 시 환경변수에서 한 번 읽어온 후,
/// 애플리케이션 전체에서 공유됩니다.
#[derive(Debug, Clone)]
pub struct Config {
    /// 서버가 바인딩할 호스트 주소
    pub host: String,
    /// u16: 0~65535 범위의 부호 없는 16비트 정수. 포트 번호에 딱 맞는 타입입니다.
    pub port: u16,
    /// 프론트엔드 주소 (CORS)
    pub frontend_url: String,
    pub default_capacity: usize,
    pub max_capacity: usize,
    pub countdown_seconds: u64,
    pub max_countdown_seconds: u64,
    pub min_wpm: f64,
    pub deadline_grace_seconds: i64,
    pub retention_seconds: i64,
    pub sweep_interval_seconds: u64,
    pub start_when_full: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            frontend_url: "*".to_string(),
            default_capacity: 4,
            max_capacity: 10,
            countdown_seconds: 3,
            max_countdown_seconds: 30,
            min_wpm: 10.0,
            deadline_grace_seconds: 10,
            retention_seconds: 60,
            sweep_interval_seconds: 5,
            start_when_full: false,
        }
    }
}

impl Config {
    /// 환경변수에서 설정값을 읽어 Config 인스턴스를 생성합니다.
    ///
    /// 모든 항목에 기본값이 있으므로 환경변수가 하나도 없어도 동작합니다.
    /// 다만 값이 있는데 파싱할 수 없다면 조용히 기본값을 쓰지 않고 에러를 반환합니다.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 임의의 조회 함수로 설정을 읽습니다. (테스트에서 환경변수 대신 사용)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let config = Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT", defaults.port)?,
            frontend_url: lookup("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            default_capacity: parse_var(
                &lookup,
                "RACE_DEFAULT_CAPACITY",
                defaults.default_capacity,
            )?,
            max_capacity: parse_var(&lookup, "RACE_MAX_CAPACITY", defaults.max_capacity)?,
            countdown_seconds: parse_var(
                &lookup,
                "RACE_COUNTDOWN_SECONDS",
                defaults.countdown_seconds,
            )?,
            max_countdown_seconds: parse_var(
                &lookup,
                "RACE_MAX_COUNTDOWN_SECONDS",
                defaults.max_countdown_seconds,
            )?,
            min_wpm: parse_var(&lookup, "RACE_MIN_WPM", defaults.min_wpm)?,
            deadline_grace_seconds: parse_var(
                &lookup,
                "RACE_DEADLINE_GRACE_SECONDS",
                defaults.deadline_grace_seconds,
            )?,
            retention_seconds: parse_var(
                &lookup,
                "RACE_RETENTION_SECONDS",
                defaults.retention_seconds,
            )?,
            sweep_interval_seconds: parse_var(
                &lookup,
                "RACE_SWEEP_INTERVAL_SECONDS",
                defaults.sweep_interval_seconds,
            )?,
            start_when_full: parse_var(&lookup, "RACE_START_WHEN_FULL", defaults.start_when_full)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.max_capacity == 0 {
            return Err(AppError::Config("RACE_MAX_CAPACITY must be at least 1".to_string()));
        }
        if self.default_capacity == 0 || self.default_capacity > self.max_capacity {
            return Err(AppError::Config(format!(
                "RACE_DEFAULT_CAPACITY must be between 1 and {}",
                self.max_capacity
            )));
        }
        if self.countdown_seconds > self.max_countdown_seconds {
            return Err(AppError::Config(
                "RACE_COUNTDOWN_SECONDS exceeds RACE_MAX_COUNTDOWN_SECONDS".to_string(),
            ));
        }
        if !(self.min_wpm.is_finite() && self.min_wpm >= 1.0) {
            return Err(AppError::Config("RACE_MIN_WPM must be at least 1".to_string()));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(AppError::Config(
                "RACE_SWEEP_INTERVAL_SECONDS must be at least 1".to_string(),
            ));
        }

        // 시간 값은 모두 0초 ~ 하루 범위여야 합니다
        let durations = [
            ("RACE_COUNTDOWN_SECONDS", self.countdown_seconds as i128),
            ("RACE_MAX_COUNTDOWN_SECONDS", self.max_countdown_seconds as i128),
            ("RACE_DEADLINE_GRACE_SECONDS", self.deadline_grace_seconds as i128),
            ("RACE_RETENTION_SECONDS", self.retention_seconds as i128),
            ("RACE_SWEEP_INTERVAL_SECONDS", self.sweep_interval_seconds as i128),
        ];
        for (key, value) in durations {
            if !(0..=MAX_DURATION_SECONDS as i128).contains(&value) {
                return Err(AppError::Config(format!(
                    "{key} must be between 0 and {MAX_DURATION_SECONDS} seconds"
                )));
            }
        }
        Ok(())
    }

    /// 레지스트리 설정으로 변환합니다.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            defaults: RaceSettings {
                max_players: self.default_capacity,
                countdown_seconds: self.countdown_seconds,
                min_wpm: self.min_wpm,
                deadline_grace: TimeDelta::seconds(self.deadline_grace_seconds),
                start_when_full: self.start_when_full,
            },
            max_capacity: self.max_capacity,
            max_countdown_seconds: self.max_countdown_seconds,
            retention: TimeDelta::seconds(self.retention_seconds),
        }
    }
}

// 값이 없으면 기본값, 있는데 파싱에 실패하면 에러
fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
    }
}
