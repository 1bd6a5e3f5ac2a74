//! # 타이핑 점수 계산 서비스
//!
//! 경과 시간과 입력 텍스트로부터 WPM, 정확도, 진행률을 계산하는 순수 함수들입니다.
//! 어떤 상태도 갖지 않으므로 레이스 세션과 테스트 양쪽에서 그대로 재사용됩니다.
//!
//! 이 모듈의 함수들:
//! - `words_per_minute()`: 글자 수와 경과 시간으로 WPM 계산 (1단어 = 5글자)
//! - `diff_typed()`: 입력 텍스트를 목표 텍스트와 글자 단위로 비교
//! - `chars_for_progress()`: 진행률(%)을 목표 텍스트의 글자 수로 환산
//! - `race_deadline()`: 텍스트 길이로부터 레이스 최대 허용 시간 계산

use chrono::TimeDelta;

/// 표준 타이핑 측정에서 한 단어로 치는 글자 수
pub const CHARS_PER_WORD: f64 = 5.0;

/// 레이스 종료 기한의 상한 (여유 시간 포함)
pub const MAX_RACE_SECONDS: i64 = 2 * 86_400;

/// 소수점 첫째 자리에서 반올림합니다. (예: 20.04 → 20.0)
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// 글자 수와 경과 시간으로 WPM(분당 단어 수)을 계산합니다.
///
/// `WPM = (chars / 5) / 경과 분`
///
/// 경과 시간이 0 이하이면 나눗셈이 의미가 없으므로 0을 반환합니다.
///
/// ```
/// use chrono::TimeDelta;
/// use typeforge::services::scoring::words_per_minute;
///
/// // 50글자 = 10단어를 30초에 입력 → 20 WPM
/// assert_eq!(words_per_minute(50, TimeDelta::seconds(30)), 20.0);
/// ```
pub fn words_per_minute(chars: usize, elapsed: TimeDelta) -> f64 {
    let millis = elapsed.num_milliseconds();
    if millis <= 0 {
        return 0.0;
    }
    let minutes = millis as f64 / 60_000.0;
    round1(chars as f64 / CHARS_PER_WORD / minutes)
}

/// 입력 텍스트와 목표 텍스트를 글자 위치별로 비교한 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypedDiff {
    /// 목표 텍스트와 같은 위치에서 일치한 글자 수
    pub correct_chars: usize,
    /// 일치하지 않았거나 목표 텍스트 길이를 넘어선 글자 수
    pub incorrect_chars: usize,
    /// 입력된 전체 글자 수
    pub typed_chars: usize,
    /// 목표 텍스트의 전체 글자 수
    pub target_chars: usize,
}

impl TypedDiff {
    /// 입력한 글자 중 맞은 비율(0~100)
    ///
    /// 아직 아무것도 입력하지 않았다면 100으로 간주합니다.
    pub fn accuracy(&self) -> f64 {
        if self.typed_chars == 0 {
            return 100.0;
        }
        round1(self.correct_chars as f64 / self.typed_chars as f64 * 100.0)
    }

    /// 목표 텍스트 중 올바르게 입력된 비율(0~100)
    ///
    /// 모든 글자가 일치하고 초과 입력이 없을 때에만 정확히 100이 됩니다.
    pub fn progress(&self) -> f64 {
        if self.target_chars == 0 {
            return 100.0;
        }
        if self.correct_chars == self.target_chars && self.incorrect_chars == 0 {
            return 100.0;
        }
        // 반올림으로 100에 도달하는 일이 없도록 99.9에서 자릅니다
        round1(self.correct_chars as f64 / self.target_chars as f64 * 100.0).min(99.9)
    }

    /// 맞게 입력한 글자만으로 계산한 WPM
    pub fn wpm(&self, elapsed: TimeDelta) -> f64 {
        words_per_minute(self.correct_chars, elapsed)
    }
}

/// 입력 텍스트를 목표 텍스트와 글자 단위로 비교합니다.
///
/// 바이트가 아닌 `char` 단위로 비교하므로 한글 같은 멀티바이트 문자도
/// 한 글자로 계산됩니다.
pub fn diff_typed(typed: &str, target: &str) -> TypedDiff {
    let mut target_chars = target.chars();
    let mut diff = TypedDiff {
        target_chars: target.chars().count(),
        ..TypedDiff::default()
    };

    for ch in typed.chars() {
        diff.typed_chars += 1;
        match target_chars.next() {
            Some(expected) if expected == ch => diff.correct_chars += 1,
            _ => diff.incorrect_chars += 1,
        }
    }

    diff
}

/// 진행률(%)을 목표 텍스트 기준 글자 수로 환산합니다.
pub fn chars_for_progress(progress: f64, target_chars: usize) -> usize {
    let clamped = progress.clamp(0.0, 100.0);
    (clamped / 100.0 * target_chars as f64).round() as usize
}

/// 레이스 종료 기한을 계산합니다.
///
/// 텍스트를 `min_wpm` 속도로 끝까지 입력하는 데 걸리는 시간에
/// `grace` 여유 시간을 더한 값입니다. 이 시간이 지나면 아직 완주하지 못한
/// 플레이어가 있어도 레이스가 강제로 종료됩니다.
///
/// 결과는 `0..=MAX_RACE_SECONDS`초로 잘립니다.
pub fn race_deadline(target_chars: usize, min_wpm: f64, grace: TimeDelta) -> TimeDelta {
    let cap = TimeDelta::seconds(MAX_RACE_SECONDS);
    let words = target_chars as f64 / CHARS_PER_WORD;
    let floor = if min_wpm.is_finite() && min_wpm >= 1.0 { min_wpm } else { 1.0 };
    let seconds = (words / floor * 60.0).ceil().clamp(0.0, MAX_RACE_SECONDS as f64) as i64;

    TimeDelta::try_seconds(seconds)
        .and_then(|typing| typing.checked_add(&grace.max(TimeDelta::zero())))
        .map_or(cap, |deadline| deadline.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wpm_counts_five_chars_per_word() {
        assert_eq!(words_per_minute(50, TimeDelta::seconds(30)), 20.0);
        assert_eq!(words_per_minute(50, TimeDelta::seconds(45)), 13.3);
        assert_eq!(words_per_minute(300, TimeDelta::seconds(60)), 60.0);
    }

    #[test]
    fn wpm_is_zero_without_elapsed_time() {
        assert_eq!(words_per_minute(50, TimeDelta::zero()), 0.0);
        assert_eq!(words_per_minute(50, TimeDelta::seconds(-3)), 0.0);
    }

    #[test]
    fn diff_counts_positional_matches() {
        let diff = diff_typed("the quack", "the quick brown");
        assert_eq!(diff.typed_chars, 9);
        assert_eq!(diff.correct_chars, 8);
        assert_eq!(diff.incorrect_chars, 1);
        assert_eq!(diff.target_chars, 15);
        assert_eq!(diff.accuracy(), 88.9);
    }

    #[test]
    fn overflow_chars_are_mistakes() {
        let diff = diff_typed("abcdef", "abc");
        assert_eq!(diff.correct_chars, 3);
        assert_eq!(diff.incorrect_chars, 3);
        assert!(diff.progress() < 100.0);
    }

    #[test]
    fn progress_hits_one_hundred_only_on_exact_match() {
        let target = "a".repeat(1000);
        let almost = "a".repeat(999);
        assert_eq!(diff_typed(&almost, &target).progress(), 99.9);
        assert_eq!(diff_typed(&target, &target).progress(), 100.0);
    }

    #[test]
    fn empty_input_is_fully_accurate() {
        let diff = diff_typed("", "hello");
        assert_eq!(diff.accuracy(), 100.0);
        assert_eq!(diff.progress(), 0.0);
    }

    #[test]
    fn multibyte_chars_count_once() {
        let diff = diff_typed("타자", "타자 연습");
        assert_eq!(diff.correct_chars, 2);
        assert_eq!(diff.target_chars, 5);
    }

    #[test]
    fn progress_maps_to_chars() {
        assert_eq!(chars_for_progress(100.0, 50), 50);
        assert_eq!(chars_for_progress(50.0, 51), 26);
        assert_eq!(chars_for_progress(150.0, 10), 10);
    }

    #[test]
    fn deadline_is_capped_for_extreme_settings() {
        let cap = TimeDelta::seconds(MAX_RACE_SECONDS);
        assert_eq!(race_deadline(50, 1e-300, TimeDelta::zero()), TimeDelta::seconds(600));
        assert_eq!(race_deadline(usize::MAX, 1.0, TimeDelta::zero()), cap);
        assert_eq!(race_deadline(50, 10.0, TimeDelta::MAX), cap);
        assert_eq!(race_deadline(50, 10.0, TimeDelta::seconds(-30)), TimeDelta::seconds(60));
    }

    #[test]
    fn positional_matches_count_after_an_early_typo() {
        // 첫 글자가 틀려도 나머지 위치가 맞으면 맞은 글자로 셉니다
        let target = "abcde abcd abcde abcd abcde abcd abcde abcd abcde ";
        let diff = diff_typed("Xbcde abcd", target);
        assert_eq!(diff.correct_chars, 9);
        assert_eq!(diff.incorrect_chars, 1);
        assert_eq!(diff.progress(), 18.0);
        assert_eq!(diff.accuracy(), 90.0);
    }

    #[test]
    fn deadline_uses_wpm_floor_plus_grace() {
        // 50글자 = 10단어, 10 WPM 기준 1분 + 여유 10초
        let deadline = race_deadline(50, 10.0, TimeDelta::seconds(10));
        assert_eq!(deadline, TimeDelta::seconds(70));
    }
}
