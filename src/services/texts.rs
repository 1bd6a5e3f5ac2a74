//! # 레이스 텍스트 공급 서비스
//!
//! 레이스 세션이 생성될 때 사용할 목표 텍스트를 골라줍니다.
//! 세션은 텍스트를 불투명한 문자열로만 다루며, 선택 정책(무작위, 큐레이션,
//! 중복 방지 등)은 전적으로 이 모듈의 `TextSource` 구현에 맡겨집니다.

use rand_core::{OsRng, RngCore};
use std::sync::Mutex;

/// 내장 문단 모음: 한 줄에 하나의 문단
const BUILTIN_PARAGRAPHS: &str = include_str!("../../data/paragraphs.txt");

/// 레이스 텍스트 공급자
///
/// 레지스트리는 여러 연결 핸들러에서 동시에 호출되므로 `Send + Sync`가 필요합니다.
pub trait TextSource: Send + Sync {
    /// 새 레이스에 사용할 텍스트를 하나 반환합니다.
    fn next_text(&self) -> String;
}

/// 문단 목록에서 무작위로 고르되, 직전에 고른 문단은 피하는 공급자
pub struct ParagraphSource {
    paragraphs: Vec<String>,
    last: Mutex<Option<usize>>,
}

impl ParagraphSource {
    pub fn new(paragraphs: Vec<String>) -> Self {
        Self {
            paragraphs,
            last: Mutex::new(None),
        }
    }

    /// `data/paragraphs.txt`에 포함된 내장 문단으로 공급자를 만듭니다.
    pub fn builtin() -> Self {
        let paragraphs = BUILTIN_PARAGRAPHS
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(paragraphs)
    }

    pub fn len(&self) -> usize {
        self.paragraphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }
}

impl TextSource for ParagraphSource {
    fn next_text(&self) -> String {
        match self.paragraphs.len() {
            0 => return String::new(),
            1 => return self.paragraphs[0].clone(),
            _ => {}
        }

        // 잠금이 poison 되었더라도 직전 인덱스는 힌트일 뿐이므로 그대로 사용합니다
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let len = self.paragraphs.len();
        let mut index = OsRng.next_u32() as usize % len;
        if Some(index) == *last {
            // 같은 문단이 연속으로 나오지 않도록 한 칸 옮깁니다
            index = (index + 1) % len;
        }
        *last = Some(index);
        self.paragraphs[index].clone()
    }
}

/// 항상 같은 텍스트를 반환하는 공급자 (테스트와 고정 텍스트 대회용)
pub struct FixedText(pub String);

impl TextSource for FixedText {
    fn next_text(&self) -> String {
        self.0.clone()
    }
}
