//! 재귀 깊이 제한
//!
//! 깊이는 각 페이로드에 실려 다니므로 가드 자체는 상태가 없습니다.

use crate::error::DispatchError;

/// 재귀 깊이 가드
///
/// `depth <= max_recursion`인 페이로드만 플러그인에 전달합니다.
/// 상한이 0이면 최상위 페이로드(깊이 0)만 허용됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecursionGuard {
    max_recursion: u32,
}

impl RecursionGuard {
    pub fn new(max_recursion: u32) -> Self {
        Self { max_recursion }
    }

    pub fn max_recursion(&self) -> u32 {
        self.max_recursion
    }

    /// 해당 깊이의 페이로드를 디스패치해도 되는지 판단합니다.
    pub fn allow(&self, depth: u32) -> bool {
        depth <= self.max_recursion
    }

    /// [`allow`](Self::allow)의 에러 반환 버전
    pub fn check(&self, depth: u32) -> Result<(), DispatchError> {
        if self.allow(depth) {
            Ok(())
        } else {
            Err(DispatchError::RecursionLimitReached {
                depth,
                max: self.max_recursion,
            })
        }
    }
}

impl Default for RecursionGuard {
    fn default() -> Self {
        Self::new(0)
    }
}
