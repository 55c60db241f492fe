//! 레이트 리미터 -- 시간 윈도우당 디스패치 요청 수 제한
//!
//! `"count/seconds"` 형식 설정으로 고정 윈도우 리미터를 만듭니다.
//! 허용 여부 확인과 카운트 증가는 하나의 임계 구역에서 수행되므로
//! 동시 호출에서도 윈도우당 허용 수가 `count`를 넘지 않습니다.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::DispatchError;

/// 파싱된 레이트 리밋 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    count: u32,
    window: Duration,
}

impl RateLimit {
    /// 윈도우당 허용 수와 윈도우 길이로 설정을 생성합니다.
    pub fn new(count: u32, window: Duration) -> Result<Self, DispatchError> {
        if count == 0 || window.is_zero() {
            return Err(DispatchError::InvalidRateLimit(format!(
                "{count}/{}",
                window.as_secs()
            )));
        }
        Ok(Self { count, window })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl FromStr for RateLimit {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DispatchError::InvalidRateLimit(s.to_owned());

        let (count, seconds) = s.trim().split_once('/').ok_or_else(invalid)?;
        let count: u32 = count.trim().parse().map_err(|_| invalid())?;
        let seconds: u64 = seconds.trim().parse().map_err(|_| invalid())?;
        if count == 0 || seconds == 0 {
            return Err(invalid());
        }

        Ok(Self {
            count,
            window: Duration::from_secs(seconds),
        })
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.count, self.window.as_secs())
    }
}

/// 현재 윈도우 상태
#[derive(Debug)]
struct Window {
    started: Instant,
    admitted: u32,
}

/// 고정 윈도우 레이트 리미터
///
/// # 사용 예시
/// ```ignore
/// let limiter = RateLimiter::new("100/60".parse()?);
/// if !limiter.admit() {
///     tokio::time::sleep(limiter.retry_after()).await;
/// }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    limit: RateLimit,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            window: Mutex::new(Window {
                started: Instant::now(),
                admitted: 0,
            }),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// 요청 하나를 허용할지 결정합니다.
    ///
    /// 현재 윈도우의 허용 수가 남아 있으면 카운트를 증가시키고 `true`를 반환합니다.
    /// 윈도우가 지났으면 먼저 새 윈도우를 시작합니다.
    pub fn admit(&self) -> bool {
        let now = Instant::now();
        let mut window = self.lock();

        if now.duration_since(window.started) >= self.limit.window {
            window.started = now;
            window.admitted = 0;
        }

        if window.admitted < self.limit.count {
            window.admitted += 1;
            true
        } else {
            false
        }
    }

    /// [`admit`](Self::admit)의 에러 반환 버전
    pub fn try_admit(&self) -> Result<(), DispatchError> {
        if self.admit() {
            Ok(())
        } else {
            Err(DispatchError::RateLimitExceeded {
                retry_after: self.retry_after(),
            })
        }
    }

    /// 다음 요청이 허용될 때까지 남은 시간. 지금 허용 가능하면 0입니다.
    pub fn retry_after(&self) -> Duration {
        let now = Instant::now();
        let window = self.lock();
        let elapsed = now.duration_since(window.started);

        if elapsed >= self.limit.window || window.admitted < self.limit.count {
            Duration::ZERO
        } else {
            self.limit.window - elapsed
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Window> {
        // 임계 구역 안에서 패닉할 코드가 없으므로 poison 상태여도 값은 일관됩니다.
        match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    // ── 파싱 ──

    #[test]
    fn parse_valid_limit() {
        let limit: RateLimit = "10/60".parse().unwrap();
        assert_eq!(limit.count(), 10);
        assert_eq!(limit.window(), Duration::from_secs(60));
        assert_eq!(limit.to_string(), "10/60");
    }

    #[test]
    fn parse_tolerates_whitespace() {
        let limit: RateLimit = " 5 / 1 ".parse().unwrap();
        assert_eq!(limit.count(), 5);
    }

    #[test]
    fn parse_rejects_malformed_limits() {
        for raw in ["10", "a/b", "0/5", "5/0", "", "/", "5/", "-1/5", "5/1.5", "1/2/3"] {
            let err = raw.parse::<RateLimit>().unwrap_err();
            assert!(
                matches!(err, DispatchError::InvalidRateLimit(_)),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn new_rejects_zero_values() {
        assert!(RateLimit::new(0, Duration::from_secs(1)).is_err());
        assert!(RateLimit::new(1, Duration::ZERO).is_err());
    }

    // ── 허용 ──

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_count_per_window() {
        let limiter = RateLimiter::new("3/10".parse().unwrap());
        assert!(limiter.admit());
        assert!(limiter.admit());
        assert!(limiter.admit());
        assert!(!limiter.admit());
        assert!(!limiter.admit());
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_at_boundary() {
        let limiter = RateLimiter::new("2/10".parse().unwrap());
        assert!(limiter.admit());
        assert!(limiter.admit());
        assert!(!limiter.admit());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!limiter.admit());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.admit());
        assert!(limiter.admit());
        assert!(!limiter.admit());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_counts_down_to_window_end() {
        let limiter = RateLimiter::new("1/10".parse().unwrap());
        assert_eq!(limiter.retry_after(), Duration::ZERO);
        assert!(limiter.admit());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(limiter.retry_after(), Duration::from_secs(6));

        let err = limiter.try_admit().unwrap_err();
        assert!(matches!(
            err,
            DispatchError::RateLimitExceeded { retry_after } if retry_after == Duration::from_secs(6)
        ));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(limiter.retry_after(), Duration::ZERO);
        limiter.try_admit().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admission_never_exceeds_count() {
        let limiter = Arc::new(RateLimiter::new("25/3600".parse().unwrap()));
        let admitted = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..200 {
            let limiter = limiter.clone();
            let admitted = admitted.clone();
            handles.push(tokio::spawn(async move {
                if limiter.admit() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 25);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sequential_admissions_within_one_window(count in 1u32..50, attempts in 0usize..120) {
                let limiter = RateLimiter::new(RateLimit::new(count, Duration::from_secs(3600)).unwrap());
                let admitted = (0..attempts).filter(|_| limiter.admit()).count();
                prop_assert_eq!(admitted, attempts.min(count as usize));
            }

            #[test]
            fn well_formed_limits_parse(count in 1u32..100_000, secs in 1u64..86_400) {
                let limit: RateLimit = format!("{count}/{secs}").parse().unwrap();
                prop_assert_eq!(limit.count(), count);
                prop_assert_eq!(limit.window(), Duration::from_secs(secs));
            }

            #[test]
            fn arbitrary_strings_do_not_panic(s in ".{0,20}") {
                let _ = s.parse::<RateLimit>();
            }
        }
    }
}
