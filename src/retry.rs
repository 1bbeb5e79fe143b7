use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Delay policy for bounded retries.
///
/// The same policy type backs all three retry sites (navigation, challenge
/// solving, keyword-level), so the growth curve is configured per caller
/// instead of re-implemented per caller.
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// delay = attempt * base
    Linear { base_ms: u64 },
    /// delay = base * 2^attempt, capped
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Linear { base_ms } => {
                Duration::from_millis(base_ms.saturating_mul(attempt as u64))
            }
            Backoff::Exponential { base_ms, max_ms } => {
                let raw = base_ms.saturating_mul(2u64.saturating_pow(attempt.min(20)));
                Duration::from_millis(raw.min(*max_ms))
            }
        }
    }

    /// Delay with up to `percent`% additive jitter.
    pub fn delay_jittered(&self, attempt: u32, percent: u64) -> Duration {
        let base = self.delay(attempt);
        if percent == 0 {
            return base;
        }
        let ms = base.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=ms * percent / 100);
        Duration::from_millis(ms + jitter)
    }
}

/// Additive jitter applied to every retry delay, so parallel failures do not
/// resynchronize into request bursts the target can pattern-match.
const JITTER_PERCENT: u64 = 10;

/// Runs `op` up to `attempts` times, sleeping per the backoff policy (plus
/// jitter) between failures. Attempts are numbered from 1; the first delay
/// uses attempt 1.
pub async fn retry<T, E, F, Fut>(
    attempts: u32,
    backoff: Backoff,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= attempts => {
                ::log::warn!("{} failed after {} attempts: {}", what, attempt, e);
                return Err(e);
            }
            Err(e) => {
                let delay = backoff.delay_jittered(attempt, JITTER_PERCENT);
                ::log::debug!(
                    "{} attempt {} failed ({}), retrying in {:?}",
                    what,
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_linear_growth() {
        let backoff = Backoff::Linear { base_ms: 100 };
        assert_eq!(backoff.delay(1).as_millis(), 100);
        assert_eq!(backoff.delay(2).as_millis(), 200);
        assert_eq!(backoff.delay(3).as_millis(), 300);
    }

    #[test]
    fn test_exponential_cap() {
        let backoff = Backoff::Exponential {
            base_ms: 100,
            max_ms: 1000,
        };
        assert_eq!(backoff.delay(0).as_millis(), 100);
        assert_eq!(backoff.delay(1).as_millis(), 200);
        assert!(backoff.delay(10).as_millis() <= 1000);
    }

    #[test]
    fn test_jitter_bounds() {
        let backoff = Backoff::Linear { base_ms: 100 };
        for _ in 0..50 {
            let d = backoff.delay_jittered(2, 10).as_millis();
            assert!((200..=220).contains(&d));
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry(3, Backoff::Linear { base_ms: 1 }, "test op", |_attempt| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("not yet".to_string())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts() {
        let result: Result<(), String> =
            retry(2, Backoff::Linear { base_ms: 1 }, "always fails", |_| async {
                Err("nope".to_string())
            })
            .await;
        assert!(result.is_err());
    }
}
