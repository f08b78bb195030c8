//! 🔄 Backoff for the two conversations that go wrong on the wire: scroll pages and
//! `_bulk` submissions. The network is a mood, not a guarantee.
//!
//! Only [`MigrationError::is_retryable`] failures earn another round. A mapping error or an
//! expired scroll context is a verdict, and arguing with a verdict just burns time.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::MigrationError;

// -- 🎲 at most a quarter of the delay on top, so workers don't stampede back together
const JITTER_SHARE: f64 = 0.25;

/// ⏱️ How long to wait between attempts, and how many attempts to make.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// 🚫 One attempt, no second chances.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// 📈 The pause before retry number `attempt` (1-based). Zero for attempt 0.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(exponent) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let ceiling = self.ceiling(exponent);
        if !self.add_jitter || ceiling.is_zero() {
            return ceiling;
        }
        ceiling + ceiling.mul_f64(rand::thread_rng().gen_range(0.0..=JITTER_SHARE))
    }

    // -- 🧢 initial × multiplier^exponent, pinned to max_delay once it gets silly
    fn ceiling(&self, exponent: u32) -> Duration {
        let max = self.max_delay.as_secs_f64();
        let grown = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        if (0.0..max).contains(&grown) {
            Duration::from_secs_f64(grown)
        } else {
            self.max_delay
        }
    }
}

/// 🔁 Call `operation` until it answers, fails for good, or `max_retries` runs out.
/// The error that ends the loop comes back untouched.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, MigrationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MigrationError>>,
{
    let mut retries = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    debug!("✅ {operation_name} went through on retry {retries}");
                }
                return Ok(value);
            }
            Err(err) => err,
        };
        if !err.is_retryable() {
            return Err(err);
        }
        if retries >= config.max_retries {
            if retries > 0 {
                warn!("💀 {operation_name} still failing after {retries} retries: {err}");
            }
            return Err(err);
        }

        retries += 1;
        let delay = config.delay_for_attempt(retries);
        warn!(
            "⚠️ {operation_name} hit a transport error, retry {retries}/{} in {delay:?}: {err}",
            config.max_retries
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            add_jitter: false,
            ..RetryConfig::default()
        }
    }

    // -- 📞 counts its calls and fails the first `failures` of them with `err`
    fn flaky(
        calls: &Arc<AtomicU32>,
        failures: u32,
        err: fn() -> MigrationError,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, MigrationError>> + use<> {
        let calls = calls.clone();
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < failures { Err(err()) } else { Ok(n) })
        }
    }

    #[test]
    fn the_one_where_the_pause_doubles_until_it_hits_the_ceiling() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            add_jitter: false,
            ..RetryConfig::default()
        };
        let pauses: Vec<Duration> = (0..=4).map(|n| config.delay_for_attempt(n)).collect();
        assert_eq!(
            pauses,
            [0, 1, 2, 4, 5].map(Duration::from_secs).to_vec()
        );
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn the_one_where_jitter_only_ever_adds_up_to_a_quarter() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(4),
            ..RetryConfig::default()
        };
        for _ in 0..200 {
            let pause = config.delay_for_attempt(1);
            assert!(pause >= Duration::from_secs(4), "{pause:?}");
            assert!(pause <= Duration::from_secs(5), "{pause:?}");
        }
        assert_eq!(RetryConfig::no_retry().delay_for_attempt(3), Duration::ZERO);
    }

    #[tokio::test]
    async fn the_one_where_the_network_gets_its_act_together() -> anyhow::Result<()> {
        let calls = Arc::new(AtomicU32::new(0));
        let answer = with_retry(
            &quick(3),
            "scroll next",
            flaky(&calls, 2, || MigrationError::Transport("connection reset".into())),
        )
        .await?;
        assert_eq!(answer, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_patience_runs_out() -> anyhow::Result<()> {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry(
            &quick(2),
            "bulk",
            flaky(&calls, u32::MAX, || MigrationError::Transport("503".into())),
        )
        .await;
        assert!(matches!(result, Err(MigrationError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_verdict_is_not_worth_a_second_try() -> anyhow::Result<()> {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry(
            &quick(5),
            "scroll next",
            flaky(&calls, u32::MAX, || MigrationError::Protocol("scroll expired".into())),
        )
        .await;
        assert!(matches!(result, Err(MigrationError::Protocol(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let single = with_retry(
            &RetryConfig::no_retry(),
            "version probe",
            flaky(&calls, u32::MAX, || MigrationError::Transport("refused".into())),
        )
        .await;
        assert!(single.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }
}
