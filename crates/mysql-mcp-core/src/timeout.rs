//! Timeout policy and per-request tracking record (C2).
//!
//! Maps an operation-class profile to a deadline and carries a tracking
//! record alongside the request so callers can report how much of the
//! budget was actually used.

use std::time::Duration;
use tokio::time::Instant;

/// Closed set of timeout profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutProfile {
    /// Fallback for unrecognised profiles.
    Default,
    /// Ordinary `SELECT`/`SHOW` statements.
    Query,
    /// `EXPLAIN`, `sample`, and other statements expected to run longer.
    LongQuery,
    /// `INSERT`/`UPDATE`/`DELETE`.
    Write,
    /// `CREATE`/`DROP`/`ALTER`/`TRUNCATE`.
    Admin,
    /// Pool connection acquisition.
    Connection,
}

const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Maps profiles to durations. Immutable after construction.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    default: Duration,
    query: Duration,
    long_query: Duration,
    write: Duration,
    admin: Duration,
    connection: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(30),
            query: Duration::from_secs(30),
            long_query: Duration::from_secs(5 * 60),
            write: Duration::from_secs(60),
            admin: Duration::from_secs(15),
            connection: Duration::from_secs(5),
        }
    }
}

impl TimeoutConfig {
    /// Validate and construct a config from explicit durations.
    ///
    /// # Errors
    ///
    /// Returns an error if any duration is non-positive, exceeds 24h, or if
    /// `long_query < query` / `write < query`.
    pub fn new(
        default: Duration,
        query: Duration,
        long_query: Duration,
        write: Duration,
        admin: Duration,
        connection: Duration,
    ) -> Result<Self, String> {
        for d in [default, query, long_query, write, admin, connection] {
            Self::validate(d)?;
        }
        if long_query < query {
            return Err("long_query timeout must be >= query timeout".to_string());
        }
        if write < query {
            return Err("write timeout must be >= query timeout".to_string());
        }
        Ok(Self {
            default,
            query,
            long_query,
            write,
            admin,
            connection,
        })
    }

    /// Reject non-positive or absurdly large (> 24h) durations.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when `duration` is out of range.
    pub fn validate(duration: Duration) -> Result<(), String> {
        if duration.is_zero() {
            return Err("timeout duration must be positive".to_string());
        }
        if duration > MAX_DURATION {
            return Err("timeout duration must be <= 24h".to_string());
        }
        Ok(())
    }

    /// Total function over the closed profile set; unknown callers should
    /// pass [`TimeoutProfile::Default`] rather than guess.
    #[must_use]
    pub const fn get_timeout(&self, profile: TimeoutProfile) -> Duration {
        match profile {
            TimeoutProfile::Default => self.default,
            TimeoutProfile::Query => self.query,
            TimeoutProfile::LongQuery => self.long_query,
            TimeoutProfile::Write => self.write,
            TimeoutProfile::Admin => self.admin,
            TimeoutProfile::Connection => self.connection,
        }
    }
}

/// Tracking record attached to a request context and updated once at
/// completion.
#[derive(Debug, Clone)]
pub struct TimeoutRecord {
    /// The profile this request was timed against.
    pub profile: TimeoutProfile,
    /// The deadline duration that was allotted.
    pub timeout: Duration,
    /// When the request began.
    pub start_time: Instant,
    /// Set once, at completion.
    pub elapsed: Option<Duration>,
    /// Set once, at completion; saturates to zero rather than going negative.
    pub remaining: Option<Duration>,
    /// Whether the deadline was exceeded.
    pub is_timeout: bool,
}

impl TimeoutRecord {
    fn new(profile: TimeoutProfile, timeout: Duration) -> Self {
        Self {
            profile,
            timeout,
            start_time: Instant::now(),
            elapsed: None,
            remaining: None,
            is_timeout: false,
        }
    }

    /// Called once when the operation finishes, successfully or not.
    pub fn complete(&mut self, is_timeout: bool) {
        let elapsed = self.start_time.elapsed();
        self.elapsed = Some(elapsed);
        self.remaining = Some(self.timeout.saturating_sub(elapsed));
        self.is_timeout = is_timeout;
    }
}

/// Per-request deadline context. Dropping it plays the role of the `cancel`
/// callback the original contract calls for: any future wrapped with
/// `tokio::time::timeout(ctx.timeout, fut)` is cancelled when the future (and
/// therefore this context) goes out of scope.
#[derive(Debug)]
pub struct TimeoutContext {
    /// The allotted duration for this operation.
    pub timeout: Duration,
    /// The tracking record, updated by the caller at completion.
    pub record: TimeoutRecord,
}

impl TimeoutContext {
    /// Open a deadline context for `profile` under `config`.
    #[must_use]
    pub fn open(config: &TimeoutConfig, profile: TimeoutProfile) -> Self {
        let timeout = config.get_timeout(profile);
        Self {
            timeout,
            record: TimeoutRecord::new(profile, timeout),
        }
    }

    /// Run `fut` under this context's deadline, marking the tracking record
    /// on completion either way.
    pub async fn run<F, T, E>(&mut self, fut: F) -> Result<T, TimeoutOutcome<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => {
                self.record.complete(false);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record.complete(false);
                Err(TimeoutOutcome::Inner(e))
            }
            Err(_) => {
                self.record.complete(true);
                Err(TimeoutOutcome::Elapsed)
            }
        }
    }
}

/// Outcome of [`TimeoutContext::run`]: either the wrapped future's own error,
/// or deadline expiry.
#[derive(Debug)]
pub enum TimeoutOutcome<E> {
    /// The deadline elapsed before the future resolved.
    Elapsed,
    /// The future resolved with its own error before the deadline.
    Inner(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_satisfies_ordering_invariants() {
        let cfg = TimeoutConfig::default();
        assert!(cfg.get_timeout(TimeoutProfile::LongQuery) >= cfg.get_timeout(TimeoutProfile::Query));
        assert!(cfg.get_timeout(TimeoutProfile::Write) >= cfg.get_timeout(TimeoutProfile::Query));
        for profile in [
            TimeoutProfile::Default,
            TimeoutProfile::Query,
            TimeoutProfile::LongQuery,
            TimeoutProfile::Write,
            TimeoutProfile::Admin,
            TimeoutProfile::Connection,
        ] {
            let d = cfg.get_timeout(profile);
            assert!(d > Duration::ZERO && d <= MAX_DURATION);
        }
    }

    #[test]
    fn validate_rejects_zero_and_overlong() {
        assert!(TimeoutConfig::validate(Duration::ZERO).is_err());
        assert!(TimeoutConfig::validate(Duration::from_secs(25 * 60 * 60)).is_err());
        assert!(TimeoutConfig::validate(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn new_rejects_inverted_ordering() {
        let result = TimeoutConfig::new(
            Duration::from_secs(30),
            Duration::from_secs(30),
            Duration::from_secs(1), // long_query < query
            Duration::from_secs(60),
            Duration::from_secs(15),
            Duration::from_secs(5),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_reports_elapsed_on_deadline_exceeded() {
        let mut ctx = TimeoutContext {
            timeout: Duration::from_millis(10),
            record: TimeoutRecord::new(TimeoutProfile::Query, Duration::from_millis(10)),
        };
        let result = ctx
            .run::<_, (), ()>(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(TimeoutOutcome::Elapsed)));
        assert!(ctx.record.is_timeout);
        assert!(ctx.record.elapsed.is_some());
    }

    #[tokio::test]
    async fn run_completes_normally_within_deadline() {
        let mut ctx = TimeoutContext::open(&TimeoutConfig::default(), TimeoutProfile::Query);
        let result = ctx.run::<_, i32, ()>(async { Ok(42) }).await;
        assert!(matches!(result, Ok(42)));
        assert!(!ctx.record.is_timeout);
    }
}
