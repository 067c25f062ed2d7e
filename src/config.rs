use std::time::Duration;

/// Retry policy for transient transport failures.
///
/// Applies only to `Unavailable`-class errors; decode errors and remote
/// handler failures are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Multiplier applied to the delay after each attempt
    pub multiplier: f64,

    /// Upper bound on the delay between attempts
    pub max_backoff: Duration,

    /// Total attempts, including the first
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(1),
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    /// Compute the backoff following the given one, clamped to `max_backoff`.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_backoff)
    }
}

/// Transport configuration shared by peer handles and server endpoints.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Deadline for establishing a connection
    pub connect_timeout: Duration,

    /// Deadline for the whole health probe, retries included
    pub health_check_timeout: Duration,

    /// Ceiling on a single wire message. Serialized tensors can reach tens
    /// of megabytes, so this is far above typical RPC defaults.
    pub max_message_size: usize,

    /// Interval between keepalive pings on an idle connection
    pub keepalive_interval: Duration,

    /// How long to wait for a pong before declaring the connection dead
    pub keepalive_timeout: Duration,

    /// Server side: recycle connections with no inbound frames for this long
    pub max_idle: Duration,

    /// Server side: recycle connections older than this
    pub max_connection_age: Duration,

    /// Grace given to in-flight calls when recycling an aged connection
    pub connection_age_grace: Duration,

    /// Grace given to in-flight calls during `stop()` before cancellation
    pub shutdown_grace: Duration,

    /// Bound on concurrently executing server handlers
    pub max_concurrent_handlers: usize,

    /// Retry policy for transient failures
    pub retry: RetryPolicy,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            health_check_timeout: Duration::from_secs(10),
            max_message_size: 128 * 1024 * 1024,
            keepalive_interval: Duration::from_secs(20),
            keepalive_timeout: Duration::from_secs(10),
            max_idle: Duration::from_secs(60),
            max_connection_age: Duration::from_secs(300),
            connection_age_grace: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
            max_concurrent_handlers: 10,
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NetConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_message_size, 128 * 1024 * 1024);
        assert_eq!(config.keepalive_interval, Duration::from_secs(20));
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        let b1 = policy.initial_backoff;
        let b2 = policy.next_backoff(b1);
        let b3 = policy.next_backoff(b2);
        let b4 = policy.next_backoff(b3);
        assert_eq!(b1, Duration::from_millis(100));
        assert_eq!(b2, Duration::from_millis(200));
        assert_eq!(b3, Duration::from_millis(400));
        assert_eq!(b4, Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_capped() {
        let policy = RetryPolicy::default();
        let mut backoff = policy.initial_backoff;
        for _ in 0..10 {
            backoff = policy.next_backoff(backoff);
        }
        assert_eq!(backoff, policy.max_backoff);
    }
}
