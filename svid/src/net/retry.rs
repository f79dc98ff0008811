use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::SvidError;
use crate::net::pools::{client_for, ProxyPool, UserAgentPool};

/// bounded retry with exponential backoff. attempts are capped so a
/// dead endpoint cannot spin the proxy rotation forever.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// delay before retrying the given zero-based attempt: exponential
    /// growth capped at `max_delay`, plus 0.1-0.5 s of jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ms = rand::rng().random_range(100..=500);
        exponential + Duration::from_millis(jitter_ms)
    }
}

/// runs one request through the proxy/UA rotation: every attempt samples
/// a fresh proxy and user agent and builds a one-shot client. only
/// transport errors are retried; remote rejections are returned to the
/// caller immediately.
pub async fn with_rotation<T, F, Fut>(
    policy: &RetryPolicy,
    proxies: &ProxyPool,
    user_agents: &UserAgentPool,
    timeout: Duration,
    request: F,
) -> Result<T, SvidError>
where
    F: Fn(reqwest::Client) -> Fut,
    Fut: Future<Output = Result<T, SvidError>>,
{
    let mut attempt = 0;
    loop {
        let proxy = proxies.sample();
        let user_agent = user_agents.sample();
        let client = client_for(proxy, user_agent, timeout)?;
        match request(client).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transport() && attempt + 1 < policy.max_attempts => {
                log::debug!("transport failure via {proxy:?}, rotating proxy: {e}");
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    fn pools() -> (ProxyPool, UserAgentPool) {
        (
            ProxyPool::from_csv("ip,port,protocols\n,,direct\n").unwrap(),
            UserAgentPool::from_lines("svid-test\n").unwrap(),
        )
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        let early = policy.delay_for(0);
        let late = policy.delay_for(20);
        assert!(early >= Duration::from_millis(300));
        assert!(late <= policy.max_delay + Duration::from_millis(500));
    }

    #[test]
    fn test_transport_errors_retry_until_exhausted() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let (proxies, agents) = pools();
        let attempts = AtomicU32::new(0);
        let result: Result<(), SvidError> = runtime().block_on(with_rotation(
            &policy,
            &proxies,
            &agents,
            Duration::from_secs(1),
            |_client| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(SvidError::Transport(String::from("connection refused"))) }
            },
        ));
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_remote_rejection_is_not_retried() {
        let policy = RetryPolicy::default();
        let (proxies, agents) = pools();
        let attempts = AtomicU32::new(0);
        let result: Result<(), SvidError> = runtime().block_on(with_rotation(
            &policy,
            &proxies,
            &agents,
            Duration::from_secs(1),
            |_client| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SvidError::RemoteRejection {
                        status: 403,
                        message: String::from("forbidden"),
                    })
                }
            },
        ));
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_success_short_circuits() {
        let policy = RetryPolicy::default();
        let (proxies, agents) = pools();
        let result = runtime().block_on(with_rotation(
            &policy,
            &proxies,
            &agents,
            Duration::from_secs(1),
            |_client| async { Ok(7u32) },
        ));
        assert_eq!(result.unwrap(), 7);
    }
}
