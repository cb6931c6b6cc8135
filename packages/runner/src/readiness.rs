// ABOUTME: Readiness prober polling a server inside an environment until it answers
// ABOUTME: Bounded per-attempt timeout, fixed interval, overall deadline; outcome is a plain bool

use crate::config::RunnerOptions;
use crate::providers::Environment;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct ReadinessProbe {
    /// Sleep between attempts
    pub interval: Duration,
    /// Upper bound for a single attempt
    pub attempt_timeout: Duration,
    /// Overall deadline
    pub timeout: Duration,
}

impl ReadinessProbe {
    pub fn new(interval: Duration, attempt_timeout: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            attempt_timeout,
            timeout,
        }
    }

    pub fn from_options(options: &RunnerOptions, timeout: Duration) -> Self {
        Self::new(options.probe_interval, options.probe_attempt_timeout, timeout)
    }

    /// Run `check` until it returns true or the overall deadline passes
    ///
    /// A hung attempt counts as a failed one.
    pub async fn wait_for<F, Fut>(&self, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut attempt = 0u32;

        while Instant::now() < deadline {
            attempt += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let limit = self.attempt_timeout.min(remaining);

            if let Ok(true) = tokio::time::timeout(limit, check()).await {
                debug!("Ready after {} attempt(s)", attempt);
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.interval.min(remaining)).await;
        }

        false
    }

    /// Poll `http://localhost:<port>/` from inside the environment
    pub async fn wait_until_ready(&self, env: &dyn Environment, port: u16) -> bool {
        let command = probe_command(port);
        let attempt_timeout = self.attempt_timeout;
        self.wait_for(|| {
            let command = command.clone();
            async move {
                matches!(
                    env.exec(&command, Some(attempt_timeout)).await,
                    Ok(result) if result.exit_code == 0
                )
            }
        })
        .await
    }
}

/// Reachability check that tolerates images without curl
///
/// Falls back to wget, then to node for slim Node images that ship neither.
pub fn probe_command(port: u16) -> String {
    let url = format!("http://localhost:{}/", port);
    format!(
        "if command -v curl >/dev/null 2>&1; then curl -sf {url} -o /dev/null; \
         elif command -v wget >/dev/null 2>&1; then wget -q -O /dev/null {url}; \
         else node -e \"require('http').get('{url}', () => process.exit(0)).on('error', () => process.exit(1))\"; fi",
        url = url
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn probe(timeout_ms: u64) -> ReadinessProbe {
        ReadinessProbe::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let ready = probe(2_000)
            .wait_for(|| {
                let counter = counter.clone();
                async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 }
            })
            .await;

        assert!(ready);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out_with_false() {
        let started = std::time::Instant::now();
        let ready = probe(200).wait_for(|| async { false }).await;

        assert!(!ready);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_hung_attempt_is_cut_off() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let ready = probe(1_000)
            .wait_for(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    true
                }
            })
            .await;

        assert!(ready);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_probe_command_targets_port() {
        let command = probe_command(4111);
        assert!(command.contains("curl -sf http://localhost:4111/ -o /dev/null"));
        assert!(command.contains("wget -q -O /dev/null http://localhost:4111/"));
    }

    #[test]
    fn test_readiness_command_falls_back_to_node() {
        let command = probe_command(3000);
        let node = command
            .split("else ")
            .last()
            .expect("node branch");
        assert!(node.starts_with("node -e \"require('http').get('http://localhost:3000/'"));
        assert!(node.contains(".on('error', () => process.exit(1))"));
        assert!(command.ends_with("fi"));
    }

    #[tokio::test]
    async fn test_readiness_command_is_valid_shell() {
        use crate::providers::{EnvironmentSpec, LocalProvider, SandboxProvider};

        let env = LocalProvider::new()
            .create(&EnvironmentSpec::default())
            .await
            .unwrap();
        // Nothing listens on port 1; whichever branch runs must fail, not hit a syntax error
        let result = env.exec(&probe_command(1), None).await.unwrap();
        assert_ne!(result.exit_code, 0);
        assert_ne!(result.exit_code, 2, "{}", result.combined_output());

        env.delete().await.unwrap();
    }
}
