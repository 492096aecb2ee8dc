//! Nmap process wrapper.
//!
//! Executes nmap as a child process via `tokio::process::Command`, parses
//! the XML output, classifies failures into stable error codes, and retries
//! retryable failures with exponential backoff.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use scanorama_core::config::DiscoveryConfig;

use crate::error::{EngineError, Result};
use crate::nmap_xml::{self, NmapRun};

/// Retry/backoff tuning for scanner invocations.
#[derive(Debug, Clone)]
pub struct Resilience {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Resilience {
    pub fn from_config(cfg: &DiscoveryConfig) -> Self {
        Self {
            max_attempts: cfg.max_retry_attempts,
            base_delay: Duration::from_millis(cfg.base_retry_delay_ms),
            max_delay: Duration::from_millis(cfg.max_retry_delay_ms),
        }
    }

    /// `base × 2^attempt`, clamped.
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Wrapper around the nmap binary.
pub struct NmapScanner {
    path: String,
}

impl NmapScanner {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
        }
    }

    /// Verify nmap is installed and accessible, returning its version banner.
    pub async fn verify_installation(&self) -> Result<String> {
        let output = Command::new(&self.path)
            .arg("--version")
            .output()
            .await
            .map_err(|_| EngineError::ScannerNotFound {
                path: self.path.clone(),
            })?;

        String::from_utf8(output.stdout).map_err(|e| EngineError::XmlParse(e.to_string()))
    }

    /// Execute one nmap run against the given targets.
    ///
    /// Nmap is invoked with `-oX -` so XML lands on stdout. The deadline is
    /// enforced locally and also passed to nmap as `--host-timeout` so the
    /// subprocess winds down on its own.
    pub async fn run(
        &self,
        flags: &[String],
        targets: &[String],
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<NmapRun> {
        if targets.is_empty() {
            return Err(EngineError::TargetInvalid("empty target list".to_string()));
        }

        let mut cmd = Command::new(&self.path);
        cmd.args(flags)
            .arg("--host-timeout")
            .arg(format!("{}s", deadline.as_secs().max(1)))
            .arg("-oX")
            .arg("-")
            .args(targets)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            scanner = %self.path,
            flags = ?flags,
            target_count = targets.len(),
            deadline_secs = deadline.as_secs(),
            "Invoking scanner"
        );

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = tokio::time::timeout(deadline, cmd.output()) => match result {
                Err(_) => return Err(EngineError::Timeout(deadline)),
                Ok(Err(_)) => {
                    return Err(EngineError::ScannerNotFound {
                        path: self.path.clone(),
                    })
                }
                Ok(Ok(output)) => output,
            },
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(classify_failure(
                output.status.code().unwrap_or(-1),
                &stderr,
            ));
        }

        nmap_xml::parse_nmap_xml(&output.stdout)
    }

    /// Run with resilience: retryable failure classes back off and retry up
    /// to `max_attempts`; non-retryable classes terminate immediately.
    pub async fn run_with_resilience(
        &self,
        flags: &[String],
        targets: &[String],
        deadline: Duration,
        resilience: &Resilience,
        cancel: &CancellationToken,
    ) -> Result<NmapRun> {
        let mut attempt = 0u32;
        loop {
            match self.run(flags, targets, deadline, cancel).await {
                Ok(run) => return Ok(run),
                Err(e) if !e.is_retryable() || attempt >= resilience.max_attempts => {
                    return Err(e);
                }
                Err(e) => {
                    let delay = resilience.delay_for(attempt);
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Scanner invocation failed; backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Map an nmap failure onto a stable error code by inspecting stderr.
fn classify_failure(code: i32, stderr: &str) -> EngineError {
    let lower = stderr.to_lowercase();
    if lower.contains("permission denied")
        || lower.contains("requires root")
        || lower.contains("operation not permitted")
    {
        EngineError::Permission(first_line(stderr))
    } else if lower.contains("failed to resolve")
        || lower.contains("invalid target")
        || lower.contains("could not resolve")
    {
        EngineError::TargetInvalid(first_line(stderr))
    } else if lower.contains("network is unreachable") || lower.contains("network unreachable") {
        EngineError::NetworkUnreachable(first_line(stderr))
    } else if lower.contains("host unreachable") || lower.contains("no route to host") {
        EngineError::HostUnreachable(first_line(stderr))
    } else {
        EngineError::ScannerFailed {
            code,
            stderr: first_line(stderr),
        }
    }
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or("").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanorama_core::ErrorCode;

    #[test]
    fn failure_classification() {
        let e = classify_failure(1, "You requested a scan type which requires root privileges.");
        assert_eq!(e.code(), ErrorCode::Permission);

        let e = classify_failure(1, "Failed to resolve \"nope.invalid\".");
        assert_eq!(e.code(), ErrorCode::TargetInvalid);

        let e = classify_failure(1, "sendto: Network is unreachable");
        assert_eq!(e.code(), ErrorCode::NetworkUnreachable);

        let e = classify_failure(1, "connect: No route to host");
        assert_eq!(e.code(), ErrorCode::HostUnreachable);

        let e = classify_failure(137, "something exploded\nmore detail");
        assert_eq!(e.code(), ErrorCode::DiscoveryFailed);
        assert!(e.is_retryable());
    }

    #[test]
    fn classified_message_is_single_line() {
        let e = classify_failure(1, "first line\nsecond line");
        assert_eq!(e.to_string(), "Scanner failed (exit 1): first line");
    }

    #[test]
    fn backoff_grows_and_clamps() {
        let r = Resilience {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        };
        assert_eq!(r.delay_for(0), Duration::from_millis(500));
        assert_eq!(r.delay_for(1), Duration::from_secs(1));
        assert_eq!(r.delay_for(2), Duration::from_secs(2));
        assert_eq!(r.delay_for(3), Duration::from_secs(4));
        assert_eq!(r.delay_for(4), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn missing_binary_is_scanner_not_found() {
        let scanner = NmapScanner::new("/nonexistent/nmap-binary");
        match scanner.verify_installation().await {
            Err(EngineError::ScannerNotFound { path }) => {
                assert_eq!(path, "/nonexistent/nmap-binary");
            }
            other => panic!("expected ScannerNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_target_list_rejected() {
        let scanner = NmapScanner::new("nmap");
        let cancel = CancellationToken::new();
        match scanner
            .run(&[], &[], Duration::from_secs(5), &cancel)
            .await
        {
            Err(EngineError::TargetInvalid(_)) => {}
            other => panic!("expected TargetInvalid, got {other:?}"),
        }
    }
}
