//! Generic bounded-concurrency job executor.
//!
//! Discovery and scan work is dispatched through this pool. Jobs are opaque:
//! the pool only knows their id, a type tag for log fields, and an async
//! `execute`. Every submitted job produces exactly one [`JobResult`] on the
//! results channel, including jobs that fail permanently or are cancelled
//! while still queued at shutdown.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use scanorama_core::config::ScanningConfig;

use crate::error::EngineError;

/// A unit of work the pool can execute.
#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> Uuid;
    /// Tag used for log fields and metrics labels.
    fn job_type(&self) -> &'static str;
    async fn execute(&self, cancel: &CancellationToken) -> Result<(), EngineError>;
}

/// Outcome of one submitted job.
#[derive(Debug)]
pub struct JobResult {
    pub job_id: Uuid,
    pub job_type: &'static str,
    pub error: Option<EngineError>,
    pub duration: Duration,
    /// Attempts beyond the first.
    pub retries: u32,
}

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of parallel workers.
    pub size: usize,
    /// Bounded job-queue capacity.
    pub queue_size: usize,
    /// Retries per job for retryable errors.
    pub max_retries: u32,
    /// Constant delay between attempts.
    pub retry_delay: Duration,
    /// How long `shutdown` waits for in-flight work to drain.
    pub shutdown_timeout: Duration,
    /// Attempts per second across all workers; 0 disables throttling.
    pub rate_limit: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            queue_size: 64,
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(30),
            rate_limit: 0,
        }
    }
}

impl From<&ScanningConfig> for PoolConfig {
    fn from(cfg: &ScanningConfig) -> Self {
        Self {
            size: cfg.worker_pool_size.max(1),
            queue_size: cfg.queue_size.max(1),
            max_retries: cfg.max_retries,
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
            shutdown_timeout: Duration::from_secs(cfg.shutdown_timeout_secs),
            rate_limit: cfg.rate_limit,
        }
    }
}

type BoxedJob = Box<dyn Job>;

/// Bounded worker pool with retry, optional rate limiting, and draining
/// shutdown.
pub struct WorkerPool {
    job_tx: mpsc::Sender<BoxedJob>,
    results_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<JobResult>>>,
    shutdown: Arc<AtomicBool>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    queue_depth: Arc<AtomicUsize>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<BoxedJob>(config.queue_size);
        let (result_tx, results_rx) = mpsc::unbounded_channel();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let shutdown = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let queue_depth = Arc::new(AtomicUsize::new(0));

        // One shared ticker throttles attempts across all workers.
        let limiter = if config.rate_limit > 0 {
            let period = Duration::from_secs_f64(1.0 / f64::from(config.rate_limit));
            Some(Arc::new(Mutex::new(tokio::time::interval(period))))
        } else {
            None
        };

        let mut handles = Vec::with_capacity(config.size);
        for worker_id in 0..config.size {
            let ctx = WorkerContext {
                worker_id,
                job_rx: job_rx.clone(),
                result_tx: result_tx.clone(),
                cancel: cancel.clone(),
                limiter: limiter.clone(),
                queue_depth: queue_depth.clone(),
                max_retries: config.max_retries,
                retry_delay: config.retry_delay,
            };
            handles.push(tokio::spawn(worker_loop(ctx)));
        }

        tracing::info!(
            size = config.size,
            queue_size = config.queue_size,
            rate_limit = config.rate_limit,
            "Worker pool started"
        );

        Self {
            job_tx,
            results_rx: std::sync::Mutex::new(Some(results_rx)),
            shutdown,
            cancel,
            workers: Mutex::new(handles),
            queue_depth,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Enqueue a job. Fails fast when the queue is full or the pool is
    /// shutting down.
    pub fn submit(&self, job: BoxedJob) -> Result<(), EngineError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(EngineError::Shutdown);
        }
        let job_type = job.job_type();
        match self.job_tx.try_send(job) {
            Ok(()) => {
                self.queue_depth.fetch_add(1, Ordering::SeqCst);
                metrics::counter!("scanorama_pool_jobs_submitted_total", "type" => job_type)
                    .increment(1);
                metrics::gauge!("scanorama_pool_queue_depth")
                    .set(self.queue_depth.load(Ordering::SeqCst) as f64);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(EngineError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EngineError::Shutdown),
        }
    }

    /// Take the results stream. One receiver exists; the first caller gets it.
    pub fn take_results(&self) -> Option<mpsc::UnboundedReceiver<JobResult>> {
        self.results_rx.lock().expect("results lock poisoned").take()
    }

    /// Whether the pool is accepting work.
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::SeqCst)
    }

    /// Signal all workers and wait up to `shutdown_timeout` for drain.
    /// Idempotent: only the first caller performs the shutdown.
    pub async fn shutdown(&self) {
        if self
            .shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        tracing::info!("Worker pool shutting down");
        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.workers.lock().await);
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            tracing::warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                "Worker pool drain timed out; results channel closed with work outstanding"
            );
        }
    }
}

struct WorkerContext {
    worker_id: usize,
    job_rx: Arc<Mutex<mpsc::Receiver<BoxedJob>>>,
    result_tx: mpsc::UnboundedSender<JobResult>,
    cancel: CancellationToken,
    limiter: Option<Arc<Mutex<tokio::time::Interval>>>,
    queue_depth: Arc<AtomicUsize>,
    max_retries: u32,
    retry_delay: Duration,
}

async fn worker_loop(ctx: WorkerContext) {
    loop {
        // Pick up the next job. Once cancelled, drain what is left in the
        // queue so every submitted job still gets a result.
        let (job, cancelled_pickup) = {
            let mut rx = ctx.job_rx.lock().await;
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => match rx.try_recv() {
                    Ok(job) => (job, true),
                    Err(_) => break,
                },
                job = rx.recv() => match job {
                    Some(job) => (job, false),
                    None => break,
                },
            }
        };
        ctx.queue_depth.fetch_sub(1, Ordering::SeqCst);

        if cancelled_pickup {
            post_result(&ctx, &job, Some(EngineError::Cancelled), Duration::ZERO, 0);
            continue;
        }

        let started = Instant::now();
        let mut retries = 0u32;
        let outcome = loop {
            if ctx.cancel.is_cancelled() {
                break Err(EngineError::Cancelled);
            }

            // Rate limiter throttles attempts, not jobs.
            if let Some(limiter) = &ctx.limiter {
                limiter.lock().await.tick().await;
            }

            let attempt = tokio::select! {
                _ = ctx.cancel.cancelled() => Err(EngineError::Cancelled),
                result = job.execute(&ctx.cancel) => result,
            };

            match attempt {
                Ok(()) => break Ok(()),
                Err(EngineError::Cancelled) => break Err(EngineError::Cancelled),
                Err(e) => {
                    if retries >= ctx.max_retries || !e.is_retryable() {
                        break Err(e);
                    }
                    retries += 1;
                    tracing::debug!(
                        worker = ctx.worker_id,
                        job_id = %job.id(),
                        job_type = job.job_type(),
                        retry = retries,
                        error = %e,
                        "Retrying job"
                    );
                    // Retry sleep is broken by shutdown; the job then
                    // terminates with its last error.
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => break Err(e),
                        _ = tokio::time::sleep(ctx.retry_delay) => {}
                    }
                }
            }
        };

        post_result(&ctx, &job, outcome.err(), started.elapsed(), retries);
    }
}

fn post_result(
    ctx: &WorkerContext,
    job: &BoxedJob,
    error: Option<EngineError>,
    duration: Duration,
    retries: u32,
) {
    let job_type = job.job_type();
    match &error {
        None => {
            metrics::counter!("scanorama_pool_jobs_completed_total", "type" => job_type)
                .increment(1);
            tracing::info!(
                worker = ctx.worker_id,
                job_id = %job.id(),
                job_type,
                duration_ms = duration.as_millis() as u64,
                retries,
                "Job completed"
            );
        }
        Some(e) => {
            metrics::counter!("scanorama_pool_jobs_failed_total", "type" => job_type)
                .increment(1);
            tracing::warn!(
                worker = ctx.worker_id,
                job_id = %job.id(),
                job_type,
                duration_ms = duration.as_millis() as u64,
                retries,
                error = %e,
                "Job failed"
            );
        }
    }

    let _ = ctx.result_tx.send(JobResult {
        job_id: job.id(),
        job_type,
        error,
        duration,
        retries,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;

    struct TestJob {
        id: Uuid,
        failures_before_success: AtomicU32,
        error_kind: fn() -> EngineError,
        delay: Duration,
    }

    impl TestJob {
        fn instant() -> Self {
            Self {
                id: Uuid::new_v4(),
                failures_before_success: AtomicU32::new(0),
                error_kind: || EngineError::Cancelled,
                delay: Duration::ZERO,
            }
        }

        fn failing_n_times(n: u32, error_kind: fn() -> EngineError) -> Self {
            Self {
                id: Uuid::new_v4(),
                failures_before_success: AtomicU32::new(n),
                error_kind,
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                id: Uuid::new_v4(),
                failures_before_success: AtomicU32::new(0),
                error_kind: || EngineError::Cancelled,
                delay,
            }
        }
    }

    #[async_trait]
    impl Job for TestJob {
        fn id(&self) -> Uuid {
            self.id
        }

        fn job_type(&self) -> &'static str {
            "test"
        }

        async fn execute(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
            if !self.delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success.store(remaining - 1, Ordering::SeqCst);
                return Err((self.error_kind)());
            }
            Ok(())
        }
    }

    fn test_config() -> PoolConfig {
        PoolConfig {
            size: 5,
            queue_size: 64,
            max_retries: 3,
            retry_delay: Duration::from_millis(5),
            shutdown_timeout: Duration::from_secs(5),
            rate_limit: 0,
        }
    }

    #[tokio::test]
    async fn all_submitted_jobs_produce_results() {
        let pool = WorkerPool::new(test_config());
        let mut results = pool.take_results().unwrap();

        let mut submitted = HashSet::new();
        for _ in 0..20 {
            let job = TestJob::instant();
            submitted.insert(job.id);
            pool.submit(Box::new(job)).unwrap();
        }

        let mut seen = HashSet::new();
        for _ in 0..20 {
            let result = tokio::time::timeout(Duration::from_secs(1), results.recv())
                .await
                .expect("result within 1s")
                .expect("channel open");
            assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
            seen.insert(result.job_id);
        }
        assert_eq!(seen, submitted);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_to_success() {
        let pool = WorkerPool::new(test_config());
        let mut results = pool.take_results().unwrap();

        let job = TestJob::failing_n_times(3, || EngineError::Timeout(Duration::from_secs(1)));
        let id = job.id;
        pool.submit(Box::new(job)).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), results.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.job_id, id);
        assert!(result.error.is_none());
        assert_eq!(result.retries, 3);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_surfaces_last_error() {
        let pool = WorkerPool::new(test_config());
        let mut results = pool.take_results().unwrap();

        let job = TestJob::failing_n_times(10, || EngineError::Timeout(Duration::from_secs(1)));
        pool.submit(Box::new(job)).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), results.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result.error, Some(EngineError::Timeout(_))));
        assert_eq!(result.retries, 3);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let pool = WorkerPool::new(test_config());
        let mut results = pool.take_results().unwrap();

        let job = TestJob::failing_n_times(1, || EngineError::Permission("raw sockets".into()));
        pool.submit(Box::new(job)).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), results.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result.error, Some(EngineError::Permission(_))));
        assert_eq!(result.retries, 0);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn queue_full_fails_fast() {
        let pool = WorkerPool::new(PoolConfig {
            size: 1,
            queue_size: 1,
            ..test_config()
        });
        let _results = pool.take_results().unwrap();

        // Occupy the single worker, then fill the single queue slot.
        pool.submit(Box::new(TestJob::slow(Duration::from_secs(10)))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.submit(Box::new(TestJob::instant())).unwrap();

        match pool.submit(Box::new(TestJob::instant())) {
            Err(EngineError::QueueFull) => {}
            other => panic!("expected QueueFull, got {other:?}"),
        }

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_cancels_running_and_queued_jobs() {
        let pool = WorkerPool::new(PoolConfig {
            size: 1,
            queue_size: 8,
            ..test_config()
        });
        let mut results = pool.take_results().unwrap();

        let running = TestJob::slow(Duration::from_secs(60));
        let queued = TestJob::instant();
        let running_id = running.id;
        let queued_id = queued.id;
        pool.submit(Box::new(running)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.submit(Box::new(queued)).unwrap();

        pool.shutdown().await;

        // No submitted job is silently lost: both carry cancellation errors.
        let mut cancelled = HashSet::new();
        while let Some(result) = results.recv().await {
            assert!(matches!(result.error, Some(EngineError::Cancelled)));
            cancelled.insert(result.job_id);
        }
        assert!(cancelled.contains(&running_id));
        assert!(cancelled.contains(&queued_id));
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let pool = WorkerPool::new(test_config());
        pool.shutdown().await;
        // Second shutdown is a no-op.
        pool.shutdown().await;

        match pool.submit(Box::new(TestJob::instant())) {
            Err(EngineError::Shutdown) => {}
            other => panic!("expected Shutdown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_spaces_attempts() {
        let pool = WorkerPool::new(PoolConfig {
            size: 4,
            rate_limit: 20,
            ..test_config()
        });
        let mut results = pool.take_results().unwrap();

        let started = Instant::now();
        for _ in 0..10 {
            pool.submit(Box::new(TestJob::instant())).unwrap();
        }
        for _ in 0..10 {
            tokio::time::timeout(Duration::from_secs(5), results.recv())
                .await
                .unwrap()
                .unwrap();
        }
        // 10 jobs at 20/s: the first tick fires immediately, so at least
        // ~450ms must elapse.
        assert!(started.elapsed() >= Duration::from_millis(400));

        pool.shutdown().await;
    }
}
