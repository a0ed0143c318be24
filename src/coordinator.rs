//! Polling coordinator: work queue → downloaded document → spawned run.
//!
//! ## Tick contract
//!
//! Each tick asks the work queue for one pending document. When there is
//! none, the tick does nothing. Otherwise it downloads the bytes, validates
//! them, prepares the run's namespaced directories, replaces any leftover
//! local copy of the document and spawns the run on the Tokio runtime. A
//! fetch or download failure fails the tick; the next tick retries
//! naturally because the document is still pending.
//!
//! ## Admission
//!
//! [`RunRegistry`] enforces `max_concurrent_runs` (default 1) and rejects a
//! second run for a URL that is already in flight. Each admitted run holds a
//! [`RunGuard`]; dropping the guard frees the slot, so a run that panics or
//! times out still releases it.
//!
//! ## Unfinished runs
//!
//! A run that fails or leaves items undelivered keeps its document pending,
//! and the next tick resumes it from the run's checkpoint. The registry
//! counts consecutive unfinished runs per URL; after `max_run_attempts` the
//! URL is excluded from polling until the process restarts, so one broken
//! document cannot hold the queue. Cancelled runs are not counted.

use crate::config::PipelineConfig;
use crate::error::LectureError;
use crate::layout::{document_key, RunLayout};
use crate::output::RunReport;
use crate::pipeline::input::{replace_document_file, validate_pdf_bytes};
use crate::run::{process_document, RunContext, Services};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ── Run registry ─────────────────────────────────────────────────────────────

/// Why [`RunRegistry::admit`] refused a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    AtCapacity { active: usize },
    AlreadyActive,
    /// The URL reached the unfinished-run limit.
    GaveUp { attempts: u32 },
}

#[derive(Debug, Default)]
struct Slots {
    active: HashMap<String, CancellationToken>,
    /// Consecutive unfinished runs per URL.
    unfinished: HashMap<String, u32>,
}

/// Tracks in-flight runs by document URL.
#[derive(Debug)]
pub struct RunRegistry {
    slots: Mutex<Slots>,
    capacity: usize,
    max_attempts: u32,
}

impl RunRegistry {
    pub fn new(capacity: usize, max_attempts: u32) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(Slots::default()),
            capacity: capacity.max(1),
            max_attempts: max_attempts.max(1),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // Every critical section leaves the maps consistent, so poisoning is ignored.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve a slot for `url`. The run's token is a child of `parent`.
    pub fn admit(
        self: &Arc<Self>,
        url: &str,
        parent: &CancellationToken,
    ) -> Result<RunGuard, Rejection> {
        let mut slots = self.lock();
        if slots.active.contains_key(url) {
            return Err(Rejection::AlreadyActive);
        }
        if let Some(&attempts) = slots.unfinished.get(url) {
            if attempts >= self.max_attempts {
                return Err(Rejection::GaveUp { attempts });
            }
        }
        if slots.active.len() >= self.capacity {
            return Err(Rejection::AtCapacity {
                active: slots.active.len(),
            });
        }

        let token = parent.child_token();
        slots.active.insert(url.to_string(), token.clone());
        Ok(RunGuard {
            registry: Arc::clone(self),
            url: url.to_string(),
            token,
        })
    }

    pub fn active_urls(&self) -> Vec<String> {
        self.lock().active.keys().cloned().collect()
    }

    /// URLs the next poll must skip: runs in flight and URLs given up on.
    pub fn excluded_urls(&self) -> Vec<String> {
        let slots = self.lock();
        let given_up = slots
            .unfinished
            .iter()
            .filter(|(_, &n)| n >= self.max_attempts)
            .map(|(url, _)| url);
        slots.active.keys().chain(given_up).cloned().collect()
    }

    /// Record how a run ended and return the URL's unfinished-run count.
    /// A finished run resets the count.
    pub fn record_outcome(&self, url: &str, finished: bool) -> u32 {
        let mut slots = self.lock();
        if finished {
            slots.unfinished.remove(url);
            return 0;
        }
        let count = slots.unfinished.entry(url.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn unfinished_runs(&self, url: &str) -> u32 {
        self.lock().unfinished.get(url).copied().unwrap_or(0)
    }

    pub fn has_given_up(&self, url: &str) -> bool {
        self.unfinished_runs(url) >= self.max_attempts
    }

    /// Cancellation token of the active run for `url`.
    pub fn token(&self, url: &str) -> Option<CancellationToken> {
        self.lock().active.get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().active.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Cancel the run for `url`, if one is active.
    pub fn cancel(&self, url: &str) -> bool {
        match self.lock().active.get(url) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Holds one registry slot until dropped.
#[derive(Debug)]
pub struct RunGuard {
    registry: Arc<RunRegistry>,
    url: String,
    token: CancellationToken,
}

impl RunGuard {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.lock().active.remove(&self.url);
    }
}

// ── Coordinator ──────────────────────────────────────────────────────────────

/// What one poll tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// Nothing pending.
    Idle,
    /// Every run slot is taken; the queue was not polled.
    AtCapacity,
    /// A run was spawned.
    Dispatched {
        url: String,
        handle: JoinHandle<Result<RunReport, LectureError>>,
    },
}

/// Polls the work queue and spawns one pipeline run per pending document.
pub struct Coordinator {
    config: Arc<PipelineConfig>,
    services: Services,
    registry: Arc<RunRegistry>,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(config: PipelineConfig, services: Services) -> Self {
        let registry = RunRegistry::new(config.max_concurrent_runs, config.max_run_attempts);
        Self {
            config: Arc::new(config),
            services,
            registry,
            cancel: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Token that, when cancelled, cancels every run this coordinator spawned.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute one poll tick.
    ///
    /// # Errors
    /// Returns the fetch, download, validation or storage error that stopped
    /// the tick. No run is spawned in that case.
    pub async fn tick(&self) -> Result<TickOutcome, LectureError> {
        if self.registry.is_full() {
            debug!(active = self.registry.len(), "All run slots busy; skipping poll");
            return Ok(TickOutcome::AtCapacity);
        }

        let excluded = self.registry.excluded_urls();
        let Some(pending) = self.services.queue.fetch_pending(&excluded).await? else {
            debug!("No pending documents");
            return Ok(TickOutcome::Idle);
        };
        let url = pending.url;
        info!(document = %url, "Picked up pending document");

        let guard = match self.registry.admit(&url, &self.cancel) {
            Ok(guard) => guard,
            Err(Rejection::AtCapacity { .. }) => return Ok(TickOutcome::AtCapacity),
            Err(Rejection::AlreadyActive) => return Err(LectureError::RunAlreadyActive { url }),
            Err(Rejection::GaveUp { attempts }) => {
                debug!(document = %url, attempts, "Skipping document given up on");
                return Ok(TickOutcome::Idle);
            }
        };

        let bytes = self.services.source.fetch(&url).await?;
        validate_pdf_bytes(&url, &bytes)?;

        let key = document_key(&url, self.config.max_key_len);
        let layout = RunLayout::new(&self.config.output_root, key);
        layout.prepare().await?;
        replace_document_file(&layout.document_path(), &bytes).await?;

        let ctx = RunContext::new(url.clone(), layout, bytes, guard.token());
        let handle = self.spawn_run(ctx, guard);
        Ok(TickOutcome::Dispatched { url, handle })
    }

    fn spawn_run(
        &self,
        ctx: RunContext,
        guard: RunGuard,
    ) -> JoinHandle<Result<RunReport, LectureError>> {
        let config = Arc::clone(&self.config);
        let services = self.services.clone();
        let registry = Arc::clone(&self.registry);
        let secs = config.run_timeout_secs;

        tokio::spawn(async move {
            // Held for the whole run; dropping it frees the slot.
            let _guard = guard;

            let result = match timeout(
                Duration::from_secs(secs),
                process_document(&ctx, &services, &config),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    ctx.cancel.cancel();
                    Err(LectureError::RunTimeout {
                        url: ctx.document_url.clone(),
                        secs,
                    })
                }
            };

            match &result {
                Ok(report) if report.is_complete() => {
                    info!(document = %ctx.document_url, "Run complete: {}", report.summary())
                }
                Ok(report) => warn!(
                    document = %ctx.document_url,
                    "Run finished with failures: {}",
                    report.summary()
                ),
                Err(LectureError::Cancelled { .. }) => {
                    info!(document = %ctx.document_url, "Run cancelled")
                }
                Err(e) => error!(document = %ctx.document_url, "Run failed: {}", e),
            }

            if !matches!(result, Err(LectureError::Cancelled { .. })) {
                let finished = matches!(&result, Ok(report) if report.is_complete());
                let unfinished = registry.record_outcome(&ctx.document_url, finished);
                if registry.has_given_up(&ctx.document_url) {
                    error!(
                        document = %ctx.document_url,
                        "Giving up after {} unfinished runs; the document stays in processing \
                         and is skipped until restart",
                        unfinished
                    );
                }
            }
            result
        })
    }

    /// Poll every `poll_interval_secs` until `shutdown` fires, then cancel
    /// and await every in-flight run.
    pub async fn run(&self, shutdown: CancellationToken) {
        // `interval` panics on a zero period; fields set directly skip `build()`.
        let period = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs: Vec<(String, JoinHandle<Result<RunReport, LectureError>>)> = Vec::new();

        info!(
            queue = %self.config.queue_base_url,
            interval_secs = self.config.poll_interval_secs,
            max_runs = self.config.max_concurrent_runs,
            "Coordinator started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            runs.retain(|(_, handle)| !handle.is_finished());

            match self.tick().await {
                Ok(TickOutcome::Dispatched { url, handle }) => runs.push((url, handle)),
                Ok(TickOutcome::Idle) | Ok(TickOutcome::AtCapacity) => {}
                Err(e) if e.is_transient() => warn!("Poll tick failed, retrying next tick: {}", e),
                Err(e) => error!("Poll tick failed: {}", e),
            }
        }

        info!("Shutting down; cancelling {} in-flight run(s)", runs.len());
        self.cancel.cancel();
        let (urls, handles): (Vec<_>, Vec<_>) = runs.into_iter().unzip();
        for (url, joined) in urls.iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                warn!(document = %url, "Run task ended abnormally: {}", e);
            }
        }
        info!("Coordinator stopped");
    }
}
