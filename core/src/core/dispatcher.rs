use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, warn};
use tokio::sync::Semaphore;

use crate::core::mutator::Probe;
use crate::core::throttle::Backoff;
use crate::error::{ScanError, TransportError};
use crate::http::{HttpRequest, Response, Transport};

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_CHUNK_SIZE: usize = 20;

pub type ProbeOutcome = Result<Response, TransportError>;

/// Per-campaign analysis of each (probe, outcome) pair. Runs inside the
/// worker that received the response.
#[async_trait]
pub trait ProbeHandler: Send + Sync {
    async fn handle(&self, probe: Probe, outcome: ProbeOutcome) -> Result<(), ScanError>;
}

/// Adapts an async closure into a [`ProbeHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> ProbeHandler for FnHandler<F>
where
    F: Fn(Probe, ProbeOutcome) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ScanError>> + Send,
{
    async fn handle(&self, probe: Probe, outcome: ProbeOutcome) -> Result<(), ScanError> {
        (self.0)(probe, outcome).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// Bounded worker pool in front of the transport.
///
/// Probes are pulled lazily in chunks of `chunk_size`; at most `workers`
/// chunks are in flight, each on its own tokio task, and every probe reaches
/// the handler exactly once, failed or not. `dispatch` returns once all
/// chunks are joined.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    backoff: Arc<Backoff>,
    workers: usize,
    chunk_size: usize,
    use_cache: bool,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, workers: usize, chunk_size: usize) -> Self {
        Self {
            transport,
            backoff: Arc::new(Backoff::default()),
            workers: workers.max(1),
            chunk_size: chunk_size.max(1),
            use_cache: false,
        }
    }

    pub fn with_cache(&self, use_cache: bool) -> Self {
        Self {
            use_cache,
            ..self.clone()
        }
    }

    /// One exchange through the shared path: backoff, transport, status
    /// bookkeeping.
    pub async fn send(&self, request: &HttpRequest) -> ProbeOutcome {
        self.backoff.pause().await;
        let outcome = self.transport.send(request, self.use_cache).await;
        if let Ok(response) = &outcome {
            self.backoff.observe(response.status);
        }
        outcome
    }

    pub async fn dispatch<I, H>(&self, probes: I, handler: Arc<H>) -> Result<DispatchSummary, ScanError>
    where
        I: IntoIterator<Item = Probe>,
        I::IntoIter: Send,
        H: ProbeHandler + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let counters = Arc::new(Counters::default());
        let aborted = Arc::new(AtomicBool::new(false));
        let mut tasks = Vec::new();
        let mut probes = probes.into_iter();

        loop {
            if aborted.load(Ordering::SeqCst) {
                break;
            }
            let chunk: Vec<Probe> = probes.by_ref().take(self.chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            counters.submitted.fetch_add(chunk.len(), Ordering::Relaxed);

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| ScanError::Invariant("dispatcher semaphore closed".to_string()))?;

            let dispatcher = self.clone();
            let handler = Arc::clone(&handler);
            let counters = Arc::clone(&counters);
            let aborted = Arc::clone(&aborted);

            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                for probe in chunk {
                    let outcome = dispatcher.send(probe.request()).await;
                    match &outcome {
                        Ok(_) => counters.completed.fetch_add(1, Ordering::Relaxed),
                        Err(e) => {
                            debug!("probe {} skipped: {}", probe.request().url, e);
                            counters.failed.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                    if let Err(e) = handler.handle(probe, outcome).await {
                        if e.is_fatal() {
                            aborted.store(true, Ordering::SeqCst);
                            return Err(e);
                        }
                        warn!("probe handler error: {}", e);
                    }
                }
                Ok(())
            }));
        }

        let mut fatal = None;
        for task in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(join_error) => Err(ScanError::Invariant(format!(
                    "dispatcher worker panicked: {}",
                    join_error
                ))),
            };
            if let Err(e) = result {
                error!("{}", e);
                fatal.get_or_insert(e);
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        Ok(DispatchSummary {
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        })
    }
}
