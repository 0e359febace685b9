//! Single background thread that turns build requests into pending records.
//!
//! The worker only ever writes to the [`PendingStore`]. It never sees the
//! live map, the voice pool, or the scene graph.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, info, trace, warn};

use crate::{BuildRequest, ContentBuilder, PendingStore, Result, StreamError};

const JOIN_POLL: Duration = Duration::from_millis(2);

#[derive(Debug)]
pub enum WorkerMessage {
    Build(BuildRequest),
    Stop,
}

/// Producer side of the request queue, held by the main loop.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    tx: Sender<WorkerMessage>,
    depth: Arc<AtomicUsize>,
}

impl RequestQueue {
    pub fn enqueue(&self, request: BuildRequest) -> Result<()> {
        self.depth.fetch_add(1, Ordering::AcqRel);
        self.tx.send(WorkerMessage::Build(request)).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            StreamError::msg("content worker has stopped")
        })
    }

    /// Requests not yet picked up by the worker.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    fn send_stop(&self) {
        let _ = self.tx.send(WorkerMessage::Stop);
    }
}

/// Consumer side of the request queue.
#[derive(Debug)]
pub struct RequestReceiver {
    rx: Receiver<WorkerMessage>,
    depth: Arc<AtomicUsize>,
}

impl RequestReceiver {
    fn recv_timeout(&self, timeout: Duration) -> std::result::Result<WorkerMessage, RecvTimeoutError> {
        let message = self.rx.recv_timeout(timeout)?;
        self.note_taken(&message);
        Ok(message)
    }

    fn note_taken(&self, message: &WorkerMessage) {
        if matches!(message, WorkerMessage::Build(_)) {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Builds every request currently queued on the calling thread. Returns
    /// the number of requests processed, stopping early at a stop message.
    pub fn process_queued(
        &self,
        builder: &dyn ContentBuilder,
        pending: &PendingStore,
        stats: &WorkerStats,
    ) -> usize {
        let mut processed = 0;
        loop {
            match self.rx.try_recv() {
                Ok(message) => {
                    self.note_taken(&message);
                    match message {
                        WorkerMessage::Build(request) => {
                            process_request(builder, &request, pending, stats);
                            processed += 1;
                        }
                        WorkerMessage::Stop => break,
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        processed
    }
}

pub fn request_queue() -> (RequestQueue, RequestReceiver) {
    let (tx, rx) = mpsc::channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        RequestQueue {
            tx,
            depth: depth.clone(),
        },
        RequestReceiver { rx, depth },
    )
}

/// Counters shared between the worker thread and its owner.
#[derive(Debug, Default)]
pub struct WorkerStats {
    built: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    pub fn built(&self) -> u64 {
        self.built.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Builds one request and publishes the outcome to the pending store.
///
/// Errors and panics inside the builder are logged and reported as failed
/// keys; they never escape.
pub fn process_request(
    builder: &dyn ContentBuilder,
    request: &BuildRequest,
    pending: &PendingStore,
    stats: &WorkerStats,
) {
    let key = request.key;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| builder.build(request)))
        .unwrap_or_else(|_| Err(StreamError::build(key, "builder panicked")));

    let published = match outcome {
        Ok(record) => {
            stats.built.fetch_add(1, Ordering::Relaxed);
            trace!(%key, "content built");
            pending.put(key, record)
        }
        Err(err) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(%key, error = %err, "dropping content that failed to build");
            pending.record_failure(key)
        }
    };

    if let Err(err) = published {
        warn!(%key, error = %err, "could not publish build outcome");
    }
}

/// Handle to the background build thread.
#[derive(Debug)]
pub struct ContentWorker {
    queue: RequestQueue,
    stop: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    handle: Option<JoinHandle<()>>,
}

impl ContentWorker {
    pub fn spawn(
        builder: Box<dyn ContentBuilder>,
        pending: PendingStore,
        poll_interval: Duration,
    ) -> Result<Self> {
        let (queue, receiver) = request_queue();
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(WorkerStats::default());

        let thread_stop = stop.clone();
        let thread_stats = stats.clone();
        let handle = thread::Builder::new()
            .name("content-worker".to_string())
            .spawn(move || {
                run_worker(
                    builder,
                    receiver,
                    pending,
                    thread_stop,
                    thread_stats,
                    poll_interval,
                )
            })?;

        info!(?poll_interval, "content worker started");
        Ok(Self {
            queue,
            stop,
            stats,
            handle: Some(handle),
        })
    }

    pub fn queue(&self) -> RequestQueue {
        self.queue.clone()
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Signals the worker to stop and waits at most `timeout` for it.
    ///
    /// Returns `true` if the thread was joined. A worker still running at
    /// the deadline is detached.
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        self.signal_stop();
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            let now = Instant::now();
            if now >= deadline {
                warn!(?timeout, "content worker did not stop in time, detaching");
                return false;
            }
            thread::sleep(JOIN_POLL.min(deadline - now));
        }

        if handle.join().is_err() {
            warn!("content worker panicked");
        }
        info!(
            built = self.stats.built(),
            failed = self.stats.failed(),
            "content worker stopped"
        );
        true
    }

    fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.queue.send_stop();
    }
}

impl Drop for ContentWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.signal_stop();
        }
    }
}

fn run_worker(
    builder: Box<dyn ContentBuilder>,
    receiver: RequestReceiver,
    pending: PendingStore,
    stop: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    poll_interval: Duration,
) {
    while !stop.load(Ordering::Acquire) {
        match receiver.recv_timeout(poll_interval) {
            Ok(WorkerMessage::Build(request)) => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                process_request(builder.as_ref(), &request, &pending, &stats);
            }
            Ok(WorkerMessage::Stop) => break,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("request queue closed");
                break;
            }
        }
    }
}
