//! Recognition worker pool.
//!
//! One dispatcher thread drains the bus subscription into an unbounded task
//! queue. A fixed set of workers pulls from that queue; each execution
//! borrows one engine handle from a bounded pool (blocking when none is
//! free, so excess jobs wait in the task queue rather than in engine
//! acquisition) and returns it through a drop guard on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::bus::Subscription;
use crate::error::PoolError;
use crate::job::Job;
use crate::ocr::engine::{EngineFactory, RecognitionEngine};
use crate::service::DocService;

pub struct OcrPool {
    task_sender: Sender<Job>,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    engine_receiver: Receiver<Box<dyn RecognitionEngine>>,
    pool_size: usize,
}

impl OcrPool {
    /// Creates every engine handle up front, then starts the dispatcher and
    /// `pool_size` workers. Any engine-creation failure aborts startup: the
    /// pool never runs partially initialized.
    ///
    /// # Panics
    /// Panics if `pool_size` is 0.
    pub fn start(
        factory: &dyn EngineFactory,
        pool_size: usize,
        subscription: Subscription,
        docs: DocService,
    ) -> Result<Self, PoolError> {
        assert!(pool_size > 0, "pool_size must be > 0");

        let (engine_sender, engine_receiver) = bounded(pool_size);
        for index in 0..pool_size {
            let engine = factory
                .create_engine()
                .map_err(|source| PoolError::EngineInit { index, source })?;
            engine_sender
                .send(engine)
                .map_err(|_| PoolError::ChannelClosed)?;
            debug!(index, "Recognition engine initialized");
        }

        let (task_sender, task_receiver) = unbounded::<Job>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let dispatcher = {
            let task_tx = task_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            thread::spawn(move || run_dispatcher(subscription, task_tx, shutdown_flag))
        };

        let mut workers = Vec::with_capacity(pool_size);
        for worker_id in 0..pool_size {
            let task_rx = task_receiver.clone();
            let engine_rx = engine_receiver.clone();
            let engine_tx = engine_sender.clone();
            let worker_docs = docs.clone();

            workers.push(thread::spawn(move || {
                run_worker(worker_id, task_rx, engine_rx, engine_tx, worker_docs);
            }));
        }

        info!(pool_size, "Started recognition pool");

        Ok(Self {
            task_sender,
            dispatcher: Some(dispatcher),
            workers,
            shutdown,
            engine_receiver,
            pool_size,
        })
    }

    /// Queues a job directly, bypassing the bus.
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(PoolError::ChannelClosed);
        }
        self.task_sender.send(job).map_err(|_| PoolError::ChannelClosed)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of engine handles currently idle in the pool.
    pub fn free_engines(&self) -> usize {
        self.engine_receiver.len()
    }

    /// Stops the dispatcher, lets the workers drain every queued job, joins
    /// them, and reclaims the engine handles. Returns the number of handles
    /// reclaimed, which equals the configured pool size unless a handle was
    /// leaked.
    pub fn shutdown(mut self) -> usize {
        info!("Shutting down recognition pool...");
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                error!("Recognition dispatcher panicked");
            }
        }

        // Closing the task queue lets workers finish what is queued and exit.
        drop(self.task_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if worker.join().is_err() {
                error!("Recognition worker {} panicked", i);
            }
        }

        let mut reclaimed = 0;
        while self.engine_receiver.try_recv().is_ok() {
            reclaimed += 1;
        }
        if reclaimed != self.pool_size {
            warn!(
                reclaimed,
                expected = self.pool_size,
                "Engine handle count mismatch after shutdown"
            );
        }

        info!(reclaimed, "Recognition pool shutdown complete");
        reclaimed
    }
}

fn run_dispatcher(subscription: Subscription, task_sender: Sender<Job>, shutdown: Arc<AtomicBool>) {
    debug!("Recognition dispatcher started");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match subscription.recv_timeout(Duration::from_millis(100)) {
            Ok(Some(payload)) => match Job::from_bytes(&payload) {
                Ok(job) => {
                    debug!(job_id = %job.id, "Queued job for recognition");
                    if task_sender.send(job).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to decode recognition payload");
                }
            },
            Ok(None) => continue,
            Err(_) => {
                debug!("Recognition subscription closed");
                break;
            }
        }
    }

    debug!("Recognition dispatcher stopped");
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<Job>,
    engine_receiver: Receiver<Box<dyn RecognitionEngine>>,
    engine_sender: Sender<Box<dyn RecognitionEngine>>,
    docs: DocService,
) {
    debug!(worker_id, "Recognition worker started");

    while let Ok(job) = task_receiver.recv() {
        // Blocks until an engine frees up; the task queue is the backlog.
        let mut lease = match EngineLease::acquire(&engine_receiver, &engine_sender) {
            Ok(lease) => lease,
            Err(_) => {
                error!(worker_id, job_id = %job.id, "Engine pool closed, dropping job");
                break;
            }
        };

        process_job(worker_id, &job, &mut lease, &docs);
    }

    debug!(worker_id, "Recognition worker stopped");
}

fn process_job(worker_id: usize, job: &Job, lease: &mut EngineLease, docs: &DocService) {
    let _span = tracing::info_span!("ocr.recognize", job_id = %job.id).entered();
    info!(worker_id, hash = %job.content_hash, "Recognizing document");

    match lease.recognize(&job.content) {
        Ok(mut doc) => {
            doc.id = job.id;
            if let Err(e) = docs.merge_ocr(job.id, &doc) {
                error!(job_id = %job.id, error = %e, "Failed to persist recognition output");
            } else {
                info!(job_id = %job.id, pages = doc.total_pages(), "Recognition complete");
            }
        }
        Err(e) => {
            // Best effort, at most once: log, mark failed, drop the job.
            error!(job_id = %job.id, error = %e, "Recognition failed, dropping job");
            if let Err(db_err) = docs.mark_failed(job.id, &format!("Recognition failed: {}", e)) {
                error!(job_id = %job.id, error = %db_err, "Failed to record failure status");
            }
        }
    }
}

/// Scoped hold on one engine handle. The handle goes back to the pool when
/// the lease drops, on every exit path including unwinding, so a handle is
/// returned exactly once per acquisition.
struct EngineLease {
    engine: Option<Box<dyn RecognitionEngine>>,
    slot: Sender<Box<dyn RecognitionEngine>>,
}

impl EngineLease {
    fn acquire(
        pool: &Receiver<Box<dyn RecognitionEngine>>,
        slot: &Sender<Box<dyn RecognitionEngine>>,
    ) -> Result<Self, PoolError> {
        let engine = pool.recv().map_err(|_| PoolError::ChannelClosed)?;
        Ok(Self {
            engine: Some(engine),
            slot: slot.clone(),
        })
    }

    fn recognize(
        &mut self,
        content: &[u8],
    ) -> Result<crate::document::ExtractedDoc, crate::error::RecognitionError> {
        match self.engine.as_mut() {
            Some(engine) => engine.recognize(content),
            None => Err(crate::error::RecognitionError::Failed(
                "engine lease already released".to_string(),
            )),
        }
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            // The channel is sized to the pool, so this send cannot block.
            let _ = self.slot.send(engine);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InProcessBus, MessageBus};
    use crate::db::Database;
    use crate::document::{DocPage, ExtractedDoc};
    use crate::error::RecognitionError;
    use crate::job::ProcessingStatus;
    use crate::storage::FileStore;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct StubEngine {
        fail: bool,
        delay: Duration,
        busy: Arc<AtomicUsize>,
        max_busy: Arc<AtomicUsize>,
    }

    impl RecognitionEngine for StubEngine {
        fn recognize(&mut self, content: &[u8]) -> Result<ExtractedDoc, RecognitionError> {
            let busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_busy.fetch_max(busy, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.busy.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(RecognitionError::Failed("stub engine failure".to_string()));
            }

            let text = String::from_utf8_lossy(content).to_string();
            Ok(ExtractedDoc::new(
                Uuid::new_v4(),
                None,
                vec![DocPage {
                    page_number: 1,
                    text,
                }],
            ))
        }
    }

    struct StubFactory {
        fail_at: Option<usize>,
        fail_jobs: bool,
        delay: Duration,
        created: AtomicUsize,
        busy: Arc<AtomicUsize>,
        max_busy: Arc<AtomicUsize>,
    }

    impl StubFactory {
        fn new() -> Self {
            Self {
                fail_at: None,
                fail_jobs: false,
                delay: Duration::from_millis(0),
                created: AtomicUsize::new(0),
                busy: Arc::new(AtomicUsize::new(0)),
                max_busy: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl EngineFactory for StubFactory {
        fn create_engine(&self) -> Result<Box<dyn RecognitionEngine>, RecognitionError> {
            let index = self.created.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(index) {
                return Err(RecognitionError::EngineCreation(
                    "license exhausted".to_string(),
                ));
            }
            Ok(Box::new(StubEngine {
                fail: self.fail_jobs,
                delay: self.delay,
                busy: Arc::clone(&self.busy),
                max_busy: Arc::clone(&self.max_busy),
            }))
        }
    }

    fn test_service(dir: &TempDir) -> DocService {
        DocService::new(Database::open_in_memory().unwrap(), FileStore::new(dir.path()))
    }

    fn submitted_job(docs: &DocService, content: &[u8]) -> Job {
        let job = Job::new(content.to_vec(), "doc.pdf", "application/pdf", Uuid::new_v4());
        docs.insert_placeholder(&job).unwrap();
        job
    }

    fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn test_engine_init_failure_aborts_startup() {
        let dir = TempDir::new().unwrap();
        let bus = InProcessBus::new();
        let factory = StubFactory {
            fail_at: Some(1),
            ..StubFactory::new()
        };

        let result = OcrPool::start(&factory, 2, bus.subscribe("t"), test_service(&dir));
        match result {
            Err(PoolError::EngineInit { index, .. }) => assert_eq!(index, 1),
            Err(other) => panic!("Expected EngineInit error, got {:?}", other),
            Ok(_) => panic!("Pool started despite engine creation failure"),
        }
    }

    #[test]
    fn test_processes_jobs_from_bus() {
        let dir = TempDir::new().unwrap();
        let docs = test_service(&dir);
        let bus = InProcessBus::new();
        let factory = StubFactory::new();

        let pool = OcrPool::start(&factory, 2, bus.subscribe("ocr"), docs.clone()).unwrap();
        assert_eq!(pool.pool_size(), 2);
        assert_eq!(pool.free_engines(), 2);

        let job = submitted_job(&docs, b"page content");
        bus.publish("ocr", &job.to_bytes().unwrap()).unwrap();

        let merged = wait_until(
            || {
                docs.find_by_id(job.id)
                    .unwrap()
                    .is_some_and(|row| row.ocr_content.is_some())
            },
            Duration::from_secs(5),
        );
        assert!(merged, "Recognition output never merged");

        // The engine went back to the pool once the job finished.
        let idle = wait_until(|| pool.free_engines() == 2, Duration::from_secs(5));
        assert!(idle, "Engine was not returned to the pool");

        assert_eq!(pool.shutdown(), 2);
    }

    #[test]
    fn test_busy_engines_never_exceed_pool_size() {
        let dir = TempDir::new().unwrap();
        let docs = test_service(&dir);
        let bus = InProcessBus::new();
        let factory = StubFactory {
            delay: Duration::from_millis(20),
            ..StubFactory::new()
        };
        let max_busy = Arc::clone(&factory.max_busy);

        let pool = OcrPool::start(&factory, 2, bus.subscribe("ocr"), docs.clone()).unwrap();

        for i in 0..10 {
            let job = submitted_job(&docs, format!("doc {}", i).as_bytes());
            pool.submit(job).unwrap();
        }

        assert_eq!(pool.shutdown(), 2);
        assert!(max_busy.load(Ordering::SeqCst) <= 2);
        assert!(max_busy.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_engines_reclaimed_after_recognition_errors() {
        let dir = TempDir::new().unwrap();
        let docs = test_service(&dir);
        let bus = InProcessBus::new();
        let factory = StubFactory {
            fail_jobs: true,
            ..StubFactory::new()
        };

        let pool = OcrPool::start(&factory, 2, bus.subscribe("ocr"), docs.clone()).unwrap();

        let job = submitted_job(&docs, b"will fail");
        let job_id = job.id;
        pool.submit(job).unwrap();

        let failed = wait_until(
            || docs.status(job_id) == ProcessingStatus::Failed,
            Duration::from_secs(5),
        );
        assert!(failed, "Job never marked failed");

        // Every handle came back despite the failure.
        assert_eq!(pool.shutdown(), 2);
    }

    #[test]
    fn test_shutdown_drains_queued_jobs() {
        let dir = TempDir::new().unwrap();
        let docs = test_service(&dir);
        let bus = InProcessBus::new();
        let factory = StubFactory {
            delay: Duration::from_millis(30),
            ..StubFactory::new()
        };

        let pool = OcrPool::start(&factory, 2, bus.subscribe("ocr"), docs.clone()).unwrap();

        let jobs: Vec<Job> = (0..6)
            .map(|i| submitted_job(&docs, format!("queued {}", i).as_bytes()))
            .collect();
        for job in &jobs {
            pool.submit(job.clone()).unwrap();
        }

        assert_eq!(pool.shutdown(), 2);

        // Every queued job was processed before the pool returned.
        for job in &jobs {
            let row = docs.find_by_id(job.id).unwrap().unwrap();
            assert!(row.ocr_content.is_some());
        }
    }

    #[test]
    fn test_submit_after_shutdown_flag() {
        let dir = TempDir::new().unwrap();
        let docs = test_service(&dir);
        let bus = InProcessBus::new();
        let factory = StubFactory::new();

        let pool = OcrPool::start(&factory, 1, bus.subscribe("ocr"), docs.clone()).unwrap();
        pool.shutdown_flag_for_test();

        let job = submitted_job(&docs, b"late");
        assert!(matches!(pool.submit(job), Err(PoolError::ChannelClosed)));
        pool.shutdown();
    }

    impl OcrPool {
        fn shutdown_flag_for_test(&self) {
            self.shutdown.store(true, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_lease_returns_engine_on_drop() {
        let (tx, rx) = bounded::<Box<dyn RecognitionEngine>>(1);
        let factory = StubFactory::new();
        tx.send(factory.create_engine().unwrap()).unwrap();

        {
            let _lease = EngineLease::acquire(&rx, &tx).unwrap();
            assert_eq!(rx.len(), 0);
        }
        assert_eq!(rx.len(), 1);
    }
}
