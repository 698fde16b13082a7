//! Extraction worker pool.
//!
//! Same dispatcher/task-queue structure as the recognition pool, without a
//! handle pool: the backend is a remote call, so concurrency is bounded by
//! the worker count alone. Request and parse failures stay inside the worker
//! that hit them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info};

use crate::bus::Subscription;
use crate::error::PoolError;
use crate::job::Job;
use crate::llm::extractor::TextExtractor;
use crate::service::DocService;

pub struct LlmPool {
    task_sender: Sender<Job>,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl LlmPool {
    /// Starts the dispatcher and `worker_count` extraction workers.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn start(
        extractor: Arc<dyn TextExtractor>,
        worker_count: usize,
        subscription: Subscription,
        docs: DocService,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");

        let (task_sender, task_receiver) = unbounded::<Job>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let dispatcher = {
            let task_tx = task_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            thread::spawn(move || run_dispatcher(subscription, task_tx, shutdown_flag))
        };

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let task_rx = task_receiver.clone();
            let worker_docs = docs.clone();
            let worker_extractor = Arc::clone(&extractor);

            workers.push(thread::spawn(move || {
                run_worker(worker_id, task_rx, worker_extractor, worker_docs);
            }));
        }

        info!(worker_count, "Started extraction pool");

        Self {
            task_sender,
            dispatcher: Some(dispatcher),
            workers,
            shutdown,
        }
    }

    /// Queues a job directly, bypassing the bus.
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(PoolError::ChannelClosed);
        }
        self.task_sender.send(job).map_err(|_| PoolError::ChannelClosed)
    }

    /// Stops the dispatcher, drains the queue, and joins the workers.
    pub fn shutdown(mut self) {
        info!("Shutting down extraction pool...");
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                error!("Extraction dispatcher panicked");
            }
        }

        drop(self.task_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if worker.join().is_err() {
                error!("Extraction worker {} panicked", i);
            }
        }

        info!("Extraction pool shutdown complete");
    }
}

fn run_dispatcher(subscription: Subscription, task_sender: Sender<Job>, shutdown: Arc<AtomicBool>) {
    debug!("Extraction dispatcher started");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match subscription.recv_timeout(Duration::from_millis(100)) {
            Ok(Some(payload)) => match Job::from_bytes(&payload) {
                Ok(job) => {
                    debug!(job_id = %job.id, "Queued job for extraction");
                    if task_sender.send(job).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to decode extraction payload");
                }
            },
            Ok(None) => continue,
            Err(_) => {
                debug!("Extraction subscription closed");
                break;
            }
        }
    }

    debug!("Extraction dispatcher stopped");
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<Job>,
    extractor: Arc<dyn TextExtractor>,
    docs: DocService,
) {
    debug!(worker_id, "Extraction worker started");

    while let Ok(job) = task_receiver.recv() {
        process_job(worker_id, &job, extractor.as_ref(), &docs);
    }

    debug!(worker_id, "Extraction worker stopped");
}

fn process_job(worker_id: usize, job: &Job, extractor: &dyn TextExtractor, docs: &DocService) {
    let _span = tracing::info_span!("llm.extract", job_id = %job.id).entered();
    info!(worker_id, hash = %job.content_hash, "Extracting document");

    match extractor.extract(&job.content, &job.mime_type) {
        Ok(mut doc) => {
            doc.id = job.id;
            match docs.merge_llm(job.id, &doc, &job.content) {
                Ok(path) => {
                    info!(
                        job_id = %job.id,
                        pages = doc.total_pages(),
                        archive = %path.display(),
                        "Extraction complete"
                    );
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Failed to persist extraction output");
                }
            }
        }
        Err(e) => {
            // Isolated to this task: the row keeps its empty extraction
            // column and the pool moves on to the next job.
            error!(job_id = %job.id, error = %e, "Extraction failed, dropping job");
            if let Err(db_err) = docs.mark_failed(job.id, &format!("Extraction failed: {}", e)) {
                error!(job_id = %job.id, error = %db_err, "Failed to record failure status");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InProcessBus, MessageBus};
    use crate::db::Database;
    use crate::document::{DocPage, ExtractedDoc};
    use crate::error::ExtractionError;
    use crate::job::ProcessingStatus;
    use crate::storage::FileStore;
    use std::time::Instant;
    use tempfile::TempDir;
    use uuid::Uuid;

    /// Splits UTF-8 content on form feeds, one page per segment.
    struct StubExtractor;

    impl TextExtractor for StubExtractor {
        fn extract(&self, content: &[u8], _mime: &str) -> Result<ExtractedDoc, ExtractionError> {
            let text = String::from_utf8_lossy(content);
            if text.starts_with("unparseable") {
                return Err(ExtractionError::ResponseParse(
                    "not a structured document".to_string(),
                ));
            }
            let pages = text
                .split('\u{c}')
                .enumerate()
                .map(|(i, segment)| DocPage {
                    page_number: (i + 1) as u32,
                    text: segment.to_string(),
                })
                .collect();
            Ok(ExtractedDoc::new(Uuid::new_v4(), None, pages))
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
    fn test_processes_jobs_from_bus() {
        let dir = TempDir::new().unwrap();
        let docs = test_service(&dir);
        let bus = InProcessBus::new();

        let pool = LlmPool::start(
            Arc::new(StubExtractor),
            2,
            bus.subscribe("llm"),
            docs.clone(),
        );

        let job = submitted_job(&docs, "first\u{c}second".as_bytes());
        bus.publish("llm", &job.to_bytes().unwrap()).unwrap();

        let merged = wait_until(
            || {
                docs.find_by_id(job.id)
                    .unwrap()
                    .is_some_and(|row| row.llm_content.is_some())
            },
            Duration::from_secs(5),
        );
        assert!(merged, "Extraction output never merged");

        let row = docs.find_by_id(job.id).unwrap().unwrap();
        let doc = ExtractedDoc::from_json(row.llm_content.as_deref().unwrap()).unwrap();
        assert_eq!(doc.total_pages(), 2);
        assert!(row.storage_path.is_some());

        pool.shutdown();
    }

    #[test]
    fn test_parse_failure_leaves_content_empty_and_pool_alive() {
        let dir = TempDir::new().unwrap();
        let docs = test_service(&dir);
        let bus = InProcessBus::new();

        let pool = LlmPool::start(
            Arc::new(StubExtractor),
            1,
            bus.subscribe("llm"),
            docs.clone(),
        );

        let bad = submitted_job(&docs, b"unparseable gibberish");
        pool.submit(bad.clone()).unwrap();

        let failed = wait_until(
            || docs.status(bad.id) == ProcessingStatus::Failed,
            Duration::from_secs(5),
        );
        assert!(failed);
        let row = docs.find_by_id(bad.id).unwrap().unwrap();
        assert!(row.llm_content.is_none());

        // Pool is still alive: the next job goes through.
        let good = submitted_job(&docs, b"still works");
        pool.submit(good.clone()).unwrap();
        let merged = wait_until(
            || {
                docs.find_by_id(good.id)
                    .unwrap()
                    .is_some_and(|row| row.llm_content.is_some())
            },
            Duration::from_secs(5),
        );
        assert!(merged);

        pool.shutdown();
    }

    #[test]
    fn test_shutdown_drains_queued_jobs() {
        let dir = TempDir::new().unwrap();
        let docs = test_service(&dir);
        let bus = InProcessBus::new();

        let pool = LlmPool::start(
            Arc::new(StubExtractor),
            2,
            bus.subscribe("llm"),
            docs.clone(),
        );

        let jobs: Vec<Job> = (0..5)
            .map(|i| submitted_job(&docs, format!("doc {}", i).as_bytes()))
            .collect();
        for job in &jobs {
            pool.submit(job.clone()).unwrap();
        }

        pool.shutdown();

        for job in &jobs {
            let row = docs.find_by_id(job.id).unwrap().unwrap();
            assert!(row.llm_content.is_some());
        }
    }
}
