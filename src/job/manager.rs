use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use super::store::{InMemoryJobStore, Job, JobId, JobStore};
use super::worker::JobContext;
use crate::config::VisualizerConfig;
use crate::encode::{ProcessSpawner, SystemSpawner};
use crate::error::{BarwaveError, BarwaveResult, ErrorKind};

/// One render request: audio in, video out.
#[derive(Clone, Debug)]
pub struct JobRequest {
    pub audio_path: PathBuf,
    pub background_path: Option<PathBuf>,
    pub output_path: PathBuf,
    pub config: VisualizerConfig,
}

struct WorkerHandle {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Accepts jobs and runs each one on its own worker thread.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    spawner: Arc<dyn ProcessSpawner>,
    next_id: AtomicU64,
    workers: Mutex<HashMap<JobId, WorkerHandle>>,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            store,
            spawner,
            next_id: AtomicU64::new(1),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// In-memory store and real encoder processes.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(InMemoryJobStore::new()), Arc::new(SystemSpawner))
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validates the request's configuration, records a queued job and starts
    /// its worker. Invalid configurations are rejected without creating a job.
    pub fn submit(&self, request: JobRequest) -> BarwaveResult<JobId> {
        let geometry = request.config.validate()?;
        self.reap_finished();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.store.insert(Job::queued(id));
        log::info!("job {id}: queued -> {}", request.output_path.display());

        let cancel = Arc::new(AtomicBool::new(false));
        let context = JobContext {
            id,
            request,
            geometry,
            store: Arc::clone(&self.store),
            spawner: Arc::clone(&self.spawner),
            cancel: Arc::clone(&cancel),
        };
        let spawned = std::thread::Builder::new()
            .name(format!("barwave-job-{id}"))
            .spawn(move || context.run());

        match spawned {
            Ok(thread) => {
                self.workers().insert(
                    id,
                    WorkerHandle {
                        cancel,
                        thread,
                    },
                );
                Ok(id)
            }
            Err(e) => {
                let message = format!("failed to start worker thread: {e}");
                self.store.update(id, &mut |j| {
                    j.fail(ErrorKind::InternalRender, message.clone());
                });
                Err(BarwaveError::internal(message))
            }
        }
    }

    pub fn status(&self, id: JobId) -> Option<Job> {
        self.reap_finished();
        self.store.get(id)
    }

    /// Asks a running job to stop after its current frame. Returns false when
    /// the job is unknown or already finished.
    pub fn cancel(&self, id: JobId) -> bool {
        let live = self
            .store
            .get(id)
            .is_some_and(|job| !job.state.is_terminal());
        if !live {
            return false;
        }
        match self.workers().get(&id) {
            Some(worker) => {
                log::info!("job {id}: cancellation requested");
                worker.cancel.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Blocks until the job's worker exits and returns its final snapshot.
    pub fn wait(&self, id: JobId) -> Option<Job> {
        let worker = self.workers().remove(&id);
        if let Some(worker) = worker {
            self.join_worker(id, worker.thread);
        }
        self.store.get(id)
    }

    /// Worker threads not yet joined. Finished ones are reaped first.
    pub fn active_workers(&self) -> usize {
        self.reap_finished();
        self.workers().len()
    }

    /// Joins and forgets workers whose threads have exited, so callers that
    /// only poll `status` never accumulate handles.
    fn reap_finished(&self) {
        let finished: Vec<(JobId, WorkerHandle)> = {
            let mut workers = self.workers();
            let done: Vec<JobId> = workers
                .iter()
                .filter(|(_, w)| w.thread.is_finished())
                .map(|(id, _)| *id)
                .collect();
            done.into_iter()
                .filter_map(|id| workers.remove(&id).map(|w| (id, w)))
                .collect()
        };
        for (id, worker) in finished {
            self.join_worker(id, worker.thread);
        }
    }

    fn join_worker(&self, id: JobId, thread: JoinHandle<()>) {
        if thread.join().is_err() {
            log::error!("job {id}: worker panicked");
            self.store.update(id, &mut |j| {
                j.fail(ErrorKind::InternalRender, "worker thread panicked");
            });
        }
    }

    fn workers(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, WorkerHandle>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
