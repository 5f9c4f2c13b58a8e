use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use apalis::prelude::Data;
use async_trait::async_trait;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::application::jobs::{
    CompileJobPayload, CompileQueue, CompileWorkerContext, QueueError, process_compile_job,
};

/// In-process FIFO queue drained by a fixed number of worker tasks.
pub struct LocalQueue {
    sender: mpsc::UnboundedSender<CompileJobPayload>,
    depth: Arc<AtomicU64>,
    workers: Vec<JoinHandle<()>>,
}

impl LocalQueue {
    pub fn start(context: CompileWorkerContext, concurrency: NonZeroUsize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<CompileJobPayload>();
        let receiver = Arc::new(Mutex::new(receiver));
        let depth = Arc::new(AtomicU64::new(0));

        let workers = (0..concurrency.get())
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let depth = Arc::clone(&depth);
                let context = context.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(payload) = next else {
                            break;
                        };
                        depth.fetch_sub(1, Ordering::AcqRel);
                        let job_id = payload.job_id;
                        debug!(
                            target = "infra::queue::local",
                            worker,
                            job_id = %job_id,
                            "Worker picked up compile job"
                        );
                        if let Err(err) = process_compile_job(payload, Data::new(context.clone())).await {
                            warn!(
                                target = "infra::queue::local",
                                worker,
                                job_id = %job_id,
                                error = %err,
                                "Compile job could not be processed"
                            );
                        }
                    }
                })
            })
            .collect();

        Self {
            sender,
            depth,
            workers,
        }
    }

    pub fn shutdown(&self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl Drop for LocalQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl CompileQueue for LocalQueue {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn enqueue(&self, payload: CompileJobPayload) -> Result<(), QueueError> {
        self.depth.fetch_add(1, Ordering::AcqRel);
        self.sender.send(payload).map_err(|err| {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            QueueError::unavailable(format!("local workers stopped: {err}"))
        })
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.depth.load(Ordering::Acquire))
    }
}
