//! Background worker performing bucket writes on behalf of an
//! [`IndexBundleWriter`](super::IndexBundleWriter).
//!
//! Space is allocated by the caller before a job is queued, so positions
//! are final at submit time. Jobs run in submit order on one thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;

use super::BufferCache;
use crate::errors::{GeIndexError, GeIndexResult};
use crate::filebundle::FileBundleWriter;

const QUEUE_DEPTH: usize = 64;

enum Job {
    Write { position: u64, buf: Vec<u8> },
    Barrier(Sender<()>),
}

pub(crate) struct DelayedWriteQueue {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    first_error: Arc<Mutex<Option<GeIndexError>>>,
}

impl DelayedWriteQueue {
    pub(crate) fn start(bundle: Arc<FileBundleWriter>, buffers: Arc<BufferCache>) -> GeIndexResult<Self> {
        let (sender, receiver) = bounded::<Job>(QUEUE_DEPTH);
        let first_error = Arc::new(Mutex::new(None));
        let errors = first_error.clone();

        let worker = thread::Builder::new()
            .name("geindex-delayed-write".to_string())
            .spawn(move || {
                for job in receiver.iter() {
                    match job {
                        Job::Write { position, buf } => {
                            if let Err(e) = bundle.write_at(position, &buf) {
                                log::error!("Delayed bucket write at {} failed: {}", position, e);
                                let mut slot = errors.lock();
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                            }
                            buffers.put(buf);
                        }
                        Job::Barrier(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            first_error,
        })
    }

    fn take_error(&self) -> GeIndexResult<()> {
        match self.first_error.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn sender(&self) -> GeIndexResult<&Sender<Job>> {
        self.sender
            .as_ref()
            .ok_or_else(|| GeIndexError::write("delayed write queue is shut down"))
    }

    /// Queues `buf` for writing at `position`. Reports the first failure of
    /// an earlier job, if any.
    pub(crate) fn submit(&self, position: u64, buf: Vec<u8>) -> GeIndexResult<()> {
        self.take_error()?;
        self.sender()?
            .send(Job::Write { position, buf })
            .map_err(|_| GeIndexError::write("delayed write worker has stopped"))
    }

    /// Blocks until every job queued so far has run.
    pub(crate) fn drain(&self) -> GeIndexResult<()> {
        let (done, wait) = bounded(1);
        self.sender()?
            .send(Job::Barrier(done))
            .map_err(|_| GeIndexError::write("delayed write worker has stopped"))?;
        wait.recv()
            .map_err(|_| GeIndexError::write("delayed write worker has stopped"))?;
        self.take_error()
    }

    /// Runs the remaining jobs and stops the worker.
    pub(crate) fn finish(&mut self) -> GeIndexResult<()> {
        self.sender = None;
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| GeIndexError::write("delayed write worker panicked"))?;
        }
        self.take_error()
    }
}

impl Drop for DelayedWriteQueue {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.finish() {
                log::error!("Delayed write queue dropped with a failed write: {}", e);
            }
        }
    }
}
