//! Per-device serial execution context
//!
//! Every held device gets one dedicated OS thread that runs jobs strictly in
//! submission order. Capture and reset for a device always go through its
//! context, so operations on one device are never interleaved, while
//! different devices proceed independently.

use async_channel::{Receiver, Sender, bounded};
use common::{Error, Result};
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Serial job queue backed by a dedicated thread
///
/// Dropping the context closes the queue, lets already submitted jobs
/// finish and joins the thread.
pub struct SerialContext {
    name: String,
    job_tx: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl SerialContext {
    /// Spawn a new context thread with the given name
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (job_tx, job_rx) = bounded::<Job>(16);

        let thread_name = name.clone();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_jobs(&thread_name, job_rx))?;

        debug!("Started serial context {}", name);

        Ok(Self {
            name,
            job_tx: Some(job_tx),
            thread: Some(thread),
        })
    }

    /// Context name (also the thread name)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` on the context thread and block until it returns
    ///
    /// Fails if the context has shut down or `f` panicked.
    pub fn run_sync<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let job_tx = self
            .job_tx
            .as_ref()
            .ok_or_else(|| Error::Channel(format!("context {} is closed", self.name)))?;

        let (result_tx, result_rx) = bounded(1);
        let job: Job = Box::new(move || {
            let _ = result_tx.send_blocking(f());
        });

        job_tx
            .send_blocking(job)
            .map_err(|e| Error::Channel(e.to_string()))?;

        result_rx
            .recv_blocking()
            .map_err(|e| Error::Channel(format!("context {} dropped job: {}", self.name, e)))
    }
}

impl Drop for SerialContext {
    fn drop(&mut self) {
        // Closing the sender ends the job loop once the queue drains
        self.job_tx.take();

        if let Some(thread) = self.thread.take()
            && let Err(e) = thread.join()
        {
            error!("Serial context {} thread panicked: {:?}", self.name, e);
        }

        debug!("Stopped serial context {}", self.name);
    }
}

fn run_jobs(name: &str, job_rx: Receiver<Job>) {
    while let Ok(job) = job_rx.recv_blocking() {
        // A panicking job must not take the device's context down with it
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));

        if let Err(e) = result {
            warn!("Panic in serial context {}: {:?}", name, e);
        }
    }
}
