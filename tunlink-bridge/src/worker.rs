//! Control worker: serialized execution of control requests
//!
//! A single dedicated thread drains an unbounded FIFO queue of control
//! requests, executing one at a time. This guarantees mutual exclusion
//! over profile and extension state, and guarantees that no control
//! operation ever runs on the invoking thread — callers may own a
//! synchronization primitive that the notification machinery needs to
//! signal, and running extension I/O inline there would deadlock.
//!
//! Every extension round trip inside a job carries a bound, so a wedged
//! extension occupies the queue for a finite time and a queued status
//! query is never starved indefinitely.

use std::sync::mpsc;
use std::thread;

use tokio::runtime::Handle;

use crate::bridge::OpContext;
use crate::envelope::ServiceResponse;
use crate::error::Error;

/// A control operation, 1:1 with the facade surface.
///
/// The unit of work enqueued on the control worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    Install,
    /// Optional serialized tunnel configuration; `None` means "use the
    /// profile's last-persisted configuration"
    Start(Option<String>),
    Stop,
    Status,
    Reinstall,
}

struct Job {
    request: ControlRequest,
    reply_tx: mpsc::Sender<ServiceResponse>,
}

pub(crate) struct ControlWorker {
    tx: Option<mpsc::Sender<Job>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ControlWorker {
    /// Spawn the worker thread.
    ///
    /// `runtime` is the bridge's shared runtime handle; the worker
    /// blocks on it for each request so extension I/O stays async while
    /// the queue discipline stays strictly FIFO.
    pub(crate) fn spawn(ctx: OpContext, runtime: Handle) -> crate::error::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name("tunlink-control".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    log::debug!("executing control request {:?}", job.request);
                    let response = runtime.block_on(ctx.dispatch(job.request));
                    // A dropped reply receiver just means the caller gave
                    // up; the operation still ran to completion.
                    let _ = job.reply_tx.send(response);
                }
                log::debug!("control worker shutting down");
            })?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Enqueue a request and block until the worker completes it
    pub(crate) fn execute(&self, request: ControlRequest) -> ServiceResponse {
        let worker_gone = || ServiceResponse::from(Error::WorkerGone);
        let Some(tx) = self.tx.as_ref() else {
            return worker_gone();
        };
        let (reply_tx, reply_rx) = mpsc::channel();
        if tx.send(Job { request, reply_tx }).is_err() {
            return worker_gone();
        }
        reply_rx.recv().unwrap_or_else(|_| worker_gone())
    }
}

impl Drop for ControlWorker {
    fn drop(&mut self) {
        // Closing the queue lets the thread drain in-flight work and exit.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
