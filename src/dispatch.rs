//! Main-thread dispatch.
//!
//! The isolate belongs to the thread that created the [`Runtime`]. Other
//! threads hand it work through a [`MainThreadDispatcher`]; the owner drains
//! the queue with [`Runtime::run_pending_tasks`] or [`Runtime::run_next_task`].

use crate::runtime::Runtime;
use std::thread::{self, ThreadId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Work queued for the runtime thread.
pub type MainThreadTask = Box<dyn FnOnce(&mut Runtime) + Send>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("the runtime is gone")]
    Closed,
    #[error("synchronous dispatch from the runtime thread would deadlock")]
    WouldBlockOwner,
}

/// Cloneable, `Send` handle that queues closures for the runtime thread.
#[derive(Clone)]
pub struct MainThreadDispatcher {
    tx: mpsc::UnboundedSender<MainThreadTask>,
    owner: ThreadId,
}

impl MainThreadDispatcher {
    /// Run `task` on the runtime thread.
    ///
    /// With `is_async` the call returns as soon as the task is queued.
    /// Otherwise it blocks until the task has run, which is only possible
    /// from a thread other than the runtime's own.
    pub fn run_on_main_thread<F>(&self, task: F, is_async: bool) -> Result<(), DispatchError>
    where
        F: FnOnce(&mut Runtime) + Send + 'static,
    {
        if is_async {
            return self.post(Box::new(task));
        }

        if self.is_main_thread() {
            return Err(DispatchError::WouldBlockOwner);
        }

        let (done_tx, done_rx) = std::sync::mpsc::sync_channel(1);

        self.post(Box::new(move |runtime: &mut Runtime| {
            task(runtime);
            let _ = done_tx.send(());
        }))?;

        // A dropped task (runtime torn down first) disconnects the channel.
        done_rx.recv().map_err(|_| DispatchError::Closed)
    }

    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn post(&self, task: MainThreadTask) -> Result<(), DispatchError> {
        self.tx.send(task).map_err(|_| DispatchError::Closed)
    }
}

impl std::fmt::Debug for MainThreadDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThreadDispatcher")
            .field("owner", &self.owner)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// A dispatcher bound to the calling thread and the queue it feeds.
pub(crate) fn channel() -> (MainThreadDispatcher, mpsc::UnboundedReceiver<MainThreadTask>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let dispatcher = MainThreadDispatcher {
        tx,
        owner: thread::current().id(),
    };

    (dispatcher, rx)
}
