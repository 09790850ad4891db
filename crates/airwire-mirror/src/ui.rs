//! Marshaling of state mutations onto the single-threaded UI owner.
//!
//! Transport callbacks never touch widget values in place; they post a task
//! through a [`UiHandle`] and the UI owner runs it during [`UiQueue::drain`].

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::MIN_TICK;
use crate::error::{MirrorError, MirrorResult};

pub type UiTask = Box<dyn FnOnce() + Send>;

#[derive(Clone)]
pub struct UiHandle {
    tx: mpsc::UnboundedSender<UiTask>,
}

impl UiHandle {
    pub fn post<F>(&self, task: F) -> MirrorResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Box::new(task))
            .map_err(|_| MirrorError::UiClosed)
    }
}

pub struct UiQueue {
    rx: mpsc::UnboundedReceiver<UiTask>,
}

impl UiQueue {
    pub fn channel() -> (UiHandle, UiQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (UiHandle { tx }, UiQueue { rx })
    }

    /// Runs every queued task in FIFO order on the calling thread.
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }
}

/// Drains the queue on a fixed cadence, standing in for a toolkit's idle
/// timer when there is no real event loop. Periods below [`MIN_TICK`] are
/// raised to it.
pub fn spawn_ui_pump(mut queue: UiQueue, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_TICK));
        loop {
            ticker.tick().await;
            let ran = queue.drain();
            if ran > 0 {
                debug!(target = "ui", tasks = ran, "applied queued widget updates");
            }
        }
    })
}
