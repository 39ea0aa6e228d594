//! Applies received datasets off the connection task.
use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};

use super::InitGate;
use crate::{
    model::Data,
    status::{DataUpdater, StateType},
};

/// Pending datasets beyond this are dropped.
pub(crate) const QUEUE_CAPACITY: usize = 10;

enum Task {
    Apply(Box<Data>),
    Stop,
}

pub(crate) struct Worker {
    sender: mpsc::Sender<Task>,
    join_handle: JoinHandle<()>,
    enqueue_timeout: Duration,
    resync: mpsc::Sender<()>,
}

impl Worker {
    /// Start applying on a blocking thread. Failed applications and dropped datasets are reported
    /// through `resync`.
    pub fn spawn(
        updater: Arc<DataUpdater>,
        gate: Arc<InitGate>,
        resync: mpsc::Sender<()>,
        enqueue_timeout: Duration,
    ) -> Worker {
        let (sender, mut receiver) = mpsc::channel(QUEUE_CAPACITY);
        let join_handle = {
            let resync = resync.clone();
            tokio::task::spawn_blocking(move || {
                while let Some(task) = receiver.blocking_recv() {
                    let data = match task {
                        Task::Apply(data) => data,
                        Task::Stop => break,
                    };
                    if !updater.apply_data(*data) {
                        // Full channel means a resync is already pending.
                        let _ = resync.try_send(());
                    } else if updater.storage_initialized() {
                        gate.resolve(true);
                        updater.update_status(StateType::Ok, None);
                    }
                }
                log::debug!(target: "ffc", "apply worker stopped");
            })
        };
        Worker {
            sender,
            join_handle,
            enqueue_timeout,
            resync,
        }
    }

    /// Queue a dataset.
    ///
    /// Returns `false` if it was dropped because the queue stayed full. A resync is then requested
    /// so the dropped update is received again.
    pub async fn enqueue(&self, data: Box<Data>) -> bool {
        let queued = self
            .sender
            .send_timeout(Task::Apply(data), self.enqueue_timeout)
            .await
            .is_ok();
        if !queued {
            log::warn!(target: "ffc", "apply queue is full, dataset dropped, requesting a resync");
            let _ = self.resync.try_send(());
        }
        queued
    }

    /// Let queued datasets drain, then wait up to `timeout` for the worker to exit.
    pub async fn stop(self, timeout: Duration) {
        // Error means the worker already exited.
        let _ = self.sender.send(Task::Stop).await;
        if tokio::time::timeout(timeout, self.join_handle).await.is_err() {
            log::warn!(target: "ffc", "apply worker did not stop within {timeout:?}");
        }
    }
}
