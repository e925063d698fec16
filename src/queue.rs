use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::models::DownloadTask;

/// Consumer side of the task queue, shared by every worker.
///
/// Whichever worker is free first takes the next task.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    receiver: Arc<Mutex<mpsc::Receiver<DownloadTask>>>,
}

/// Creates a queue holding at most one task in flight between producer and
/// workers, so the producer waits until a worker is ready.
pub fn task_queue() -> (mpsc::Sender<DownloadTask>, TaskQueue) {
    let (sender, receiver) = mpsc::channel(1);
    let queue = TaskQueue {
        receiver: Arc::new(Mutex::new(receiver)),
    };
    (sender, queue)
}

impl TaskQueue {
    /// Waits for the next task. Returns `None` once the producer is done and
    /// the queue is empty.
    pub async fn next(&self) -> Option<DownloadTask> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await
    }
}
