use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::routes::SubmissionMessage;

/// FIFO hand-off between the HTTP layer and the bounded worker pool. The pool
/// size, not the queue, is what limits concurrent sandbox executions.
pub struct SubmissionQueue {
    queue: Mutex<VecDeque<SubmissionMessage>>,
    notify: Notify,
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, message: SubmissionMessage) {
        self.queue.lock().await.push_back(message);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> SubmissionMessage {
        loop {
            if let Some(message) = self.queue.lock().await.pop_front() {
                return message;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }
}

impl Default for SubmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = SubmissionQueue::new();
        queue
            .push(SubmissionMessage::FireAndForget { submission_id: 1 })
            .await;
        queue
            .push(SubmissionMessage::FireAndForget { submission_id: 2 })
            .await;
        assert_eq!(queue.pop().await.id(), 1);
        assert_eq!(queue.pop().await.id(), 2);
        assert!(queue.is_empty().await);
    }
}
