//! Per-conversation turn serialization.
//!
//! A turn takes its place in line when it is enqueued, so turns that share a
//! conversation id run one at a time in the order they were enqueued. Turns
//! of different conversations never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ConversationGate {
    /// Latest enqueued turn per conversation; closes when that turn ends
    tails: Arc<Mutex<HashMap<String, oneshot::Receiver<()>>>>,
}

/// A place in line, taken synchronously
#[derive(Debug)]
pub struct TurnTicket {
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

/// Held for the duration of one turn
#[derive(Debug)]
pub struct TurnPermit {
    _done: oneshot::Sender<()>,
}

impl ConversationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next place in line for `conversation_id`.
    pub fn enqueue(&self, conversation_id: &str) -> TurnTicket {
        let (done, tail) = oneshot::channel();
        let mut tails = self
            .tails
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tails.retain(|_, rx| !matches!(rx.try_recv(), Err(TryRecvError::Closed)));
        let previous = tails.insert(conversation_id.to_string(), tail);
        debug!(
            conversation_id,
            queued = previous.is_some(),
            conversations = tails.len(),
            "turn enqueued"
        );
        TurnTicket { previous, done }
    }
}

impl TurnTicket {
    /// Wait until every turn enqueued before this one has finished.
    pub async fn wait(self) -> TurnPermit {
        if let Some(previous) = self.previous {
            // The previous turn signals by dropping its sender.
            let _ = previous.await;
        }
        TurnPermit { _done: self.done }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_conversation_waits_for_previous_turn() {
        let gate = ConversationGate::new();
        let first = gate.enqueue("c-1").wait().await;

        let waiter = tokio::spawn(gate.enqueue("c-1").wait());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("second turn proceeds")
            .expect("join");
    }

    #[tokio::test]
    async fn test_turns_run_in_enqueue_order_not_poll_order() {
        let gate = ConversationGate::new();
        let first = gate.enqueue("c-1");
        let second = gate.enqueue("c-1");

        // The later ticket is polled first and still has to wait.
        let second = tokio::spawn(second.wait());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        let first = tokio::time::timeout(Duration::from_millis(50), first.wait())
            .await
            .expect("first turn is not blocked");
        assert!(!second.is_finished());
        drop(first);
        tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .expect("second turn proceeds")
            .expect("join");
    }

    #[tokio::test]
    async fn test_different_conversations_do_not_wait() {
        let gate = ConversationGate::new();
        let _first = gate.enqueue("c-1").wait().await;
        let other = tokio::time::timeout(Duration::from_millis(50), gate.enqueue("c-2").wait()).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_finished_conversations_are_pruned() {
        let gate = ConversationGate::new();
        drop(gate.enqueue("c-1").wait().await);
        let _next = gate.enqueue("c-2").wait().await;
        let tails = gate.tails.lock().expect("lock");
        assert_eq!(tails.len(), 1);
        assert!(tails.contains_key("c-2"));
    }
}
