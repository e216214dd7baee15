//! Batch queues between the two roles
//!
//! Each role reads from exactly one queue and writes to exactly one queue.
//! The queues carry `Message<Batch>`: a consumer stops on `Shutdown` and
//! re-emits it downstream on exit (see [`ShutdownGuard`]).
//!
//! The [`BatchSource`] and [`BatchSink`] traits let the same role loops run
//! over an in-process channel or over the pipes of the checker process.

use crate::error::WorkerError;
use crate::walker::types::{Batch, Message};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Something a role can pull batches from
pub trait BatchSource {
    /// Block until the next message. A closed source reads as `Shutdown`.
    fn recv(&mut self) -> Message<Batch>;
}

/// Something a role can push batches to
pub trait BatchSink {
    fn send(&mut self, msg: Message<Batch>) -> Result<(), WorkerError>;
}

/// Statistics for a batch queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Batches enqueued
    pub enqueued: AtomicU64,

    /// Batches dequeued
    pub dequeued: AtomicU64,

    /// Paths carried by all enqueued batches
    pub paths: AtomicU64,
}

impl QueueStats {
    /// Get number of batches dequeued
    pub fn throughput(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    /// Get number of paths that went through the queue
    pub fn path_count(&self) -> u64 {
        self.paths.load(Ordering::Relaxed)
    }
}

/// Unbounded FIFO of batches
///
/// The walk is level-synchronous, so at most one batch is ever in flight
/// per queue; backpressure is not needed.
pub struct BatchQueue {
    name: &'static str,
    sender: Sender<Message<Batch>>,
    receiver: Receiver<Message<Batch>>,
    stats: Arc<QueueStats>,
}

impl BatchQueue {
    /// Create a queue; `name` is the role that consumes it
    pub fn new(name: &'static str) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            name,
            sender,
            receiver,
            stats: Arc::new(QueueStats::default()),
        }
    }

    pub fn sender(&self) -> BatchSender {
        BatchSender {
            name: self.name,
            sender: self.sender.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn receiver(&self) -> BatchReceiver {
        BatchReceiver {
            receiver: self.receiver.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Seed the queue with the root directory
    pub fn seed(&self, batch: Batch) -> Result<(), WorkerError> {
        self.sender().send(Message::Work(batch))
    }
}

/// Handle for sending batches
#[derive(Clone)]
pub struct BatchSender {
    name: &'static str,
    sender: Sender<Message<Batch>>,
    stats: Arc<QueueStats>,
}

impl BatchSender {
    pub fn send(&self, msg: Message<Batch>) -> Result<(), WorkerError> {
        if let Message::Work(batch) = &msg {
            self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            self.stats
                .paths
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
        }
        self.sender
            .send(msg)
            .map_err(|_| WorkerError::QueueClosed(self.name))
    }
}

impl BatchSink for BatchSender {
    fn send(&mut self, msg: Message<Batch>) -> Result<(), WorkerError> {
        BatchSender::send(self, msg)
    }
}

/// Handle for receiving batches
#[derive(Clone)]
pub struct BatchReceiver {
    receiver: Receiver<Message<Batch>>,
    stats: Arc<QueueStats>,
}

impl BatchReceiver {
    /// Block until a message arrives; a disconnected queue reads as shutdown
    pub fn recv(&self) -> Message<Batch> {
        match self.receiver.recv() {
            Ok(msg) => {
                if !msg.is_shutdown() {
                    self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                }
                msg
            }
            Err(_) => Message::Shutdown,
        }
    }

    pub fn try_recv(&self) -> Option<Message<Batch>> {
        self.receiver.try_recv().ok()
    }
}

impl BatchSource for BatchReceiver {
    fn recv(&mut self) -> Message<Batch> {
        BatchReceiver::recv(self)
    }
}

/// RAII guard that sends `Shutdown` downstream when a role exits
///
/// Runs on every exit path, including fatal errors, so the counterpart
/// never blocks forever on its input.
pub struct ShutdownGuard<'a, K: BatchSink> {
    role: &'static str,
    sink: &'a mut K,
}

impl<'a, K: BatchSink> ShutdownGuard<'a, K> {
    pub fn new(role: &'static str, sink: &'a mut K) -> Self {
        Self { role, sink }
    }

    pub fn sink(&mut self) -> &mut K {
        &mut *self.sink
    }
}

impl<K: BatchSink> Drop for ShutdownGuard<'_, K> {
    fn drop(&mut self) {
        if let Err(e) = self.sink.send(Message::Shutdown) {
            // Counterpart already gone
            debug!(role = self.role, error = %e, "Shutdown not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::types::DirPath;

    #[test]
    fn test_queue_basic() {
        let queue = BatchQueue::new("checker");
        queue.seed(Batch::root("/test")).unwrap();
        assert!(!queue.is_empty());
        assert_eq!(queue.len(), 1);

        let receiver = queue.receiver();
        match receiver.recv() {
            Message::Work(batch) => {
                assert_eq!(batch.depth, 0);
                assert_eq!(batch.paths, vec![DirPath::from("/test")]);
            }
            Message::Shutdown => panic!("expected work"),
        }
    }

    #[test]
    fn test_disconnected_reads_as_shutdown() {
        let queue = BatchQueue::new("scanner");
        let receiver = queue.receiver();
        drop(queue);
        assert!(receiver.recv().is_shutdown());
    }

    #[test]
    fn test_queue_stats() {
        let queue = BatchQueue::new("checker");
        let sender = queue.sender();
        let receiver = queue.receiver();

        sender
            .send(Message::Work(Batch::new(1, vec!["/a".into(), "/b".into()])))
            .unwrap();
        sender.send(Message::Shutdown).unwrap();

        receiver.recv();
        receiver.recv();

        let stats = queue.stats();
        assert_eq!(stats.enqueued.load(Ordering::Relaxed), 1);
        assert_eq!(stats.throughput(), 1);
        assert_eq!(stats.path_count(), 2);
    }

    #[test]
    fn test_shutdown_guard_fires_on_drop() {
        let queue = BatchQueue::new("scanner");
        let mut sender = queue.sender();
        {
            let mut guard = ShutdownGuard::new("checker", &mut sender);
            guard
                .sink()
                .send(Message::Work(Batch::root("/x")))
                .unwrap();
        }

        let receiver = queue.receiver();
        assert!(!receiver.recv().is_shutdown());
        assert!(receiver.recv().is_shutdown());
    }
}
