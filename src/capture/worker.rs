//! Dedicated capture workers
//!
//! Each capture path gets one OS thread fed through a bounded channel.
//! Producers (camera and microphone callbacks) never block: when the channel
//! is full the buffer is dropped and counted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct WorkerCounters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Cloneable producer side of a worker
pub struct WorkerSender<T> {
    tx: SyncSender<T>,
    counters: Arc<WorkerCounters>,
}

impl<T> Clone for WorkerSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<T> WorkerSender<T> {
    /// Hand an item to the worker without blocking; false if it was dropped
    pub fn submit(&self, item: T) -> bool {
        if self.counters.closed.load(Ordering::Relaxed) {
            return false;
        }
        match self.tx.try_send(item) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

/// Counts for a finished worker
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub submitted: u64,
    pub dropped: u64,
}

/// One worker thread processing items in arrival order
pub struct CaptureWorker<T> {
    name: String,
    sender: WorkerSender<T>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> CaptureWorker<T> {
    /// Start a worker that calls `handler` for every submitted item
    pub fn spawn<F>(name: &str, depth: usize, mut handler: F) -> std::io::Result<Self>
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, rx): (SyncSender<T>, Receiver<T>) = sync_channel(depth.max(1));
        let counters = Arc::new(WorkerCounters::default());
        let thread_counters = Arc::clone(&counters);

        let handle = std::thread::Builder::new()
            .name(format!("racemaster-{name}"))
            .spawn(move || loop {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(item) => handler(item),
                    Err(RecvTimeoutError::Timeout) => {
                        if thread_counters.closed.load(Ordering::Relaxed) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        tracing::debug!("Started {} worker (queue depth {})", name, depth.max(1));

        Ok(Self {
            name: name.to_string(),
            sender: WorkerSender { tx, counters },
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> WorkerSender<T> {
        self.sender.clone()
    }

    pub fn submit(&self, item: T) -> bool {
        self.sender.submit(item)
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            submitted: self.sender.counters.submitted.load(Ordering::Relaxed),
            dropped: self.sender.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Refuse new items, let the worker drain what is queued, and join it
    pub fn shutdown(mut self) -> WorkerStats {
        self.close();
        self.stats()
    }

    fn close(&mut self) {
        self.sender.counters.closed.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("{} worker panicked", self.name);
            }
            let stats = self.stats();
            tracing::info!(
                "{} worker stopped: {} processed, {} dropped",
                self.name,
                stats.submitted,
                stats.dropped
            );
        }
    }
}

impl<T> Drop for CaptureWorker<T> {
    fn drop(&mut self) {
        self.sender.counters.closed.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::mpsc::channel;

    #[test]
    fn test_items_processed_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let worker = CaptureWorker::spawn("order", 64, move |i: u32| sink.lock().push(i)).unwrap();

        for i in 0..50 {
            assert!(worker.submit(i));
        }
        let stats = worker.shutdown();

        assert_eq!(stats.submitted, 50);
        assert_eq!(stats.dropped, 0);
        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let (gate_tx, gate_rx) = channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let worker = CaptureWorker::spawn("slow", 1, move |_: u32| {
            let _ = gate_rx.lock().recv();
        })
        .unwrap();

        // The first item may be taken by the worker, leaving room for one more;
        // the rest cannot fit
        let accepted = (0..10).filter(|i| worker.submit(*i)).count();
        assert!(accepted <= 2);
        assert_eq!(worker.stats().dropped, 10 - accepted as u64);

        drop(gate_tx);
        worker.shutdown();
    }

    #[test]
    fn test_submit_after_close_is_refused() {
        let worker = CaptureWorker::spawn("closed", 4, |_: u32| {}).unwrap();
        let sender = worker.sender();
        worker.shutdown();
        assert!(!sender.submit(1));
    }
}
