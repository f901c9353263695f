use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use crate::Frame;

/// What travels between two stages. `EndOfStream` is always the last item on
/// a channel and is sent exactly once.
#[derive(Debug)]
pub enum StageItem {
    Frame(Frame),
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSendError {
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRecvError {
    Disconnected,
    Timeout,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub capacity: usize,
    pub depth: usize,
    pub peak_depth: usize,
    pub sent: usize,
}

#[derive(Debug)]
struct QueueCounters {
    capacity: usize,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    sent: AtomicUsize,
}

impl QueueCounters {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            sent: AtomicUsize::new(0),
        }
    }

    fn on_send(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
    }

    fn on_recv(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| d.checked_sub(1));
    }

    fn snapshot(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            depth: self.depth.load(Ordering::Relaxed),
            peak_depth: self.peak_depth.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct BoundedQueueTx<T> {
    inner: SyncSender<T>,
    counters: Arc<QueueCounters>,
}

#[derive(Debug)]
pub struct BoundedQueueRx<T> {
    inner: Receiver<T>,
    counters: Arc<QueueCounters>,
}

impl<T> BoundedQueueTx<T> {
    /// Blocks while the queue is full.
    pub fn send(&self, value: T) -> Result<(), QueueSendError> {
        self.inner
            .send(value)
            .map_err(|_| QueueSendError::Disconnected)?;
        self.counters.on_send();
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }
}

impl<T> BoundedQueueRx<T> {
    pub fn recv(&self) -> Result<T, QueueRecvError> {
        let item = self
            .inner
            .recv()
            .map_err(|_| QueueRecvError::Disconnected)?;
        self.counters.on_recv();
        Ok(item)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, QueueRecvError> {
        match self.inner.recv_timeout(timeout) {
            Ok(item) => {
                self.counters.on_recv();
                Ok(item)
            }
            Err(RecvTimeoutError::Timeout) => Err(QueueRecvError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(QueueRecvError::Disconnected),
        }
    }

    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }

    /// A handle that keeps reading this queue's counters after both ends
    /// are gone.
    pub fn probe(&self) -> QueueProbe {
        QueueProbe {
            counters: Arc::clone(&self.counters),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueProbe {
    counters: Arc<QueueCounters>,
}

impl QueueProbe {
    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }
}

/// A `sync_channel` with depth accounting. Capacity is clamped to at least 1
/// so that a full queue always means backpressure, never rendezvous.
pub fn bounded_queue<T>(capacity: usize) -> (BoundedQueueTx<T>, BoundedQueueRx<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::sync_channel(capacity);
    let counters = Arc::new(QueueCounters::new(capacity));
    (
        BoundedQueueTx {
            inner: tx,
            counters: Arc::clone(&counters),
        },
        BoundedQueueRx {
            inner: rx,
            counters,
        },
    )
}

/// Producer end of a stage channel. Sends `EndOfStream` on [`finish`] or,
/// failing that, on drop, so a downstream stage never waits on a marker that
/// will not come.
///
/// [`finish`]: StageSender::finish
#[derive(Debug)]
pub struct StageSender {
    tx: BoundedQueueTx<StageItem>,
    finished: bool,
}

impl StageSender {
    pub fn new(tx: BoundedQueueTx<StageItem>) -> Self {
        Self {
            tx,
            finished: false,
        }
    }

    pub fn send(&self, frame: Frame) -> Result<(), QueueSendError> {
        self.tx.send(StageItem::Frame(frame))
    }

    pub fn finish(mut self) {
        self.send_end_of_stream();
    }

    fn send_end_of_stream(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        // A disconnected receiver already stopped listening.
        let _ = self.tx.send(StageItem::EndOfStream);
    }
}

impl Drop for StageSender {
    fn drop(&mut self) {
        self.send_end_of_stream();
    }
}

pub fn stage_channel(capacity: usize) -> (StageSender, BoundedQueueRx<StageItem>) {
    let (tx, rx) = bounded_queue(capacity);
    (StageSender::new(tx), rx)
}
