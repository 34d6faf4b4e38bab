use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel as cb;

use super::cancellation::CancellationToken;
use crate::models::frame::{AudioSample, VideoFrame};

/// Result of offering an item to a [`MediaQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Bounded queue at capacity; the item was dropped.
    Full,
    /// The producer side has been closed; the item was dropped.
    Closed,
}

/// FIFO hand-off between one producer thread and one consumer, backed by a
/// lock-free channel.
///
/// Producers never block: a bounded queue refuses items once full. Consumers
/// block in [`pop`](Self::pop) until an item arrives, the queue is closed and
/// drained (end of stream), or their token is cancelled.
pub struct MediaQueue<T> {
    tx: cb::Sender<T>,
    rx: cb::Receiver<T>,
    closed: AtomicBool,
    // Holds at most one wake-up for a consumer parked in `pop`.
    wake_tx: cb::Sender<()>,
    wake_rx: cb::Receiver<()>,
    capacity: Option<usize>,
    high_water_mark: AtomicUsize,
}

impl<T> MediaQueue<T> {
    pub fn bounded(capacity: usize) -> Self {
        // A zero-capacity crossbeam channel is a rendezvous, which would make
        // every push fail.
        let capacity = capacity.max(1);
        Self::from_channel(cb::bounded(capacity), Some(capacity))
    }

    pub fn unbounded() -> Self {
        Self::from_channel(cb::unbounded(), None)
    }

    fn from_channel((tx, rx): (cb::Sender<T>, cb::Receiver<T>), capacity: Option<usize>) -> Self {
        let (wake_tx, wake_rx) = cb::bounded(1);
        Self {
            tx,
            rx,
            closed: AtomicBool::new(false),
            wake_tx,
            wake_rx,
            capacity,
            high_water_mark: AtomicUsize::new(0),
        }
    }

    pub fn try_push(&self, item: T) -> PushOutcome {
        if self.closed.load(Ordering::SeqCst) {
            return PushOutcome::Closed;
        }
        match self.tx.try_send(item) {
            Ok(()) => {
                self.high_water_mark.fetch_max(self.tx.len(), Ordering::Relaxed);
                PushOutcome::Queued
            }
            Err(cb::TrySendError::Full(_)) => PushOutcome::Full,
            Err(cb::TrySendError::Disconnected(_)) => PushOutcome::Closed,
        }
    }

    /// Takes the oldest item, waiting while the queue is empty and open.
    ///
    /// Returns `None` at end of stream or when `cancel` fires.
    pub fn pop(&self, cancel: &CancellationToken) -> Option<T> {
        loop {
            if let Ok(item) = self.rx.try_recv() {
                return Some(item);
            }
            if self.closed.load(Ordering::SeqCst) {
                // Anything pushed before `close` is visible by now.
                return self.rx.try_recv().ok();
            }
            if cancel.is_cancelled() {
                return None;
            }
            cb::select! {
                recv(self.rx) -> item => {
                    if let Ok(item) = item {
                        return Some(item);
                    }
                }
                recv(self.wake_rx) -> _ => {}
                recv(cancel.signal()) -> _ => return None,
            }
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Marks end of stream. Items already queued are still delivered.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.try_send(());
    }

    /// Accepts items again after [`close`](Self::close), for a restarted producer.
    pub fn reopen(&self) {
        while self.wake_rx.try_recv().is_ok() {}
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Largest depth observed since creation.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark.load(Ordering::Relaxed)
    }

    /// Discards everything queued, returning how many items were dropped.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }
}

/// Lazily pulled, ordered view over a queue.
///
/// Each `next` hands ownership of one item to the caller. The iterator ends
/// once the producer has closed the queue and every item has been taken, or
/// when the token is cancelled.
pub struct QueueReader<T> {
    queue: Arc<MediaQueue<T>>,
    cancel: CancellationToken,
}

impl<T> QueueReader<T> {
    pub fn new(queue: Arc<MediaQueue<T>>, cancel: CancellationToken) -> Self {
        Self { queue, cancel }
    }
}

impl<T> Iterator for QueueReader<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.pop(&self.cancel)
    }
}

pub type VideoFrameStream = QueueReader<VideoFrame>;
pub type AudioSampleStream = QueueReader<AudioSample>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn bounded_queue_drops_when_full() {
        let queue = MediaQueue::bounded(3);
        for i in 0..3 {
            assert_eq!(queue.try_push(i), PushOutcome::Queued);
        }
        assert_eq!(queue.try_push(99), PushOutcome::Full);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.high_water_mark(), 3);

        let token = CancellationToken::new();
        assert_eq!(queue.pop(&token), Some(0));
        assert_eq!(queue.try_push(3), PushOutcome::Queued);
    }

    #[test]
    fn unbounded_queue_accepts_everything() {
        let queue = MediaQueue::unbounded();
        for i in 0..1_000 {
            assert_eq!(queue.try_push(i), PushOutcome::Queued);
        }
        assert_eq!(queue.len(), 1_000);
        assert_eq!(queue.capacity(), None);
    }

    #[test]
    fn closed_queue_drains_then_ends() {
        let queue = Arc::new(MediaQueue::bounded(8));
        queue.try_push(1);
        queue.try_push(2);
        queue.close();
        assert_eq!(queue.try_push(3), PushOutcome::Closed);

        let items: Vec<_> = QueueReader::new(queue, CancellationToken::new()).collect();
        assert_eq!(items, vec![1, 2]);
    }

    #[test]
    fn reader_waits_for_live_producer() {
        let queue = Arc::new(MediaQueue::unbounded());
        let producer_queue = Arc::clone(&queue);
        let producer = thread::spawn(move || {
            for i in 0..5 {
                thread::sleep(Duration::from_millis(5));
                producer_queue.try_push(i);
            }
            producer_queue.close();
        });

        let items: Vec<_> = QueueReader::new(Arc::clone(&queue), CancellationToken::new()).collect();
        producer.join().unwrap();
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cancel_unblocks_consumer() {
        let queue: Arc<MediaQueue<u32>> = Arc::new(MediaQueue::unbounded());
        let token = CancellationToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });

        let started = Instant::now();
        assert_eq!(queue.pop(&token), None);
        assert!(started.elapsed() < Duration::from_secs(2));
        canceller.join().unwrap();
    }

    #[test]
    fn close_wakes_parked_consumer() {
        let queue: Arc<MediaQueue<u32>> = Arc::new(MediaQueue::bounded(4));
        let consumer_queue = Arc::clone(&queue);
        let consumer = thread::spawn(move || {
            let started = Instant::now();
            let item = consumer_queue.pop(&CancellationToken::new());
            (item, started.elapsed())
        });

        thread::sleep(Duration::from_millis(30));
        queue.close();
        let (item, waited) = consumer.join().unwrap();
        assert_eq!(item, None);
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn zero_capacity_still_holds_one_item() {
        let queue = MediaQueue::bounded(0);
        assert_eq!(queue.try_push(1), PushOutcome::Queued);
        assert_eq!(queue.try_push(2), PushOutcome::Full);
        assert_eq!(queue.capacity(), Some(1));
    }

    #[test]
    fn reopen_accepts_again() {
        let queue = MediaQueue::bounded(2);
        queue.close();
        queue.reopen();
        assert_eq!(queue.try_push(1), PushOutcome::Queued);
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
    }
}
