//! Bounded per-source frame queue with drop-oldest overflow.
//!
//! The scorer must never block on a slow consumer, and recent scores
//! matter more than complete ones — on overflow the oldest unconsumed
//! frame is evicted. Built directly on a deque because channel types
//! cannot evict from the head.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use herdwatch_core::types::FrameScore;

pub struct FrameQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

struct Inner {
    frames: VecDeque<FrameScore>,
    closed: bool,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue a frame without blocking.
    ///
    /// Returns the frame that was dropped to make room, if any: the oldest
    /// unconsumed frame on overflow, or the pushed frame itself when the
    /// queue is closed.
    pub fn push(&self, frame: FrameScore) -> Option<FrameScore> {
        let dropped = {
            let mut inner = self.lock();
            if inner.closed {
                return Some(frame);
            }
            let dropped = if inner.frames.len() >= self.capacity {
                inner.frames.pop_front()
            } else {
                None
            };
            inner.frames.push_back(frame);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Receive the next frame, waiting if the queue is empty.
    /// Returns `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<FrameScore> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue: pending frames remain receivable, new pushes drop.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a panic elsewhere; the queue data is
        // a plain deque and stays usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, Utc};
    use herdwatch_core::types::ImageRef;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn frame(i: i64) -> FrameScore {
        FrameScore {
            capture_time: t0() + TimeDelta::seconds(i),
            confidence: 0.5,
            image_ref: ImageRef::new(format!("frame-{i}.jpg")),
        }
    }

    #[tokio::test]
    async fn fifo_order() {
        let queue = FrameQueue::new(8);
        assert!(queue.push(frame(1)).is_none());
        assert!(queue.push(frame(2)).is_none());
        assert_eq!(queue.recv().await.map(|f| f.capture_time), Some(frame(1).capture_time));
        assert_eq!(queue.recv().await.map(|f| f.capture_time), Some(frame(2).capture_time));
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let queue = FrameQueue::new(3);
        for i in 1..=3 {
            assert!(queue.push(frame(i)).is_none());
        }
        let dropped = queue.push(frame(4)).expect("oldest evicted");
        assert_eq!(dropped.capture_time, frame(1).capture_time);
        assert_eq!(queue.len(), 3);

        // Remaining frames are 2, 3, 4 in order.
        for expected in 2..=4 {
            let got = queue.recv().await.expect("frame");
            assert_eq!(got.capture_time, frame(expected).capture_time);
        }
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let queue = Arc::new(FrameQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.push(frame(7));
        let got = consumer.await.expect("join").expect("frame");
        assert_eq!(got.capture_time, frame(7).capture_time);
    }

    #[tokio::test]
    async fn close_wakes_pending_recv_with_none() {
        let queue = Arc::new(FrameQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.close();
        assert!(consumer.await.expect("join").is_none());
    }

    #[tokio::test]
    async fn close_drains_before_none() {
        let queue = FrameQueue::new(4);
        queue.push(frame(1));
        queue.close();
        assert!(queue.recv().await.is_some(), "buffered frame still delivered");
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn push_after_close_drops_new_frame() {
        let queue = FrameQueue::new(4);
        queue.close();
        let dropped = queue.push(frame(9)).expect("push on closed queue drops");
        assert_eq!(dropped.capture_time, frame(9).capture_time);
    }

    #[tokio::test]
    async fn zero_capacity_clamped_to_one() {
        let queue = FrameQueue::new(0);
        assert!(queue.push(frame(1)).is_none());
        assert!(queue.push(frame(2)).is_some());
    }
}
