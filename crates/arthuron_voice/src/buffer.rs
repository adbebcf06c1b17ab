//! Bounded audio pipe between the relay worker and HTTP stream consumers.

use arthuron_core::AudioFrame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

struct Inner {
    frames: VecDeque<AudioFrame>,
    closed: bool,
}

/// Bounded FIFO of audio frames.
///
/// The producer never waits: when the buffer is full the incoming frame is
/// discarded and counted, so already-buffered audio stays contiguous.
/// Consumers wait in [`pull`](Self::pull) until a frame arrives or the buffer
/// is closed. Concurrent consumers compete for frames; each frame goes to
/// exactly one of them.
pub struct AudioBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl AudioBuffer {
    /// Create a buffer holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The critical sections cannot panic, recover the guard regardless.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a frame without blocking.
    ///
    /// Returns `false` when the frame was dropped because the buffer is full
    /// or closed.
    pub fn push(&self, frame: AudioFrame) -> bool {
        {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }
            if inner.frames.len() >= self.capacity {
                drop(inner);
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(total, "Audio buffer full, dropping frame");
                return false;
            }
            inner.frames.push_back(frame);
        }
        self.notify.notify_waiters();
        true
    }

    /// Wait for the next frame.
    ///
    /// Returns `None` once the buffer is closed and empty.
    pub async fn pull(&self) -> Option<AudioFrame> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting the queue so a push in between is not missed.
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take the next frame if one is buffered.
    pub fn try_pull(&self) -> Option<AudioFrame> {
        self.lock().frames.pop_front()
    }

    /// Stop accepting frames and release every waiting consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(tag: &'static str) -> AudioFrame {
        AudioFrame::from(tag.as_bytes())
    }

    #[tokio::test]
    async fn test_full_buffer_drops_newest() {
        let buffer = AudioBuffer::new(3);
        for tag in ["A", "B", "C", "D", "E"] {
            buffer.push(frame(tag));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 2);
        assert_eq!(buffer.pull().await, Some(frame("A")));
        assert_eq!(buffer.pull().await, Some(frame("B")));
        assert_eq!(buffer.pull().await, Some(frame("C")));
        assert!(buffer.try_pull().is_none());
    }

    #[tokio::test]
    async fn test_space_frees_after_pull() {
        let buffer = AudioBuffer::new(1);
        assert!(buffer.push(frame("A")));
        assert!(!buffer.push(frame("B")));
        assert_eq!(buffer.pull().await, Some(frame("A")));
        assert!(buffer.push(frame("C")));
        assert_eq!(buffer.pull().await, Some(frame("C")));
    }

    #[tokio::test]
    async fn test_pull_waits_for_push() {
        let buffer = Arc::new(AudioBuffer::new(4));
        let consumer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.pull().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());
        buffer.push(frame("late"));
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake")
            .unwrap();
        assert_eq!(got, Some(frame("late")));
    }

    #[tokio::test]
    async fn test_close_releases_waiting_consumer() {
        let buffer = Arc::new(AudioBuffer::new(4));
        let consumer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.pull().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.close();
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("close should release pull")
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_closed_buffer_drains_then_ends() {
        let buffer = AudioBuffer::new(4);
        buffer.push(frame("A"));
        buffer.close();
        assert!(!buffer.push(frame("B")));
        assert_eq!(buffer.pull().await, Some(frame("A")));
        assert_eq!(buffer.pull().await, None);
        // Rejected-after-close is not an overflow
        assert_eq!(buffer.dropped(), 0);
    }

    #[tokio::test]
    async fn test_competing_consumers_each_get_distinct_frames() {
        let buffer = Arc::new(AudioBuffer::new(8));
        let a = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.pull().await })
        };
        let b = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.pull().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.push(frame("1"));
        buffer.push(frame("2"));
        let mut got = vec![a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
        got.sort_by(|x, y| x.as_bytes().cmp(y.as_bytes()));
        assert_eq!(got, vec![frame("1"), frame("2")]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = AudioBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        assert!(buffer.push(frame("A")));
    }
}
