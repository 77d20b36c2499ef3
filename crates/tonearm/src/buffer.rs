//! Shared PCM byte buffer between the decode producer and the playback
//! consumer.
//!
//! One mutex guards the byte deque, the playback position and the seek
//! bookkeeping; a single [`Condvar`] is the "state changed" signal for both
//! sides. Only the producer appends, only the consumer removes; a seek clears
//! the buffer and repositions atomically. Every blocking wait is sliced with
//! a timeout so a stop request is never starved.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Upper bound for any single blocking wait inside the buffer.
const WAIT_SLICE: Duration = Duration::from_millis(50);

pub struct PcmBuffer {
    inner: Mutex<Inner>,
    cv: Condvar,
    max_bytes: usize,
}

struct Inner {
    data: VecDeque<u8>,
    /// Bytes consumed since session start, adjusted on seek.
    position: u64,
    /// Bumped on every seek; producer output tagged with an older epoch is
    /// rejected so stale pre-seek audio never enters the buffer.
    epoch: u64,
    /// Seek target (source milliseconds) awaiting the producer thread.
    pending_seek: Option<u64>,
    eof: bool,
    failed: bool,
    stopped: bool,
}

/// Resolved seek target, computed under the buffer lock.
#[derive(Clone, Copy, Debug)]
pub struct SeekTarget {
    /// New playback position in output bytes.
    pub position_bytes: u64,
    /// Target handed to the media source, in milliseconds.
    pub source_ms: u64,
}

impl PcmBuffer {
    /// Create a buffer capped (softly) at `max_bytes` of decoded-ahead audio.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: VecDeque::new(),
                position: 0,
                epoch: 0,
                pending_seek: None,
                eof: false,
                failed: false,
                stopped: false,
            }),
            cv: Condvar::new(),
            max_bytes: max_bytes.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current seek epoch. The producer captures this before decoding and
    /// passes it back to [`PcmBuffer::push_back`].
    pub fn epoch(&self) -> u64 {
        self.inner.lock().unwrap().epoch
    }

    /// Bytes consumed so far (best-effort snapshot).
    pub fn position(&self) -> u64 {
        self.inner.lock().unwrap().position
    }

    /// Append producer output, blocking while the buffer is at capacity.
    ///
    /// Returns `false` without appending when the session stopped or the
    /// epoch went stale (a seek happened after `bytes` were decoded).
    pub fn push_back(&self, bytes: &[u8], epoch: u64) -> bool {
        let mut g = self.inner.lock().unwrap();
        loop {
            if g.stopped || g.epoch != epoch {
                return false;
            }
            if g.data.len() < self.max_bytes {
                break;
            }
            let (ng, _timeout) = self.cv.wait_timeout(g, WAIT_SLICE).unwrap();
            g = ng;
        }
        g.data.extend(bytes.iter().copied());
        drop(g);
        self.cv.notify_all();
        true
    }

    /// Remove and return up to `max` bytes from the front.
    pub fn pop_chunk(&self, max: usize) -> Vec<u8> {
        let mut g = self.inner.lock().unwrap();
        let take = g.data.len().min(max);
        let out: Vec<u8> = g.data.drain(..take).collect();
        drop(g);
        if !out.is_empty() {
            self.cv.notify_all();
        }
        out
    }

    /// Account for `written` bytes reaching the sink and return unwritten
    /// leftovers to the front, oldest byte first. No bytes are ever dropped
    /// between a pop and its commit.
    pub fn commit(&self, written: u64, leftover: &[u8]) {
        let mut g = self.inner.lock().unwrap();
        g.position = g.position.saturating_add(written);
        for &b in leftover.iter().rev() {
            g.data.push_front(b);
        }
    }

    /// Apply a seek atomically: `f` maps the current position to a target;
    /// the buffer is cleared, the position moved, the epoch bumped and the
    /// source-level reposition parked for the producer, all under one lock,
    /// so the consumer can never drain pre-seek bytes at a post-seek
    /// position.
    pub fn seek_with(&self, f: impl FnOnce(u64) -> SeekTarget) -> SeekTarget {
        let mut g = self.inner.lock().unwrap();
        let target = f(g.position);
        g.data.clear();
        g.position = target.position_bytes;
        g.epoch += 1;
        g.pending_seek = Some(target.source_ms);
        drop(g);
        self.cv.notify_all();
        target
    }

    /// Take the parked source-level seek target, if any. Producer only.
    pub fn take_pending_seek(&self) -> Option<u64> {
        self.inner.lock().unwrap().pending_seek.take()
    }

    /// Wait briefly for buffered data; `true` if any is available.
    pub fn wait_for_data(&self) -> bool {
        let g = self.inner.lock().unwrap();
        if !g.data.is_empty() || g.stopped || g.eof {
            return !g.data.is_empty();
        }
        let (g, _timeout) = self.cv.wait_timeout(g, WAIT_SLICE).unwrap();
        !g.data.is_empty()
    }

    /// Producer reached end of stream; remaining bytes may still be drained.
    pub fn mark_eof(&self) {
        let mut g = self.inner.lock().unwrap();
        g.eof = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Producer hit an unrecoverable failure.
    pub fn mark_failed(&self) {
        let mut g = self.inner.lock().unwrap();
        g.eof = true;
        g.failed = true;
        drop(g);
        self.cv.notify_all();
    }

    pub fn has_failed(&self) -> bool {
        self.inner.lock().unwrap().failed
    }

    /// End of stream reached and every buffered byte consumed.
    pub fn is_drained(&self) -> bool {
        let g = self.inner.lock().unwrap();
        g.eof && g.data.is_empty()
    }

    /// Request stop and wake every blocked waiter. Idempotent.
    pub fn stop(&self) {
        let mut g = self.inner.lock().unwrap();
        g.stopped = true;
        drop(g);
        self.cv.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().unwrap().stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_preserves_byte_order() {
        let buf = PcmBuffer::new(1024);
        assert!(buf.push_back(&[1, 2, 3, 4], buf.epoch()));
        assert!(buf.push_back(&[5, 6], buf.epoch()));
        assert_eq!(buf.pop_chunk(3), vec![1, 2, 3]);
        assert_eq!(buf.pop_chunk(16), vec![4, 5, 6]);
        assert!(buf.pop_chunk(16).is_empty());
    }

    #[test]
    fn commit_returns_leftover_to_front_in_order() {
        let buf = PcmBuffer::new(1024);
        assert!(buf.push_back(&[1, 2, 3, 4, 5, 6], buf.epoch()));
        let chunk = buf.pop_chunk(4);
        assert_eq!(chunk, vec![1, 2, 3, 4]);
        // Sink accepted two bytes; the rest goes back to the front.
        buf.commit(2, &chunk[2..]);
        assert_eq!(buf.position(), 2);
        assert_eq!(buf.pop_chunk(16), vec![3, 4, 5, 6]);
    }

    #[test]
    fn seek_clears_buffer_and_repositions() {
        let buf = PcmBuffer::new(1024);
        assert!(buf.push_back(&[9; 32], buf.epoch()));
        let chunk = buf.pop_chunk(8);
        buf.commit(8, &[]);
        assert_eq!(chunk.len(), 8);

        let target = buf.seek_with(|pos| {
            assert_eq!(pos, 8);
            SeekTarget {
                position_bytes: 400,
                source_ms: 100,
            }
        });
        assert_eq!(target.position_bytes, 400);
        assert!(buf.is_empty());
        assert_eq!(buf.position(), 400);
        assert_eq!(buf.take_pending_seek(), Some(100));
        assert_eq!(buf.take_pending_seek(), None);
    }

    #[test]
    fn stale_epoch_appends_are_rejected() {
        let buf = PcmBuffer::new(1024);
        let before = buf.epoch();
        buf.seek_with(|_| SeekTarget {
            position_bytes: 0,
            source_ms: 0,
        });
        // Bytes decoded before the seek never reach the buffer.
        assert!(!buf.push_back(&[1, 2, 3], before));
        assert!(buf.is_empty());
        assert!(buf.push_back(&[7, 8], buf.epoch()));
        assert_eq!(buf.pop_chunk(16), vec![7, 8]);
    }

    #[test]
    fn push_back_blocks_at_capacity_until_consumer_drains() {
        let buf = Arc::new(PcmBuffer::new(8));
        assert!(buf.push_back(&[0; 8], buf.epoch()));

        let producer = {
            let buf = buf.clone();
            thread::spawn(move || buf.push_back(&[1; 4], buf.epoch()))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(buf.pop_chunk(8).len(), 8);
        assert!(producer.join().unwrap());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn stop_unblocks_a_full_buffer_push() {
        let buf = Arc::new(PcmBuffer::new(4));
        assert!(buf.push_back(&[0; 4], buf.epoch()));

        let producer = {
            let buf = buf.clone();
            thread::spawn(move || buf.push_back(&[1; 4], buf.epoch()))
        };
        thread::sleep(Duration::from_millis(20));
        buf.stop();
        assert!(!producer.join().unwrap());
    }

    #[test]
    fn concurrent_append_and_drain_reconstructs_the_stream() {
        let buf = Arc::new(PcmBuffer::new(256));
        let total: usize = 40_000;

        let producer = {
            let buf = buf.clone();
            thread::spawn(move || {
                let epoch = buf.epoch();
                let mut next = 0u8;
                let mut sent = 0;
                while sent < total {
                    let chunk: Vec<u8> = (0..64)
                        .map(|_| {
                            let b = next;
                            next = next.wrapping_add(1);
                            b
                        })
                        .collect();
                    assert!(buf.push_back(&chunk, epoch));
                    sent += chunk.len();
                }
                buf.mark_eof();
            })
        };

        let mut seen = Vec::with_capacity(total);
        while !buf.is_drained() {
            let chunk = buf.pop_chunk(100);
            if chunk.is_empty() {
                buf.wait_for_data();
                continue;
            }
            let n = chunk.len() as u64;
            seen.extend_from_slice(&chunk);
            buf.commit(n, &[]);
        }
        producer.join().unwrap();

        assert_eq!(seen.len(), total);
        for (i, b) in seen.iter().enumerate() {
            assert_eq!(*b, (i % 256) as u8, "byte {i} out of order");
        }
        assert_eq!(buf.position(), total as u64);
    }

    #[test]
    fn drained_requires_eof_and_empty() {
        let buf = PcmBuffer::new(64);
        assert!(!buf.is_drained());
        assert!(buf.push_back(&[1], buf.epoch()));
        buf.mark_eof();
        assert!(!buf.is_drained());
        buf.pop_chunk(1);
        assert!(buf.is_drained());
    }

    #[test]
    fn failure_marks_eof_too() {
        let buf = PcmBuffer::new(64);
        buf.mark_failed();
        assert!(buf.has_failed());
        assert!(buf.is_drained());
    }
}
