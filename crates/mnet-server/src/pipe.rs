//! Receive pipe: the byte buffer between the socket pump and the decoder.
//!
//! The writer side is fed from the socket pump on a runtime worker. Each
//! flush schedules the reader continuation on the session's completion
//! queue, so the reader side is only ever touched on the session thread.
//! At most one continuation is pending at a time; it takes every byte that
//! has been written so far.
//!
//! Once the unread bytes reach the pause threshold, `write` reports
//! `is_paused` and the pump waits in [`RecvPipe::resumed`] until the reader
//! has drained the buffer.

use crate::completion::CompletionQueue;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// Outcome of a writer-side flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    /// The reader is gone; the writer should stop.
    pub is_completed: bool,
    /// The reader is behind; the writer should wait for [`RecvPipe::resumed`].
    pub is_paused: bool,
}

/// Bytes handed to the reader continuation.
#[derive(Debug)]
pub struct ReadResult {
    pub buffer: BytesMut,
    /// The writer has finished; no more bytes will follow this batch.
    pub is_completed: bool,
}

pub struct RecvPipe<C> {
    state: Mutex<PipeState>,
    queue: Arc<CompletionQueue<C>>,
    resume: fn(&mut C),
    pause_threshold: usize,
    drained: Notify,
}

#[derive(Default)]
struct PipeState {
    buffer: BytesMut,
    writer_completed: bool,
    completed: bool,
    scheduled: bool,
}

impl<C: 'static> RecvPipe<C> {
    /// Create a pipe whose reader continuation is `resume`, run on `queue`.
    /// Writes report `is_paused` while `pause_threshold` or more bytes are
    /// unread.
    pub fn new(queue: Arc<CompletionQueue<C>>, resume: fn(&mut C), pause_threshold: usize) -> Self {
        Self {
            state: Mutex::new(PipeState::default()),
            queue,
            resume,
            pause_threshold: pause_threshold.max(1),
            drained: Notify::new(),
        }
    }

    /// Append bytes at the writer cursor and flush them to the reader.
    pub fn write(&self, data: &[u8]) -> FlushResult {
        let mut state = self.state.lock();
        if state.completed || state.writer_completed {
            return FlushResult {
                is_completed: true,
                is_paused: false,
            };
        }
        state.buffer.extend_from_slice(data);
        let is_paused = state.buffer.len() >= self.pause_threshold;
        let schedule = !std::mem::replace(&mut state.scheduled, true);
        drop(state);

        if schedule {
            self.schedule_reader();
        }
        FlushResult {
            is_completed: false,
            is_paused,
        }
    }

    /// Wait until the unread bytes drop below the pause threshold or the
    /// pipe is completed.
    pub async fn resumed(&self) {
        loop {
            let drained = self.drained.notified();
            {
                let state = self.state.lock();
                if state.completed || state.buffer.len() < self.pause_threshold {
                    return;
                }
            }
            drained.await;
        }
    }

    /// Mark the end of the byte stream. The reader sees `is_completed` after
    /// it has taken the remaining bytes.
    pub fn complete_writer(&self) {
        let mut state = self.state.lock();
        if state.completed || state.writer_completed {
            return;
        }
        state.writer_completed = true;
        let schedule = !std::mem::replace(&mut state.scheduled, true);
        drop(state);

        if schedule {
            self.schedule_reader();
        }
    }

    /// Take everything buffered. Returns `None` once the pipe is completed.
    pub fn read(&self) -> Option<ReadResult> {
        let mut state = self.state.lock();
        if state.completed {
            return None;
        }
        state.scheduled = false;
        let read = ReadResult {
            buffer: state.buffer.split(),
            is_completed: state.writer_completed,
        };
        drop(state);
        self.drained.notify_one();
        Some(read)
    }

    /// Close both sides and drop whatever is still buffered.
    pub fn complete(&self) {
        let mut state = self.state.lock();
        state.completed = true;
        state.writer_completed = true;
        state.buffer.clear();
        drop(state);
        self.drained.notify_one();
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    /// Bytes written but not yet taken by the reader.
    pub fn buffered(&self) -> usize {
        self.state.lock().buffer.len()
    }

    fn schedule_reader(&self) {
        let resume = self.resume;
        self.queue.schedule(move |ctx: &mut C| resume(ctx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Reader context that records every batch it is handed.
    struct Collector {
        pipe: Option<Arc<RecvPipe<Collector>>>,
        batches: Vec<(Vec<u8>, bool)>,
    }

    fn resume(ctx: &mut Collector) {
        let Some(pipe) = ctx.pipe.clone() else { return };
        if let Some(read) = pipe.read() {
            ctx.batches.push((read.buffer.to_vec(), read.is_completed));
        }
    }

    type Setup = (Arc<CompletionQueue<Collector>>, Arc<RecvPipe<Collector>>, Collector);

    fn setup() -> Setup {
        setup_with_threshold(64 * 1024)
    }

    fn setup_with_threshold(pause_threshold: usize) -> Setup {
        let queue = Arc::new(CompletionQueue::new());
        let pipe = Arc::new(RecvPipe::new(queue.clone(), resume, pause_threshold));
        let ctx = Collector {
            pipe: Some(pipe.clone()),
            batches: Vec::new(),
        };
        (queue, pipe, ctx)
    }

    #[test]
    fn writes_coalesce_into_one_continuation() {
        let (queue, pipe, mut ctx) = setup();
        assert!(!pipe.write(b"ab").is_completed);
        assert!(!pipe.write(b"cd").is_completed);
        assert_eq!(queue.len(), 1);
        assert_eq!(pipe.buffered(), 4);

        queue.drain(&mut ctx);
        assert_eq!(ctx.batches, vec![(b"abcd".to_vec(), false)]);
        assert_eq!(pipe.buffered(), 0);

        // The next flush schedules a fresh continuation.
        pipe.write(b"e");
        assert_eq!(queue.len(), 1);
        queue.drain(&mut ctx);
        assert_eq!(ctx.batches[1], (b"e".to_vec(), false));
    }

    #[test]
    fn writer_completion_reaches_reader_with_last_bytes() {
        let (queue, pipe, mut ctx) = setup();
        pipe.write(b"tail");
        pipe.complete_writer();
        assert_eq!(queue.len(), 1);

        queue.drain(&mut ctx);
        assert_eq!(ctx.batches, vec![(b"tail".to_vec(), true)]);
        assert!(pipe.write(b"more").is_completed);
    }

    #[test]
    fn completed_pipe_rejects_writes_and_reads() {
        let (queue, pipe, _ctx) = setup();
        pipe.write(b"dropped");
        pipe.complete();
        assert!(pipe.is_completed());
        assert_eq!(pipe.buffered(), 0);
        assert!(pipe.write(b"x").is_completed);
        assert!(pipe.read().is_none());
        // The continuation queued before completion is still there; it just
        // finds nothing to read.
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn writer_pauses_at_threshold_until_reader_drains() {
        let (queue, pipe, mut ctx) = setup_with_threshold(8);
        assert!(!pipe.write(b"abcd").is_paused);
        assert!(pipe.write(b"efgh").is_paused);
        assert!(timeout(Duration::from_millis(50), pipe.resumed()).await.is_err());

        let waiter = {
            let pipe = pipe.clone();
            tokio::spawn(async move { pipe.resumed().await })
        };
        queue.drain(&mut ctx);
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(pipe.buffered(), 0);
        assert!(!pipe.write(b"i").is_paused);
    }

    #[tokio::test]
    async fn completion_releases_a_paused_writer() {
        let (_queue, pipe, _ctx) = setup_with_threshold(4);
        assert!(pipe.write(b"full").is_paused);
        let waiter = {
            let pipe = pipe.clone();
            tokio::spawn(async move { pipe.resumed().await })
        };
        pipe.complete();
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lagging_reader_bounds_the_buffer() {
        const THRESHOLD: usize = 4096;
        const CHUNK: usize = 1024;
        let (queue, pipe, mut ctx) = setup_with_threshold(THRESHOLD);

        let reader = std::thread::spawn(move || {
            while queue.await_work() {
                std::thread::sleep(Duration::from_millis(1));
                queue.drain(&mut ctx);
                if ctx.batches.last().is_some_and(|(_, done)| *done) {
                    break;
                }
            }
            ctx.batches.iter().map(|(bytes, _)| bytes.len()).sum::<usize>()
        });

        let mut peak = 0;
        for _ in 0..256 {
            let flush = pipe.write(&[7u8; CHUNK]);
            peak = peak.max(pipe.buffered());
            if flush.is_paused {
                timeout(Duration::from_secs(5), pipe.resumed()).await.unwrap();
            }
        }
        pipe.complete_writer();

        assert!(peak < THRESHOLD + CHUNK, "peak {peak}");
        assert_eq!(reader.join().unwrap(), 256 * CHUNK);
    }
}
