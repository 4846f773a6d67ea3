//! Trailing-edge debounce for filter change events.
//!
//! Events go through an unbounded channel to a dedicated task. The first
//! event moves the task from `Idle` to `Buffering` and arms a deadline;
//! each further event pushes the deadline back by the full window. When
//! the deadline passes the task goes to `Flushing`, hands the whole buffer
//! to the [`BatchSink`] and waits for it before returning to `Idle`.
//! Events arriving during a flush wait in the channel for the next cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

#[async_trait]
pub trait BatchSink<T>: Send + Sync + 'static {
    async fn flush(&self, batch: Vec<T>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    Buffering,
    Flushing,
}

#[derive(Debug)]
pub struct ChangeBatcher<T> {
    tx: mpsc::UnboundedSender<T>,
    phase: Arc<Mutex<BatchPhase>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> ChangeBatcher<T> {
    /// Spawn the batching task on the current runtime.
    pub fn spawn<S: BatchSink<T>>(window: Duration, sink: S) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let phase = Arc::new(Mutex::new(BatchPhase::Idle));
        let task = tokio::spawn(run(window, rx, sink, Arc::clone(&phase)));
        Self { tx, phase, task }
    }

    /// Queue an event. Returns false once the task is gone.
    pub fn push(&self, event: T) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn phase(&self) -> BatchPhase {
        *self.phase.lock()
    }

    /// Stop the task without flushing what is buffered.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl<T> Drop for ChangeBatcher<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum State {
    Idle,
    Buffering { deadline: Instant },
    Flushing { closed: bool },
}

async fn run<T, S>(window: Duration, mut rx: mpsc::UnboundedReceiver<T>, sink: S, phase: Arc<Mutex<BatchPhase>>)
where
    T: Send + 'static,
    S: BatchSink<T>,
{
    let mut buffer: Vec<T> = Vec::new();
    let mut state = State::Idle;

    loop {
        *phase.lock() = match state {
            State::Idle => BatchPhase::Idle,
            State::Buffering { .. } => BatchPhase::Buffering,
            State::Flushing { .. } => BatchPhase::Flushing,
        };

        state = match state {
            State::Idle => match rx.recv().await {
                Some(event) => {
                    buffer.push(event);
                    State::Buffering {
                        deadline: Instant::now() + window,
                    }
                }
                None => return,
            },
            State::Buffering { deadline } => {
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(event) => {
                            buffer.push(event);
                            State::Buffering { deadline: Instant::now() + window }
                        }
                        None => State::Flushing { closed: true },
                    },
                    _ = sleep_until(deadline) => State::Flushing { closed: false },
                }
            }
            State::Flushing { closed } => {
                let batch = std::mem::take(&mut buffer);
                log::debug!("Flushing {} filter change events", batch.len());
                sink.flush(batch).await;
                if closed {
                    *phase.lock() = BatchPhase::Idle;
                    return;
                }
                State::Idle
            }
        };
    }
}
