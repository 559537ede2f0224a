//! Per-channel message queue: single writer per channel with backpressure
//! and merge-window coalescing.
//!
//! Guarantees: at most one in-flight `process` invocation per channel;
//! enqueue order preserved within a channel; no ordering across channels;
//! loss only on overflow rejection (reported to the sender) or crash.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use vigil_core::types::{ChannelId, InboundMessage};

/// Handler driven for each dispatched (possibly merged) message.
pub type ProcessFn = Arc<dyn Fn(InboundMessage) -> BoxFuture<'static, ()> + Send + Sync>;
/// Invoked for messages dropped because the buffer is full.
pub type RejectFn = Arc<dyn Fn(InboundMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Maximum buffered raw messages per channel (merged messages count).
    pub max_depth: usize,
    /// Messages arriving within this window of the newest buffered message
    /// are concatenated rather than appended.
    pub merge_window: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_depth: vigil_core::config::QUEUE_MAX_DEPTH,
            merge_window: Duration::from_secs(vigil_core::config::QUEUE_MERGE_WINDOW_SECS),
        }
    }
}

struct Entry {
    msg: InboundMessage,
    /// Raw messages coalesced into this entry.
    merged: usize,
    arrived: Instant,
}

#[derive(Default)]
struct ChannelState {
    buffer: VecDeque<Entry>,
    /// Total raw messages buffered (sum of per-entry merge counts).
    depth: usize,
    processing: bool,
}

pub struct MessageQueue {
    config: QueueConfig,
    process: ProcessFn,
    on_reject: RejectFn,
    channels: DashMap<ChannelId, Arc<Mutex<ChannelState>>>,
}

impl MessageQueue {
    pub fn new(config: QueueConfig, process: ProcessFn, on_reject: RejectFn) -> Arc<Self> {
        Arc::new(Self {
            config,
            process,
            on_reject,
            channels: DashMap::new(),
        })
    }

    /// Accept a message: dispatch immediately when the channel is idle,
    /// merge into the newest buffered entry within the window, append when
    /// there is room, or reject.
    pub fn enqueue(self: &Arc<Self>, msg: InboundMessage) {
        let channel_id = msg.channel_id.clone();
        let state = self
            .channels
            .entry(channel_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ChannelState::default())))
            .clone();

        enum Action {
            Dispatch(InboundMessage),
            Buffered,
            Rejected(InboundMessage),
        }

        let action = {
            let mut st = state.lock().unwrap();
            if !st.processing && st.buffer.is_empty() {
                st.processing = true;
                Action::Dispatch(msg)
            } else if st.depth >= self.config.max_depth {
                Action::Rejected(msg)
            } else {
                let now = Instant::now();
                let can_merge = st
                    .buffer
                    .back()
                    .map(|tail| now.duration_since(tail.arrived) <= self.config.merge_window)
                    .unwrap_or(false);
                if can_merge {
                    let tail = st.buffer.back_mut().unwrap();
                    tail.msg.text.push('\n');
                    tail.msg.text.push_str(&msg.text);
                    tail.msg.images.extend(msg.images);
                    tail.merged += 1;
                    tail.arrived = now;
                    let merged = tail.merged;
                    st.depth += 1;
                    debug!(channel = %channel_id, merged = merged, "message merged into tail");
                } else {
                    st.buffer.push_back(Entry {
                        msg,
                        merged: 1,
                        arrived: now,
                    });
                    st.depth += 1;
                }
                Action::Buffered
            }
        };

        match action {
            Action::Dispatch(first) => {
                let queue = Arc::clone(self);
                tokio::spawn(async move {
                    queue.run_loop(state, first).await;
                });
            }
            Action::Buffered => {}
            Action::Rejected(rejected) => {
                warn!(channel = %channel_id, "queue full, rejecting message");
                (self.on_reject)(rejected);
            }
        }
    }

    /// Drive the channel until its buffer drains. Only ever one instance
    /// per channel: spawned exactly when `processing` flips false → true.
    async fn run_loop(self: Arc<Self>, state: Arc<Mutex<ChannelState>>, first: InboundMessage) {
        let mut current = first;
        loop {
            (self.process)(current).await;
            let next = {
                let mut st = state.lock().unwrap();
                match st.buffer.pop_front() {
                    Some(entry) => {
                        st.depth -= entry.merged;
                        Some(entry.msg)
                    }
                    None => {
                        st.processing = false;
                        None
                    }
                }
            };
            match next {
                Some(msg) => current = msg,
                None => break,
            }
        }
    }

    /// Buffered raw message count (merged messages counted individually).
    pub fn queue_depth(&self, channel_id: &ChannelId) -> usize {
        self.channels
            .get(channel_id)
            .map(|s| s.lock().unwrap().depth)
            .unwrap_or(0)
    }

    pub fn is_processing(&self, channel_id: &ChannelId) -> bool {
        self.channels
            .get(channel_id)
            .map(|s| s.lock().unwrap().processing)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;
    use vigil_core::types::Platform;

    fn msg(channel: &str, text: &str) -> InboundMessage {
        InboundMessage::new(channel.into(), "u1".into(), text, Platform::Telegram)
    }

    /// Queue whose process handler blocks on a semaphore and records the
    /// dispatched texts plus the maximum observed concurrency.
    struct Harness {
        queue: Arc<MessageQueue>,
        gate: Arc<Semaphore>,
        dispatched: Arc<Mutex<Vec<String>>>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        rejected: Arc<Mutex<Vec<String>>>,
    }

    fn harness(config: QueueConfig) -> Harness {
        let gate = Arc::new(Semaphore::new(0));
        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let rejected = Arc::new(Mutex::new(Vec::new()));

        let (g, d, inf, maxf) = (
            gate.clone(),
            dispatched.clone(),
            in_flight.clone(),
            max_in_flight.clone(),
        );
        let process: ProcessFn = Arc::new(move |m: InboundMessage| {
            let (g, d, inf, maxf) = (g.clone(), d.clone(), inf.clone(), maxf.clone());
            Box::pin(async move {
                let now = inf.fetch_add(1, Ordering::SeqCst) + 1;
                maxf.fetch_max(now, Ordering::SeqCst);
                let permit = g.acquire().await.unwrap();
                permit.forget();
                d.lock().unwrap().push(m.text);
                inf.fetch_sub(1, Ordering::SeqCst);
            })
        });
        let r = rejected.clone();
        let on_reject: RejectFn = Arc::new(move |m: InboundMessage| {
            r.lock().unwrap().push(m.text);
        });

        Harness {
            queue: MessageQueue::new(config, process, on_reject),
            gate,
            dispatched,
            in_flight,
            max_in_flight,
            rejected,
        }
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn idle_channel_dispatches_immediately() {
        let h = harness(QueueConfig::default());
        h.queue.enqueue(msg("c1", "hello"));
        settle().await;
        assert!(h.queue.is_processing(&"c1".into()));
        h.gate.add_permits(1);
        settle().await;
        assert_eq!(h.dispatched.lock().unwrap().clone(), vec!["hello"]);
        assert!(!h.queue.is_processing(&"c1".into()));
    }

    #[tokio::test]
    async fn at_most_one_in_flight_and_fifo() {
        let h = harness(QueueConfig {
            max_depth: 10,
            merge_window: Duration::ZERO, // no merging; pure ordering test
        });
        for i in 0..5 {
            h.queue.enqueue(msg("c1", &format!("m{i}")));
        }
        settle().await;
        h.gate.add_permits(5);
        settle().await;
        assert_eq!(h.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.dispatched.lock().unwrap().clone(),
            vec!["m0", "m1", "m2", "m3", "m4"]
        );
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let h = harness(QueueConfig::default());
        h.queue.enqueue(msg("c1", "a"));
        h.queue.enqueue(msg("c2", "b"));
        settle().await;
        // Both channels processing concurrently.
        assert_eq!(h.in_flight.load(Ordering::SeqCst), 2);
        h.gate.add_permits(2);
        settle().await;
        assert_eq!(h.dispatched.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn burst_merges_then_rejects() {
        // Scenario: 15 rapid messages, capacity 10. The first goes in
        // flight, the next 10 merge into one buffered entry, 4 are
        // rejected with a visible notice each.
        let h = harness(QueueConfig {
            max_depth: 10,
            merge_window: Duration::from_secs(5),
        });
        for i in 0..15 {
            h.queue.enqueue(msg("c1", &format!("m{i}")));
        }
        settle().await;
        assert_eq!(h.queue.queue_depth(&"c1".into()), 10);
        assert_eq!(h.rejected.lock().unwrap().len(), 4);

        h.gate.add_permits(2);
        settle().await;
        let dispatched = h.dispatched.lock().unwrap().clone();
        assert_eq!(dispatched.len(), 2);
        assert_eq!(dispatched[0], "m0");
        // The merged unit contains m1..m10 joined by newlines.
        assert_eq!(
            dispatched[1],
            (1..=10).map(|i| format!("m{i}")).collect::<Vec<_>>().join("\n")
        );
        assert_eq!(h.queue.queue_depth(&"c1".into()), 0);
    }

    #[tokio::test]
    async fn messages_outside_window_stay_separate() {
        let h = harness(QueueConfig {
            max_depth: 10,
            merge_window: Duration::ZERO,
        });
        h.queue.enqueue(msg("c1", "first"));
        settle().await;
        h.queue.enqueue(msg("c1", "second"));
        h.queue.enqueue(msg("c1", "third"));
        settle().await;
        assert_eq!(h.queue.queue_depth(&"c1".into()), 2);
        h.gate.add_permits(3);
        settle().await;
        assert_eq!(
            h.dispatched.lock().unwrap().clone(),
            vec!["first", "second", "third"]
        );
    }
}
