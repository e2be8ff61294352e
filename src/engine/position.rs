// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::playsync::CancelHandle;
use crate::preset::PadId;

/// A pad's playback position at one point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionUpdate {
    pub pad_id: PadId,
    pub current_time: Duration,
    pub duration: Duration,
}

impl PositionUpdate {
    pub fn new(pad_id: PadId, current_time: Duration, duration: Duration) -> PositionUpdate {
        PositionUpdate {
            pad_id,
            current_time,
            duration,
        }
    }

    /// Playback progress in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.duration.is_zero() {
            return 0.0;
        }
        (self.current_time.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }
}

struct Subscription {
    generation: u64,
    cancel: CancelHandle,
}

/// Registry of position subscriptions, at most one per pad.
#[derive(Default)]
pub struct PositionStreams {
    subscriptions: Mutex<HashMap<PadId, Subscription>>,
    next_generation: AtomicU64,
}

impl PositionStreams {
    pub fn new() -> PositionStreams {
        PositionStreams::default()
    }

    /// Opens a subscription for the pad, replacing (and ending) any existing one.
    /// Returns the consumer half and the producer half.
    pub fn subscribe(self: &Arc<Self>, pad_id: PadId) -> (PositionStream, PositionSink) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelHandle::new();
        let (sender, receiver) = mpsc::unbounded_channel();

        let previous = self.subscriptions.lock().insert(
            pad_id,
            Subscription {
                generation,
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(pad = pad_id, "Replacing position subscription");
            previous.cancel.cancel();
        }

        (
            PositionStream {
                pad_id,
                generation,
                receiver,
                registry: self.clone(),
            },
            PositionSink {
                pad_id,
                generation,
                sender,
                cancel,
                registry: self.clone(),
            },
        )
    }

    /// Ends the pad's subscription. Safe to call when there's none.
    pub fn unsubscribe(&self, pad_id: PadId) {
        if let Some(subscription) = self.subscriptions.lock().remove(&pad_id) {
            debug!(pad = pad_id, "Unsubscribed from position updates");
            subscription.cancel.cancel();
        }
    }

    /// Ends the pad's subscription only if it's still the given one.
    fn unsubscribe_if_current(&self, pad_id: PadId, generation: u64) {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions
            .get(&pad_id)
            .is_some_and(|subscription| subscription.generation == generation)
        {
            if let Some(subscription) = subscriptions.remove(&pad_id) {
                subscription.cancel.cancel();
            }
        }
    }

    /// Returns true if the pad has a live subscription.
    pub fn is_subscribed(&self, pad_id: PadId) -> bool {
        self.subscriptions.lock().contains_key(&pad_id)
    }

    /// Ends every subscription.
    pub fn clear(&self) {
        for (_, subscription) in self.subscriptions.lock().drain() {
            subscription.cancel.cancel();
        }
    }
}

/// The consumer side of a position subscription. Dropping it unsubscribes.
pub struct PositionStream {
    pad_id: PadId,
    generation: u64,
    receiver: mpsc::UnboundedReceiver<PositionUpdate>,
    registry: Arc<PositionStreams>,
}

impl PositionStream {
    pub fn pad_id(&self) -> PadId {
        self.pad_id
    }

    /// Receives the next update. Returns None once the stream has ended.
    pub async fn recv(&mut self) -> Option<PositionUpdate> {
        self.receiver.recv().await
    }
}

impl Drop for PositionStream {
    fn drop(&mut self) {
        self.registry
            .unsubscribe_if_current(self.pad_id, self.generation);
    }
}

/// The producer side of a position subscription, owned by the polling task.
pub struct PositionSink {
    pad_id: PadId,
    generation: u64,
    sender: mpsc::UnboundedSender<PositionUpdate>,
    cancel: CancelHandle,
    registry: Arc<PositionStreams>,
}

impl PositionSink {
    pub fn pad_id(&self) -> PadId {
        self.pad_id
    }

    /// Returns true once the subscriber is gone or the subscription was replaced.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }

    /// Delivers an update. Returns false if nobody is listening anymore.
    pub fn emit(&self, current_time: Duration, duration: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.sender
            .send(PositionUpdate::new(self.pad_id, current_time, duration))
            .is_ok()
    }

    /// Sleeps for the given interval. Returns false if the subscription ended first.
    pub async fn sleep(&self, interval: Duration) -> bool {
        tokio::select! {
            alive = self.cancel.sleep(interval) => alive && !self.sender.is_closed(),
            _ = self.sender.closed() => false,
        }
    }
}

impl Drop for PositionSink {
    fn drop(&mut self) {
        self.registry
            .unsubscribe_if_current(self.pad_id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replacing_ends_the_old_stream() {
        let registry = Arc::new(PositionStreams::new());
        let (mut first, first_sink) = registry.subscribe(1);
        let (mut second, second_sink) = registry.subscribe(1);

        assert!(first_sink.is_closed());
        assert!(!first_sink.emit(Duration::ZERO, Duration::from_secs(1)));
        drop(first_sink);
        assert_eq!(None, first.recv().await);

        // The stale sink going away doesn't touch the new subscription.
        assert!(registry.is_subscribed(1));
        assert!(second_sink.emit(Duration::ZERO, Duration::from_secs(1)));
        assert_eq!(
            Some(PositionUpdate::new(1, Duration::ZERO, Duration::from_secs(1))),
            second.recv().await
        );
    }

    #[tokio::test]
    async fn dropping_the_stream_unsubscribes() {
        let registry = Arc::new(PositionStreams::new());
        let (stream, sink) = registry.subscribe(4);
        assert!(registry.is_subscribed(4));

        drop(stream);

        assert!(!registry.is_subscribed(4));
        assert!(sink.is_closed());
        assert!(!sink.sleep(Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let registry = Arc::new(PositionStreams::new());
        registry.unsubscribe(3);

        let (mut stream, sink) = registry.subscribe(3);
        registry.unsubscribe(3);
        registry.unsubscribe(3);
        assert!(sink.is_closed());
        drop(sink);
        assert_eq!(None, stream.recv().await);
    }

    #[tokio::test]
    async fn clear_ends_everything() {
        let registry = Arc::new(PositionStreams::new());
        let (_a, sink_a) = registry.subscribe(1);
        let (_b, sink_b) = registry.subscribe(2);

        registry.clear();

        assert!(sink_a.is_closed());
        assert!(sink_b.is_closed());
        assert!(!registry.is_subscribed(1));
        assert!(!registry.is_subscribed(2));
    }

    #[test]
    fn progress() {
        let update = PositionUpdate::new(1, Duration::from_millis(250), Duration::from_secs(1));
        assert_eq!(0.25, update.progress());
        assert_eq!(0.0, PositionUpdate::new(1, Duration::ZERO, Duration::ZERO).progress());
    }
}
