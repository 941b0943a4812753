use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events, per venue and for all venues.
/// Outbound notifiers (owner alerts, confirmations) subscribe here.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one venue. Creates the channel if needed.
    pub fn subscribe(&self, venue_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(venue_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        if let Some(sender) = self.channels.get(&event.venue_id()) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
    }
}

/// Drain the firehose into the log as JSON, one line per committed event.
pub async fn log_outbound(mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::info!(target: "courtbook::outbound", "{json}"),
                Err(e) => tracing::warn!("failed to encode event: {e}"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("outbound log lagged, {n} events skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookingStatus, Money};

    fn venue_event(id: Ulid) -> Event {
        Event::VenuePut {
            id,
            owner_id: Ulid::new(),
            hourly_rate: Money::from_major(1),
            hours: None,
            active: true,
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let vid = Ulid::new();
        let mut rx = hub.subscribe(vid);

        let event = venue_event(vid);
        hub.send(&event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn venue_channels_are_isolated() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);
        let mut all = hub.subscribe_all();

        let event = Event::BookingStatusChanged {
            id: Ulid::new(),
            venue_id: b,
            from: BookingStatus::Pending,
            to: BookingStatus::Confirmed,
            at: 0,
            payment: None,
        };
        hub.send(&event);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(all.recv().await.unwrap(), event);
    }

    #[test]
    fn pending_recv_wakes_on_send() {
        let hub = NotifyHub::new();
        let vid = Ulid::new();
        let mut rx = hub.subscribe(vid);
        let mut recv = tokio_test::task::spawn(rx.recv());
        tokio_test::assert_pending!(recv.poll());

        let event = venue_event(vid);
        hub.send(&event);
        assert!(recv.is_woken());
        let got = tokio_test::assert_ready!(recv.poll());
        assert_eq!(got.unwrap(), event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&venue_event(Ulid::new()));
    }
}
