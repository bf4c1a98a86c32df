use futures_core::Stream;
use tokio::sync::mpsc;

use crate::event::Event;

/// Receiving end of the coordinator's event channel.
///
/// Events arrive in the order they happened. The channel ends once the
/// coordinator has shut down and every pending event has been read.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventReceiver {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Returns `None` after shutdown.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take an event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Convert into a [`Stream`] of events.
    pub fn into_stream(mut self) -> impl Stream<Item = Event> {
        async_stream::stream! {
            while let Some(event) = self.rx.recv().await {
                yield event;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LinkStatus;
    use rdzlink_rs_protocol::{ServiceAddress, StationMessage};
    use serde_json::json;
    use std::pin::pin;
    use tokio_stream::StreamExt;

    fn message(value: serde_json::Value) -> Event {
        Event::Message(StationMessage::decode_line(&value.to_string()).unwrap())
    }

    #[tokio::test]
    async fn recv_and_try_recv() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut events = EventReceiver::new(rx);
        assert_eq!(events.try_recv(), None);

        let addr = ServiceAddress::new("10.0.0.1", 14570);
        tx.send(Event::Link(LinkStatus::Connecting(addr.clone())))
            .unwrap();
        assert_eq!(
            events.try_recv(),
            Some(Event::Link(LinkStatus::Connecting(addr)))
        );

        drop(tx);
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn stream_yields_then_ends() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(message(json!({"n": 1}))).unwrap();
        tx.send(message(json!({"n": 2}))).unwrap();
        drop(tx);

        let stream = pin!(EventReceiver::new(rx).into_stream());
        let collected: Vec<_> = stream.collect().await;
        assert_eq!(
            collected,
            vec![message(json!({"n": 1})), message(json!({"n": 2}))]
        );
    }
}
