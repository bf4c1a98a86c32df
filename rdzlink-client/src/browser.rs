//! Backends that browse the local network for station services.

use std::sync::{Arc, Mutex, PoisonError};

use rdzlink_rs_protocol::ServiceAddress;
use tokio::sync::mpsc;

use crate::error::Result;

/// A raw result from a service browser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrowseEvent {
    /// An instance was advertised; resolution is pending.
    Found { instance: String },
    /// An instance resolved to an address.
    Resolved {
        instance: String,
        address: ServiceAddress,
    },
    /// An instance stopped advertising.
    Removed { instance: String },
    /// Resolution failed. Browsing continues.
    Failed {
        instance: Option<String>,
        reason: String,
    },
}

/// Source of [`BrowseEvent`]s for one service type.
///
/// Implementations must not block: `browse` starts the search and returns
/// a channel that yields results until `stop_browse` is called.
pub trait ServiceBrowser: Send + 'static {
    fn browse(&mut self, service_type: &str) -> Result<mpsc::UnboundedReceiver<BrowseEvent>>;

    fn stop_browse(&mut self, service_type: &str) -> Result<()>;
}

type Feed = Arc<Mutex<Option<mpsc::UnboundedSender<BrowseEvent>>>>;

/// A browser fed from outside, for hosts that run discovery themselves
/// (for example through a mobile platform's service discovery API).
pub struct ExternalBrowser {
    feed: Feed,
}

/// Publishing side of an [`ExternalBrowser`].
#[derive(Clone)]
pub struct ExternalBrowserHandle {
    feed: Feed,
}

impl ExternalBrowser {
    pub fn new() -> (Self, ExternalBrowserHandle) {
        let feed = Feed::default();
        (
            Self { feed: feed.clone() },
            ExternalBrowserHandle { feed },
        )
    }
}

impl ServiceBrowser for ExternalBrowser {
    fn browse(&mut self, _service_type: &str) -> Result<mpsc::UnboundedReceiver<BrowseEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.feed.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(rx)
    }

    fn stop_browse(&mut self, _service_type: &str) -> Result<()> {
        self.feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

impl ExternalBrowserHandle {
    /// Deliver an event. Returns `false` when nobody is browsing.
    pub fn publish(&self, event: BrowseEvent) -> bool {
        let guard = self.feed.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_browsing(&self) -> bool {
        self.feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Report an instance that was found and resolved in one step.
    pub fn resolved(&self, instance: &str, address: ServiceAddress) -> bool {
        self.publish(BrowseEvent::Resolved {
            instance: instance.to_owned(),
            address,
        })
    }

    pub fn removed(&self, instance: &str) -> bool {
        self.publish(BrowseEvent::Removed {
            instance: instance.to_owned(),
        })
    }
}
