//! Out-of-memory notification for a single container.

use tokio::sync::mpsc;

use crate::backend::Container;

/// The outcome of subscribing to a container's OOM events.
///
/// Both variants resolve [`OomSignal::drain`] once the container has been
/// destroyed: destroying closes the channel.
#[derive(Debug)]
pub enum OomSignal {
    /// Events arrive on this channel; it closes when the container is destroyed.
    Live(mpsc::Receiver<()>),
    /// The kernel or configuration cannot report OOM kills. Reads as "no OOM".
    Unsupported,
}

/// Subscribes to OOM events of `container`.
///
/// Never fails: an unsupported subscription is logged and degrades to
/// [`OomSignal::Unsupported`].
pub fn notify_on_oom(container: &dyn Container) -> OomSignal {
    match container.notify_oom() {
        Ok(rx) => {
            tracing::debug!(id = %container.id(), "subscribed to oom notifications");
            OomSignal::Live(rx)
        }
        Err(e) => {
            tracing::warn!(
                id = %container.id(),
                error = %e,
                "oom notifications unsupported, oom kills will not be reported"
            );
            OomSignal::Unsupported
        }
    }
}

impl OomSignal {
    /// Consumes the signal and reports whether an OOM kill was delivered.
    ///
    /// Must be called after the container was destroyed. An event still in
    /// flight is waited for; the closed channel then reads as "no OOM".
    pub async fn drain(self) -> bool {
        match self {
            Self::Live(mut rx) => rx.recv().await.is_some(),
            Self::Unsupported => false,
        }
    }
}
