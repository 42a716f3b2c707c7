//! Session and cart notifications for UI collaborators.
//!
//! Presentational code subscribes instead of polling. Server-rendered pages
//! receive the same events as `HX-Trigger` header names.

use agrihcm_core::UserId;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// Something other components may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session check or login succeeded.
    UserLoggedIn { user_id: UserId },
    /// Credentials were cleared.
    LoggedOut,
    /// An order was placed; the cart panel should close.
    CloseCartPanel,
    /// The cart mirror changed after a confirmed mutation.
    CartUpdated,
}

impl SessionEvent {
    /// Client-side event name.
    #[must_use]
    pub const fn trigger_name(&self) -> &'static str {
        match self {
            Self::UserLoggedIn { .. } => "user-logged-in",
            Self::LoggedOut => "user-logged-out",
            Self::CloseCartPanel => "close-cart-sheet",
            Self::CartUpdated => "cart-updated",
        }
    }
}

/// Broadcast channel for [`SessionEvent`]s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: SessionEvent) {
        tracing::debug!(event = event.trigger_name(), "Emitting session event");
        let _ = self.sender.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(SessionEvent::CloseCartPanel);
        bus.emit(SessionEvent::CartUpdated);

        assert_eq!(rx.recv().await.unwrap(), SessionEvent::CloseCartPanel);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::CartUpdated);
    }

    #[test]
    fn test_emit_without_subscribers() {
        EventBus::new().emit(SessionEvent::LoggedOut);
    }
}
