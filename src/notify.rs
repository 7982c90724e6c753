use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{ReservationId, UserId};

const CHANNEL_CAPACITY: usize = 256;

/// Something a requester should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ReservationApproved {
        reservation_id: ReservationId,
        requester: UserId,
        comment: Option<String>,
    },
    ReservationRejected {
        reservation_id: ReservationId,
        requester: UserId,
        comment: Option<String>,
    },
    ChangeRequested {
        reservation_id: ReservationId,
        requester: UserId,
        comment: Option<String>,
    },
}

impl Notice {
    pub fn requester(&self) -> UserId {
        match self {
            Notice::ReservationApproved { requester, .. }
            | Notice::ReservationRejected { requester, .. }
            | Notice::ChangeRequested { requester, .. } => *requester,
        }
    }

    pub fn reservation_id(&self) -> ReservationId {
        match self {
            Notice::ReservationApproved { reservation_id, .. }
            | Notice::ReservationRejected { reservation_id, .. }
            | Notice::ChangeRequested { reservation_id, .. } => *reservation_id,
        }
    }
}

/// Fire-and-forget delivery. Implementations must not block and never fail
/// the caller; delivery problems are theirs to log.
pub trait Notifier: Send + Sync {
    fn publish(&self, notice: Notice);
}

/// Broadcast hub, one channel per requester.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<UserId, broadcast::Sender<Notice>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to notices addressed to `requester`. Creates the channel if needed.
    pub fn subscribe(&self, requester: UserId) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(requester)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }
}

impl Notifier for NotifyHub {
    fn publish(&self, notice: Notice) {
        let requester = notice.requester();
        let Some(sender) = self.channels.get(&requester).map(|s| s.clone()) else {
            tracing::debug!("no subscriber for {requester}, dropping notice");
            return;
        };
        if sender.send(notice).is_err() {
            tracing::debug!("all subscribers for {requester} went away");
            self.channels.remove_if(&requester, |_, s| s.receiver_count() == 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let requester = Ulid::new();
        let mut rx = hub.subscribe(requester);

        let notice = Notice::ReservationApproved {
            reservation_id: Ulid::new(),
            requester,
            comment: Some("enjoy".into()),
        };
        hub.publish(notice.clone());

        assert_eq!(rx.recv().await.unwrap(), notice);
    }

    #[tokio::test]
    async fn notices_go_only_to_their_requester() {
        let hub = NotifyHub::new();
        let alice = Ulid::new();
        let bob = Ulid::new();
        let mut alice_rx = hub.subscribe(alice);
        let mut bob_rx = hub.subscribe(bob);

        hub.publish(Notice::ChangeRequested {
            reservation_id: Ulid::new(),
            requester: bob,
            comment: None,
        });

        assert!(alice_rx.try_recv().is_err());
        assert_eq!(bob_rx.recv().await.unwrap().requester(), bob);
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.publish(Notice::ReservationRejected {
            reservation_id: Ulid::new(),
            requester: Ulid::new(),
            comment: None,
        });
    }
}
