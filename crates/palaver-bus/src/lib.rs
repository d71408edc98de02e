use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use palaver_schema::BusMessage;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum Topic {
    MessageAccepted,
    ToolInvoked,
    TurnLogged,
    StreamDelta,
    SessionFinalized,
    TaskFailed,
}

impl Topic {
    pub fn from_message(msg: &BusMessage) -> Self {
        match msg {
            BusMessage::MessageAccepted { .. } => Topic::MessageAccepted,
            BusMessage::ToolInvoked { .. } => Topic::ToolInvoked,
            BusMessage::TurnLogged { .. } => Topic::TurnLogged,
            BusMessage::StreamDelta { .. } => Topic::StreamDelta,
            BusMessage::SessionFinalized { .. } => Topic::SessionFinalized,
            BusMessage::TaskFailed { .. } => Topic::TaskFailed,
        }
    }
}

type Subscriber = mpsc::Sender<BusMessage>;

/// In-process topic bus. Subscribers get their own bounded channel; slow
/// consumers drop messages rather than stalling publishers.
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        subs.entry(topic).or_default().push(tx);
        rx
    }

    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        let topic = Topic::from_message(&msg);
        let subs = self.subscribers.read().await;
        if let Some(subscribers) = subs.get(&topic) {
            for tx in subscribers {
                let _ = tx.try_send(msg.clone());
            }
        }
        Ok(())
    }

    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            subscribers: self.subscribers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BusPublisher {
    subscribers: Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>,
}

impl BusPublisher {
    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        let topic = Topic::from_message(&msg);
        let subs = self.subscribers.read().await;
        if let Some(subscribers) = subs.get(&topic) {
            for tx in subscribers {
                let _ = tx.try_send(msg.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_schema::{EventType, Intent};
    use tokio::time::{timeout, Duration};

    fn turn_logged_message() -> BusMessage {
        BusMessage::TurnLogged {
            session_id: "s-1".into(),
            event_type: EventType::Ai,
            seq: 7,
        }
    }

    #[tokio::test]
    async fn publish_to_no_subscribers_succeeds() {
        let bus = EventBus::new(8);
        let msg = BusMessage::MessageAccepted {
            session_id: "s-1".into(),
            intent: Intent::CasualChat,
        };
        assert!(bus.publish(msg).await.is_ok());
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe(Topic::TurnLogged).await;

        bus.publish(turn_logged_message()).await.unwrap();

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(received, BusMessage::TurnLogged { seq: 7, .. }));
    }

    #[tokio::test]
    async fn multiple_subscribers_same_topic() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe(Topic::TurnLogged).await;
        let mut rx2 = bus.subscribe(Topic::TurnLogged).await;

        bus.publish(turn_logged_message()).await.unwrap();

        for rx in [&mut rx1, &mut rx2] {
            let got = timeout(Duration::from_millis(100), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(got, BusMessage::TurnLogged { .. }));
        }
    }

    #[tokio::test]
    async fn different_topics_no_crosstalk() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe(Topic::SessionFinalized).await;

        bus.publish(turn_logged_message()).await.unwrap();

        let received = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn bus_publisher_clone_works() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe(Topic::StreamDelta).await;
        let publisher = bus.publisher().clone();

        publisher
            .publish(BusMessage::StreamDelta {
                session_id: "s-1".into(),
                delta: "tok".into(),
                is_final: false,
            })
            .await
            .unwrap();

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(received, BusMessage::StreamDelta { .. }));
    }

    #[tokio::test]
    async fn channel_backpressure_drops_when_full() {
        let bus = EventBus::new(1);
        let mut rx = bus.subscribe(Topic::TurnLogged).await;

        bus.publish(turn_logged_message()).await.unwrap();
        bus.publish(turn_logged_message()).await.unwrap();

        let first = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(first.is_ok());
        let second = timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(second.is_err());
    }

    #[test]
    fn topic_from_message_covers_all_variants() {
        let cases: Vec<(BusMessage, Topic)> = vec![
            (
                BusMessage::MessageAccepted {
                    session_id: "s".into(),
                    intent: Intent::Tutorial,
                },
                Topic::MessageAccepted,
            ),
            (
                BusMessage::ToolInvoked {
                    session_id: "s".into(),
                    tool: "get_session_stats".into(),
                    ok: true,
                },
                Topic::ToolInvoked,
            ),
            (turn_logged_message(), Topic::TurnLogged),
            (
                BusMessage::StreamDelta {
                    session_id: "s".into(),
                    delta: "d".into(),
                    is_final: true,
                },
                Topic::StreamDelta,
            ),
            (
                BusMessage::SessionFinalized {
                    session_id: "s".into(),
                    summarized: false,
                },
                Topic::SessionFinalized,
            ),
            (
                BusMessage::TaskFailed {
                    session_id: "s".into(),
                    error: "e".into(),
                },
                Topic::TaskFailed,
            ),
        ];
        for (msg, expected) in cases {
            assert_eq!(Topic::from_message(&msg), expected);
        }
    }
}
