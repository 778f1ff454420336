//! Live stream fan-out.
//!
//! The `ConnectionManager` tracks every connected stream client with its
//! scenario subscriptions and an outbound queue. Broadcast never mutates
//! the client set while iterating: failed sends are collected and the
//! disconnects applied afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::bus::EventHandler;
use crate::models::{ClientMessage, Event, ServerMessage};

pub type ClientId = u64;

struct ClientHandle {
    sender: mpsc::UnboundedSender<ServerMessage>,
    subscriptions: HashSet<String>,
}

#[derive(Default)]
pub struct ConnectionManager {
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client; the returned receiver is the client's
    /// outbound queue, drained by its socket task.
    pub fn register(&self) -> (ClientId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.clients.lock().insert(
            id,
            ClientHandle {
                sender,
                subscriptions: HashSet::new(),
            },
        );
        info!(client = id, total = self.connection_count(), "stream client connected");
        (id, receiver)
    }

    pub fn disconnect(&self, id: ClientId) {
        if self.clients.lock().remove(&id).is_some() {
            info!(client = id, total = self.connection_count(), "stream client disconnected");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn subscribe(&self, id: ClientId, scenario: &str) {
        if let Some(client) = self.clients.lock().get_mut(&id) {
            client.subscriptions.insert(scenario.to_string());
            debug!(client = id, scenario, "subscribed");
        }
    }

    pub fn unsubscribe(&self, id: ClientId, scenario: &str) {
        if let Some(client) = self.clients.lock().get_mut(&id) {
            client.subscriptions.remove(scenario);
            debug!(client = id, scenario, "unsubscribed");
        }
    }

    pub fn subscriptions(&self, id: ClientId) -> HashSet<String> {
        self.clients
            .lock()
            .get(&id)
            .map(|c| c.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Queue a message for one client; a closed queue disconnects it.
    pub fn send_to(&self, id: ClientId, message: ServerMessage) {
        let failed = {
            let clients = self.clients.lock();
            match clients.get(&id) {
                Some(client) => client.sender.send(message).is_err(),
                None => false,
            }
        };
        if failed {
            warn!(client = id, "send failed, dropping client");
            self.disconnect(id);
        }
    }

    /// Deliver to clients subscribed to `scenario`, or to every client when
    /// no scenario filter applies.
    pub fn broadcast(&self, message: &ServerMessage, scenario: Option<&str>) {
        let mut failed: Vec<ClientId> = Vec::new();
        {
            let clients = self.clients.lock();
            for (id, client) in clients.iter() {
                if let Some(scenario) = scenario {
                    if !client.subscriptions.contains(scenario) {
                        continue;
                    }
                }
                if client.sender.send(message.clone()).is_err() {
                    failed.push(*id);
                }
            }
        }
        for id in failed {
            warn!(client = id, "broadcast send failed, dropping client");
            self.disconnect(id);
        }
    }

    /// Apply one inbound client message and queue the protocol response.
    pub fn handle_client_text(&self, id: ClientId, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Subscribe { scenario: Some(scenario) }) => {
                self.subscribe(id, &scenario);
                self.send_to(id, ServerMessage::Subscribed { scenario });
            }
            Ok(ClientMessage::Unsubscribe { scenario: Some(scenario) }) => {
                self.unsubscribe(id, &scenario);
                self.send_to(id, ServerMessage::Unsubscribed { scenario });
            }
            Ok(ClientMessage::Subscribe { scenario: None })
            | Ok(ClientMessage::Unsubscribe { scenario: None }) => {
                self.send_to(
                    id,
                    ServerMessage::Error {
                        message: "missing scenario".into(),
                    },
                );
            }
            Ok(ClientMessage::Ping) => {
                self.send_to(id, ServerMessage::Pong);
            }
            Err(_) => {
                self.send_to(
                    id,
                    ServerMessage::Error {
                        message: "invalid message".into(),
                    },
                );
            }
        }
    }
}

/// Bus subscriber that pushes signal and evaluation updates to stream
/// clients.
pub struct StreamFanout {
    manager: Arc<ConnectionManager>,
}

impl StreamFanout {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EventHandler for StreamFanout {
    fn name(&self) -> &str {
        "stream_fanout"
    }

    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        if let Some(message) = ServerMessage::from_event(&event) {
            self.manager.broadcast(&message, event.scenario());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now_iso;

    fn evaluation_message(hypothesis: &str) -> ServerMessage {
        ServerMessage::EvaluationUpdate {
            hypothesis: hypothesis.to_string(),
            probability: 0.3,
            country: None,
            timestamp: now_iso(),
        }
    }

    #[test]
    fn broadcast_respects_scenario_subscriptions() {
        let manager = ConnectionManager::new();
        let (subscriber, mut sub_rx) = manager.register();
        let (_other, mut other_rx) = manager.register();

        manager.subscribe(subscriber, "global_war_risk");
        manager.broadcast(&evaluation_message("global_war_risk"), Some("global_war_risk"));

        assert!(sub_rx.try_recv().is_ok());
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_without_filter_reaches_everyone() {
        let manager = ConnectionManager::new();
        let (_a, mut a_rx) = manager.register();
        let (_b, mut b_rx) = manager.register();

        manager.broadcast(&ServerMessage::Pong, None);
        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
    }

    #[test]
    fn failed_send_drops_the_client_after_iteration() {
        let manager = ConnectionManager::new();
        let (dead, dead_rx) = manager.register();
        let (_live, mut live_rx) = manager.register();
        drop(dead_rx);

        manager.broadcast(&ServerMessage::Pong, None);
        assert_eq!(manager.connection_count(), 1);
        assert!(live_rx.try_recv().is_ok());
        // Subscriptions of the dropped client are released with it.
        assert!(manager.subscriptions(dead).is_empty());
    }

    #[test]
    fn client_protocol_round_trip() {
        let manager = ConnectionManager::new();
        let (id, mut rx) = manager.register();

        manager.handle_client_text(id, r#"{"action": "subscribe", "scenario": "civil_war_risk"}"#);
        match rx.try_recv().unwrap() {
            ServerMessage::Subscribed { scenario } => assert_eq!(scenario, "civil_war_risk"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(manager.subscriptions(id).contains("civil_war_risk"));

        manager.handle_client_text(id, r#"{"action": "ping"}"#);
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Pong));

        manager.handle_client_text(id, r#"{"action": "unsubscribe", "scenario": "civil_war_risk"}"#);
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Unsubscribed { .. }));
        assert!(manager.subscriptions(id).is_empty());

        manager.handle_client_text(id, "not json");
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Error { .. }));

        manager.handle_client_text(id, r#"{"action": "subscribe"}"#);
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn fanout_handler_translates_bus_events() {
        let manager = Arc::new(ConnectionManager::new());
        let (id, mut rx) = manager.register();
        manager.subscribe(id, "global_war_risk");

        let fanout = StreamFanout::new(manager.clone());
        fanout
            .handle(Event::EvaluationUpdate {
                hypothesis: "global_war_risk".into(),
                probability: 0.42,
                country: None,
                timestamp: now_iso(),
            })
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            ServerMessage::EvaluationUpdate { probability, .. } => {
                assert!((probability - 0.42).abs() < 1e-12)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
