//! C5 Plugin Communication: message broker, event bus, plugin-service
//! registry, and append-only audit log.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::errors::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommKind {
    Message,
    Event,
    ServiceCall,
    ServiceRegistration,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunicationEntry {
    pub id: String,
    pub kind: CommKind,
    pub from: String,
    pub to: String,
    pub operation: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
}

/// Append-only audit log bounded by count and a retention window, evicted
/// lazily on insert like the RBAC cache.
pub struct AuditLog {
    entries: Mutex<VecDeque<CommunicationEntry>>,
    max_entries: usize,
    retention: Duration,
}

impl AuditLog {
    pub fn new(max_entries: usize, retention: Duration) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries,
            retention,
        }
    }

    pub fn record(
        &self,
        kind: CommKind,
        from: &str,
        to: &str,
        operation: &str,
        success: bool,
        error: Option<String>,
        duration: Duration,
        metadata: Value,
    ) {
        let mut entries = self.entries.lock().expect("audit log poisoned");
        let now = Utc::now();
        while let Some(front) = entries.front() {
            let age = now.signed_duration_since(front.timestamp);
            if age.num_seconds() as u64 > self.retention.as_secs() {
                entries.pop_front();
            } else {
                break;
            }
        }
        while entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(CommunicationEntry {
            id: Uuid::new_v4().to_string(),
            kind,
            from: from.to_string(),
            to: to.to_string(),
            operation: operation.to_string(),
            success,
            error,
            duration_ms: duration.as_millis(),
            timestamp: now,
            metadata,
        });
    }

    pub fn recent(&self, limit: usize) -> Vec<CommunicationEntry> {
        let entries = self.entries.lock().expect("audit log poisoned");
        entries.iter().rev().take(limit).cloned().collect()
    }
}

/// `"*"` as a `to` target is an explicit wildcard. An empty
/// whitelist means "all pairs allowed".
pub struct CommunicationWhitelist {
    pairs: Vec<(String, String)>,
}

impl CommunicationWhitelist {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    pub fn is_allowed(&self, from: &str, to: &str) -> bool {
        if self.pairs.is_empty() {
            return true;
        }
        self.pairs
            .iter()
            .any(|(f, t)| f == from && (t == to || t == "*"))
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub from: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Per-recipient message queue; messages are delivered to each recipient's
/// queue in arrival order.
pub struct MessageBroker {
    queues: Mutex<HashMap<String, VecDeque<Message>>>,
}

impl MessageBroker {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn send(&self, from: &str, to: &str, payload: Value) {
        let mut queues = self.queues.lock().expect("message queues poisoned");
        queues.entry(to.to_string()).or_default().push_back(Message {
            from: from.to_string(),
            payload,
            timestamp: Utc::now(),
        });
    }

    /// Snapshot-and-drain retrieval: returns and removes all
    /// queued messages for `recipient`, in arrival order.
    pub fn receive(&self, recipient: &str) -> Vec<Message> {
        let mut queues = self.queues.lock().expect("message queues poisoned");
        queues
            .get_mut(recipient)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }
}

impl Default for MessageBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

/// Typed publish/subscribe with a bounded buffer and publish timeout.
/// Subscribers for a given event type are notified in registration order;
/// callbacks (here, channel sends) run concurrently across event types,
/// with no ordering guarantee between them.
pub struct EventBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<Event>>>>,
    buffer_size: usize,
    publish_timeout: Duration,
}

impl EventBus {
    pub fn new(buffer_size: usize, publish_timeout: Duration) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            buffer_size,
            publish_timeout,
        }
    }

    pub fn subscribe(&self, event_type: &str) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        self.subscribers
            .lock()
            .expect("subscribers poisoned")
            .entry(event_type.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Publishes to every subscriber of `event_type`. A publish that cannot
    /// enqueue within `event_processing_timeout` fails `Timeout`; events
    /// already enqueued to other subscribers are still delivered.
    pub async fn publish(&self, event_type: &str, payload: Value) -> Result<(), GatewayError> {
        let senders: Vec<_> = {
            let subs = self.subscribers.lock().expect("subscribers poisoned");
            subs.get(event_type).cloned().unwrap_or_default()
        };

        let event = Event {
            event_type: event_type.to_string(),
            payload,
            published_at: Utc::now(),
        };

        let mut timed_out = false;
        for tx in senders {
            let result = tokio::time::timeout(self.publish_timeout, tx.send(event.clone())).await;
            if result.is_err() || result.as_ref().is_ok_and(|r| r.is_err()) {
                timed_out = true;
            }
        }

        if timed_out {
            Err(GatewayError::timeout(format!(
                "publish to event type \"{event_type}\" timed out for at least one subscriber"
            )))
        } else {
            Ok(())
        }
    }
}

/// Services advertised by plugins and callable by other plugins.
pub struct PluginServiceRegistry {
    services: Mutex<HashMap<String, String>>,
}

impl PluginServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
        }
    }

    pub fn advertise(&self, service_name: &str, owning_plugin: &str) {
        self.services
            .lock()
            .expect("plugin services poisoned")
            .insert(service_name.to_string(), owning_plugin.to_string());
    }

    pub fn withdraw(&self, service_name: &str) {
        self.services
            .lock()
            .expect("plugin services poisoned")
            .remove(service_name);
    }

    pub fn resolve(&self, service_name: &str) -> Option<String> {
        self.services
            .lock()
            .expect("plugin services poisoned")
            .get(service_name)
            .cloned()
    }
}

impl Default for PluginServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Facade composing the four C5 sub-components, with every successful or
/// failed operation producing an audit entry.
pub struct PluginCommunicator {
    pub broker: MessageBroker,
    pub events: EventBus,
    pub services: PluginServiceRegistry,
    pub audit: AuditLog,
    whitelist: CommunicationWhitelist,
}

impl PluginCommunicator {
    pub fn new(
        event_buffer_size: usize,
        publish_timeout: Duration,
        audit_max_entries: usize,
        audit_retention: Duration,
        allowed_pairs: Vec<(String, String)>,
    ) -> Self {
        Self {
            broker: MessageBroker::new(),
            events: EventBus::new(event_buffer_size, publish_timeout),
            services: PluginServiceRegistry::new(),
            audit: AuditLog::new(audit_max_entries, audit_retention),
            whitelist: CommunicationWhitelist::new(allowed_pairs),
        }
    }

    pub fn send_message(&self, from: &str, to: &str, payload: Value) -> Result<(), GatewayError> {
        let start = Instant::now();
        if !self.whitelist.is_allowed(from, to) {
            let err = GatewayError::forbidden(format!("{from} -> {to} is not an allowed communication pair"));
            self.audit.record(
                CommKind::Message,
                from,
                to,
                "send",
                false,
                Some(err.message.clone()),
                start.elapsed(),
                Value::Null,
            );
            return Err(err);
        }
        self.broker.send(from, to, payload);
        self.audit
            .record(CommKind::Message, from, to, "send", true, None, start.elapsed(), Value::Null);
        Ok(())
    }

    pub async fn publish_event(
        &self,
        from: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<(), GatewayError> {
        let start = Instant::now();
        let result = self.events.publish(event_type, payload).await;
        self.audit.record(
            CommKind::Event,
            from,
            event_type,
            "publish",
            result.is_ok(),
            result.as_ref().err().map(|e| e.message.clone()),
            start.elapsed(),
            Value::Null,
        );
        result
    }

    pub fn register_plugin_service(&self, plugin: &str, service_name: &str) {
        self.services.advertise(service_name, plugin);
        self.audit.record(
            CommKind::ServiceRegistration,
            plugin,
            service_name,
            "advertise",
            true,
            None,
            Duration::ZERO,
            Value::Null,
        );
    }

    pub fn record_service_call(
        &self,
        from: &str,
        to_service: &str,
        success: bool,
        error: Option<String>,
        duration: Duration,
    ) {
        self.audit.record(
            CommKind::ServiceCall,
            from,
            to_service,
            "call",
            success,
            error,
            duration,
            Value::Null,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_delivered_in_arrival_order() {
        let broker = MessageBroker::new();
        broker.send("a", "b", Value::from(1));
        broker.send("a", "b", Value::from(2));
        let received = broker.receive("b");
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].payload, Value::from(1));
        assert_eq!(received[1].payload, Value::from(2));
    }

    #[test]
    fn wildcard_target_allows_any_destination() {
        let wl = CommunicationWhitelist::new(vec![("a".into(), "*".into())]);
        assert!(wl.is_allowed("a", "b"));
        assert!(!wl.is_allowed("c", "b"));
    }

    #[test]
    fn empty_whitelist_allows_all_pairs() {
        let wl = CommunicationWhitelist::new(vec![]);
        assert!(wl.is_allowed("anyone", "anything"));
    }

    #[tokio::test]
    async fn publish_delivers_to_all_subscribers() {
        let bus = EventBus::new(4, Duration::from_millis(100));
        let mut rx1 = bus.subscribe("plugin.reloaded");
        let mut rx2 = bus.subscribe("plugin.reloaded");
        bus.publish("plugin.reloaded", Value::from("memory")).await.unwrap();
        assert_eq!(rx1.recv().await.unwrap().payload, Value::from("memory"));
        assert_eq!(rx2.recv().await.unwrap().payload, Value::from("memory"));
    }

    #[test]
    fn disallowed_pair_is_forbidden_and_audited() {
        let comm = PluginCommunicator::new(4, Duration::from_millis(50), 100, Duration::from_secs(60), vec![("a".into(), "b".into())]);
        assert!(comm.send_message("a", "b", Value::Null).is_ok());
        assert!(comm.send_message("x", "y", Value::Null).is_err());
        assert_eq!(comm.audit.recent(10).len(), 2);
    }
}
