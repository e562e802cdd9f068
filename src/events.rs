// Flow event bus
// The controller owns the bus and publishes; hosts subscribe and render feedback

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::target::TargetHandle;

/// Events fired by the step flow controller
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    BeginFlow,
    BeginStep {
        index: usize,
        id: String,
        enabled: bool,
    },
    ExecuteStep {
        index: usize,
        id: String,
    },
    SkipStep {
        index: usize,
        id: String,
    },
    SkipStepImmediate {
        index: usize,
        id: String,
    },
    RestoreStep {
        index: usize,
        id: String,
    },
    /// A multi-step skip finished walking and is about to begin `index`
    SkipSequenceDone {
        index: usize,
        id: String,
    },
    ClickWrongTarget {
        index: usize,
        id: String,
        hit: Option<TargetHandle>,
    },
    ShowPrompt {
        index: usize,
        id: String,
        prompt: String,
    },
    EndFlow,
}

impl FlowEvent {
    /// Index of the step the event refers to, if any
    pub fn step_index(&self) -> Option<usize> {
        match self {
            FlowEvent::BeginFlow | FlowEvent::EndFlow => None,
            FlowEvent::BeginStep { index, .. }
            | FlowEvent::ExecuteStep { index, .. }
            | FlowEvent::SkipStep { index, .. }
            | FlowEvent::SkipStepImmediate { index, .. }
            | FlowEvent::RestoreStep { index, .. }
            | FlowEvent::SkipSequenceDone { index, .. }
            | FlowEvent::ClickWrongTarget { index, .. }
            | FlowEvent::ShowPrompt { index, .. } => Some(*index),
        }
    }
}

/// Complete event envelope
#[derive(Debug, Clone)]
pub struct FlowEnvelope {
    pub event: FlowEvent,
    /// Sequence number, relative to the controller
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

/// Central event bus that fans flow events out to subscribers
#[derive(Debug)]
pub struct FlowEventBus {
    sender: broadcast::Sender<FlowEnvelope>,
    sequence: u64,
}

impl FlowEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event; having no subscribers is fine
    pub fn publish(&mut self, event: FlowEvent) {
        tracing::trace!(target: "events", "Publishing {:?}", event);
        let envelope = FlowEnvelope {
            event,
            sequence: self.sequence,
            timestamp: Utc::now(),
        };
        self.sequence += 1;
        let _ = self.sender.send(envelope);
    }

    /// Number of events published so far
    pub fn published(&self) -> u64 {
        self.sequence
    }
}

/// Trait for components that react to flow events
pub trait FlowEventConsumer {
    fn handle_event(&mut self, envelope: &FlowEnvelope);
}

/// Consumer that logs all flow events
#[derive(Debug, Default)]
pub struct LoggingConsumer;

impl FlowEventConsumer for LoggingConsumer {
    fn handle_event(&mut self, envelope: &FlowEnvelope) {
        match &envelope.event {
            FlowEvent::BeginFlow => {
                tracing::info!(target: "events", "FLOW BEGIN");
            }
            FlowEvent::EndFlow => {
                tracing::info!(target: "events", "FLOW END");
            }
            FlowEvent::BeginStep { index, id, enabled } => {
                tracing::info!(target: "events", "Step {} '{}' began (enabled: {})", index, id, enabled);
            }
            FlowEvent::ShowPrompt { prompt, .. } => {
                tracing::info!(target: "events", "Prompt: {}", prompt);
            }
            FlowEvent::ClickWrongTarget { index, id, hit } => {
                tracing::warn!(target: "events", "Wrong target clicked on step {} '{}': {:?}", index, id, hit);
            }
            other => {
                tracing::debug!(target: "events", "Flow event: {:?}", other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_subscribers_in_order() {
        let mut bus = FlowEventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(FlowEvent::BeginFlow);
        bus.publish(FlowEvent::EndFlow);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.event, FlowEvent::BeginFlow);
        assert_eq!(first.sequence, 0);
        assert_eq!(second.event, FlowEvent::EndFlow);
        assert_eq!(second.sequence, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let mut bus = FlowEventBus::new(8);
        bus.publish(FlowEvent::BeginFlow);
        assert_eq!(bus.published(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_step_index() {
        let event = FlowEvent::SkipStep {
            index: 3,
            id: "s".to_string(),
        };
        assert_eq!(event.step_index(), Some(3));
        assert_eq!(FlowEvent::EndFlow.step_index(), None);
    }
}
