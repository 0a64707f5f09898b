//! Session event stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::state::LoopState;
use crate::types::{FunctionCall, Message};

/// Callback receiving session events.
pub type SessionEventSink = Arc<dyn Fn(SessionEvent) + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventPayload {
    StateChanged {
        from: LoopState,
        to: LoopState,
    },
    MessageAppended {
        message: Message,
    },
    FunctionStarted {
        call: FunctionCall,
    },
    FunctionFinished {
        name: String,
        call_again: bool,
    },
    Emitted {
        method: String,
        data: Map<String, Value>,
    },
    Failed {
        error: String,
    },
}

/// Envelope for session events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: Uuid,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: SessionEventPayload,
}

pub(crate) struct SessionEventEmitter {
    session_id: Uuid,
    seq: AtomicU64,
    sink: Option<SessionEventSink>,
}

impl SessionEventEmitter {
    pub(crate) fn new(session_id: Uuid, sink: Option<SessionEventSink>) -> Self {
        Self {
            session_id,
            seq: AtomicU64::new(1),
            sink,
        }
    }

    pub(crate) fn set_sink(&mut self, sink: SessionEventSink) {
        self.sink = Some(sink);
    }

    pub(crate) fn emit(&self, payload: SessionEventPayload) {
        let Some(sink) = &self.sink else {
            return;
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        (sink)(SessionEvent {
            session_id: self.session_id,
            seq,
            timestamp: Utc::now(),
            payload,
        });
    }
}

impl std::fmt::Debug for SessionEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventEmitter")
            .field("session_id", &self.session_id)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn events_are_numbered_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let emitter = SessionEventEmitter::new(
            Uuid::new_v4(),
            Some(Arc::new(move |event: SessionEvent| {
                sink_seen.lock().unwrap().push(event.seq);
            })),
        );
        emitter.emit(SessionEventPayload::Failed { error: "x".into() });
        emitter.emit(SessionEventPayload::StateChanged {
            from: LoopState::Idle,
            to: LoopState::AwaitingModel,
        });
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let json = serde_json::to_value(SessionEventPayload::FunctionFinished {
            name: "get_weather".into(),
            call_again: true,
        })
        .unwrap();
        assert_eq!(json["type"], "function_finished");
        assert_eq!(json["call_again"], true);
    }
}
