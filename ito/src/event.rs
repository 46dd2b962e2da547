//! Typed streaming event protocol.
//!
//! Every streaming run is identified by an execution id generated once at
//! stream open. All events carry that id, a strictly increasing `index`
//! assigned by a single writer, and a timestamp. Block-level events form
//! nested `Start → Delta* → End` lifecycles per block type; blocks of the
//! same type never interleave, blocks of different types may, and consumers
//! reassemble by keying on `tool_id`/`part_id` plus the execution id.
//!
//! On the wire an event serializes flat, tagged by `type`:
//!
//! ```json
//! { "type": "content_delta", "execution_id": "exec_42", "index": 1, "delta": "Hello" }
//! ```

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Generate a fresh execution id.
#[must_use]
pub fn new_execution_id() -> String {
    format!("exec_{}", Uuid::new_v4().simple())
}

/// Generate a fresh block/part id with the given prefix.
#[must_use]
pub fn new_block_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// A single event in a streaming run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Id of the execution this event belongs to.
    pub execution_id: String,
    /// Monotonically increasing index across the run.
    pub index: u64,
    /// Wall-clock emission time. `index` is the only ordering tie-breaker.
    pub timestamp: DateTime<Utc>,
    /// The typed payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// The payload of a [`StreamEvent`], tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum EventKind {
    /// A thinking block opened.
    ThinkingStart,
    /// A chunk of extended reasoning, hidden from final content.
    ThinkingDelta {
        /// The text chunk.
        delta: String,
    },
    /// The thinking block closed.
    ThinkingEnd,

    /// A content block opened.
    ContentStart,
    /// A chunk of the user-visible answer.
    ContentDelta {
        /// The text chunk.
        delta: String,
    },
    /// The content block closed.
    ContentEnd,

    /// The model started emitting a tool call.
    ToolUseStart {
        /// Id of the tool call.
        tool_id: String,
        /// Name of the tool being called.
        tool_name: String,
    },
    /// A chunk of the evolving JSON arguments for a tool call.
    ToolUseDelta {
        /// Id of the tool call being updated.
        tool_id: String,
        /// Partial JSON arguments.
        delta: String,
    },
    /// The tool call's arguments are complete.
    ToolUseEnd {
        /// Id of the completed tool call.
        tool_id: String,
    },

    /// Execution of a tool began. Emitted only after the matching
    /// tool-use block has ended.
    ToolResultStart {
        /// Id of the tool call being executed.
        tool_id: String,
        /// Name of the tool.
        tool_name: String,
    },
    /// A chunk of the executed tool's serialized output.
    ToolResultDelta {
        /// Id of the tool call.
        tool_id: String,
        /// The output chunk.
        delta: String,
    },
    /// The tool's output is complete.
    ToolResultEnd {
        /// Id of the tool call.
        tool_id: String,
    },

    /// A structured UI fragment opened.
    UiPartStart {
        /// Id of the part.
        part_id: String,
        /// The part's type label.
        part_type: String,
    },
    /// An incremental update to a UI fragment.
    UiPartDelta {
        /// Id of the part being updated.
        part_id: String,
        /// Which section of the part this data belongs to.
        section: String,
        /// The section payload.
        data: Value,
    },
    /// The UI fragment is complete.
    UiPartEnd {
        /// Id of the completed part.
        part_id: String,
    },
}

impl EventKind {
    /// Returns `true` for `*_start` variants.
    #[must_use]
    pub const fn is_start(&self) -> bool {
        matches!(
            self,
            Self::ThinkingStart
                | Self::ContentStart
                | Self::ToolUseStart { .. }
                | Self::ToolResultStart { .. }
                | Self::UiPartStart { .. }
        )
    }

    /// Returns `true` for `*_end` variants.
    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(
            self,
            Self::ThinkingEnd
                | Self::ContentEnd
                | Self::ToolUseEnd { .. }
                | Self::ToolResultEnd { .. }
                | Self::UiPartEnd { .. }
        )
    }

    /// Wire name of this event kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ThinkingStart => "thinking_start",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::ThinkingEnd => "thinking_end",
            Self::ContentStart => "content_start",
            Self::ContentDelta { .. } => "content_delta",
            Self::ContentEnd => "content_end",
            Self::ToolUseStart { .. } => "tool_use_start",
            Self::ToolUseDelta { .. } => "tool_use_delta",
            Self::ToolUseEnd { .. } => "tool_use_end",
            Self::ToolResultStart { .. } => "tool_result_start",
            Self::ToolResultDelta { .. } => "tool_result_delta",
            Self::ToolResultEnd { .. } => "tool_result_end",
            Self::UiPartStart { .. } => "ui_part_start",
            Self::UiPartDelta { .. } => "ui_part_delta",
            Self::UiPartEnd { .. } => "ui_part_end",
        }
    }
}

/// The single-writer event source for one execution.
///
/// A sink stamps each emitted kind with the execution id, the next index,
/// and a timestamp, then forwards it over an unbounded channel. Index
/// assignment and send happen under one lock so indices on the channel are
/// strictly increasing even when a presentation tool emits from another
/// task. Sends never block; events emitted after the consumer hangs up are
/// dropped silently.
#[derive(Debug, Clone)]
pub struct EventSink {
    execution_id: String,
    state: Arc<Mutex<SinkState>>,
}

#[derive(Debug)]
struct SinkState {
    next_index: u64,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl EventSink {
    /// Create a sink and the receiver draining it.
    #[must_use]
    pub fn new(execution_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            execution_id: execution_id.into(),
            state: Arc::new(Mutex::new(SinkState { next_index: 0, tx })),
        };
        (sink, rx)
    }

    /// The execution id this sink is bound to.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Emit an event, assigning the next index.
    pub fn emit(&self, kind: EventKind) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            // A poisoned sink means an emitter panicked; drop the event.
            Err(_) => return,
        };
        let event = StreamEvent {
            execution_id: self.execution_id.clone(),
            index: state.next_index,
            timestamp: Utc::now(),
            kind,
        };
        state.next_index += 1;
        let _ = state.tx.send(event);
    }

    /// Create a UI-part emitter bound to this sink.
    #[must_use]
    pub fn ui_parts(&self) -> UiPartEmitter {
        UiPartEmitter { sink: self.clone() }
    }
}

/// Emitter handed to presentation-tool handlers.
///
/// Wraps an [`EventSink`] restricted to the `ui_part` block lifecycle so a
/// handler can stream structured fragments while computing its result.
#[derive(Debug, Clone)]
pub struct UiPartEmitter {
    sink: EventSink,
}

impl UiPartEmitter {
    /// Open a new part of the given type and return its id.
    #[must_use]
    pub fn start(&self, part_type: impl Into<String>) -> String {
        let part_id = new_block_id("part");
        self.sink.emit(EventKind::UiPartStart {
            part_id: part_id.clone(),
            part_type: part_type.into(),
        });
        part_id
    }

    /// Emit an incremental update for an open part.
    pub fn delta(&self, part_id: &str, section: impl Into<String>, data: Value) {
        self.sink.emit(EventKind::UiPartDelta {
            part_id: part_id.to_owned(),
            section: section.into(),
            data,
        });
    }

    /// Close an open part.
    pub fn end(&self, part_id: &str) {
        self.sink.emit(EventKind::UiPartEnd {
            part_id: part_id.to_owned(),
        });
    }

    /// The execution id this emitter is bound to.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        self.sink.execution_id()
    }
}
