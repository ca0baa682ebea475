//! Folds streaming chunks into complete, persistable messages.
//!
//! Adjacent agent-message chunks concatenate into one `agent_message`;
//! adjacent thought chunks into one `agent_thought`. A buffered block
//! closes when the block kind switches, when a tool call reaches a
//! terminal status, when a mode change arrives, or when the turn
//! completes (the pipeline calls [`MessageAssembler::flush`] on turn
//! terminators). Tool calls persist once terminal; mode changes persist
//! as-is.

use std::collections::HashMap;

use crate::models::event::SessionEventPayload;
use crate::models::message::{MessagePayload, ToolCallState, ToolCallStatus};

/// Which text block is currently buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextKind {
    Message,
    Thought,
}

/// Per-session streaming-to-message assembler.
#[derive(Default)]
pub struct MessageAssembler {
    buffer: Option<(TextKind, String)>,
    tool_calls: HashMap<String, ToolCallState>,
}

impl MessageAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one live event; returns messages completed by it, in order.
    pub fn observe(&mut self, payload: &SessionEventPayload) -> Vec<MessagePayload> {
        match payload {
            SessionEventPayload::AgentMessageChunk { text } => {
                self.append_text(TextKind::Message, text)
            }
            SessionEventPayload::AgentThoughtChunk { text } => {
                self.append_text(TextKind::Thought, text)
            }

            SessionEventPayload::ToolCallStart {
                tool_call_id,
                title,
                kind,
                raw_input,
                status,
                locations,
            } => {
                let state = ToolCallState {
                    tool_call_id: tool_call_id.clone(),
                    title: title.clone(),
                    kind: *kind,
                    raw_input: raw_input.clone(),
                    raw_output: None,
                    status: *status,
                    locations: locations.clone(),
                };
                if state.status.is_terminal() {
                    return self.close_tool_call(state);
                }
                self.tool_calls.insert(tool_call_id.clone(), state);
                Vec::new()
            }

            SessionEventPayload::ToolCallUpdate {
                tool_call_id,
                status,
                raw_output,
                content: _,
                locations,
            } => {
                let Some(mut state) = self.tool_calls.remove(tool_call_id) else {
                    return Vec::new();
                };
                if let Some(status) = status {
                    state.status = *status;
                }
                if let Some(output) = raw_output {
                    state.raw_output = Some(output.clone());
                }
                if let Some(locations) = locations {
                    state.locations.clone_from(locations);
                }
                if state.status.is_terminal() {
                    return self.close_tool_call(state);
                }
                self.tool_calls.insert(tool_call_id.clone(), state);
                Vec::new()
            }

            SessionEventPayload::ModeChange { mode_id } => {
                let mut out = self.take_buffer();
                out.push(MessagePayload::ModeChange {
                    mode_id: mode_id.clone(),
                });
                out
            }

            SessionEventPayload::StatusChange { .. }
            | SessionEventPayload::PermissionRequest { .. } => Vec::new(),
        }
    }

    /// Close the current turn: everything buffered is complete.
    pub fn flush(&mut self) -> Vec<MessagePayload> {
        self.take_buffer()
    }

    /// Append a chunk, closing a block of the other kind first.
    fn append_text(&mut self, kind: TextKind, text: &str) -> Vec<MessagePayload> {
        let mut out = Vec::new();
        let switching = matches!(&self.buffer, Some((current, _)) if *current != kind);
        if switching {
            out.extend(self.take_buffer());
        }
        match &mut self.buffer {
            Some((_, buffered)) => buffered.push_str(text),
            None => self.buffer = Some((kind, text.to_owned())),
        }
        out
    }

    /// A terminal tool call closes the open text block, then persists.
    fn close_tool_call(&mut self, state: ToolCallState) -> Vec<MessagePayload> {
        debug_assert!(matches!(
            state.status,
            ToolCallStatus::Completed | ToolCallStatus::Failed
        ));
        let mut out = self.take_buffer();
        out.push(MessagePayload::ToolCall { state });
        out
    }

    /// Convert the buffered block into a message payload, if any.
    fn take_buffer(&mut self) -> Vec<MessagePayload> {
        match self.buffer.take() {
            Some((TextKind::Message, text)) if !text.is_empty() => {
                vec![MessagePayload::AgentMessage { text }]
            }
            Some((TextKind::Thought, text)) if !text.is_empty() => {
                vec![MessagePayload::AgentThought { text }]
            }
            _ => Vec::new(),
        }
    }
}
