//! Normalizes ACP `session/update` payloads into the closed event set.
//!
//! Anything outside the closed set is dropped with a debug log — an
//! unknown update kind from a newer peer must not break the stream.

use tracing::debug;

use crate::acp::protocol::SessionUpdate;
use crate::models::event::SessionEventPayload;
use crate::models::message::{ToolCallStatus, ToolKind};

/// Translate one ACP session update into a session event payload.
///
/// Returns `None` for updates that carry nothing the pipeline records.
#[must_use]
pub fn normalize_update(update: SessionUpdate) -> Option<SessionEventPayload> {
    match update {
        SessionUpdate::AgentMessageChunk { content } => {
            Some(SessionEventPayload::AgentMessageChunk {
                text: content.as_text().to_owned(),
            })
        }

        SessionUpdate::AgentThoughtChunk { content } => {
            Some(SessionEventPayload::AgentThoughtChunk {
                text: content.as_text().to_owned(),
            })
        }

        SessionUpdate::ToolCall { fields } => {
            let title = fields
                .title
                .unwrap_or_else(|| fields.tool_call_id.clone());
            Some(SessionEventPayload::ToolCallStart {
                tool_call_id: fields.tool_call_id,
                title,
                kind: parse_tool_kind(fields.kind.as_deref()),
                raw_input: fields.raw_input,
                status: parse_tool_status(fields.status.as_deref())
                    .unwrap_or(ToolCallStatus::Pending),
                locations: fields.locations.unwrap_or_default(),
            })
        }

        SessionUpdate::ToolCallUpdate { fields } => Some(SessionEventPayload::ToolCallUpdate {
            tool_call_id: fields.tool_call_id,
            status: parse_tool_status(fields.status.as_deref()),
            raw_output: fields.raw_output,
            content: fields.content,
            locations: fields.locations,
        }),

        SessionUpdate::CurrentModeUpdate { current_mode_id } => {
            Some(SessionEventPayload::ModeChange {
                mode_id: current_mode_id,
            })
        }
    }
}

/// Parse a tool-kind string; unknown kinds fold into [`ToolKind::Other`].
fn parse_tool_kind(kind: Option<&str>) -> ToolKind {
    match kind {
        Some("read") => ToolKind::Read,
        Some("edit") => ToolKind::Edit,
        Some("execute") => ToolKind::Execute,
        Some("fetch") => ToolKind::Fetch,
        Some("think") => ToolKind::Think,
        other => {
            if let Some(other) = other {
                debug!(kind = other, "normalizer: unknown tool kind");
            }
            ToolKind::Other
        }
    }
}

/// Parse a tool-status string; unknown statuses are ignored.
fn parse_tool_status(status: Option<&str>) -> Option<ToolCallStatus> {
    match status? {
        "pending" => Some(ToolCallStatus::Pending),
        "in_progress" => Some(ToolCallStatus::InProgress),
        "completed" => Some(ToolCallStatus::Completed),
        "failed" => Some(ToolCallStatus::Failed),
        other => {
            debug!(status = other, "normalizer: unknown tool status");
            None
        }
    }
}
