//! Merges reasoning notes and tool call/result pairs into one ordered timeline.
//!
//! Results carry no call id, so a result is matched to the most recent call of the same tool
//! that is still `Calling`. Results with no such call are dropped.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::realtime::{ToolCallPayload, ToolResultPayload};

#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningStep {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Calling,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallEvent {
    pub tool_name: String,
    pub parameters: Map<String, Value>,
    pub status: ToolStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Milliseconds, as reported by the backend.
    pub duration: Option<u64>,
    pub timestamp: DateTime<Utc>,
    seq: u64,
}

/// One renderable timeline item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimelineEntry<'a> {
    Reasoning(&'a ReasoningStep),
    Tool(&'a ToolCallEvent),
}

impl TimelineEntry<'_> {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TimelineEntry::Reasoning(r) => r.timestamp,
            TimelineEntry::Tool(t) => t.timestamp,
        }
    }

    fn seq(&self) -> u64 {
        match self {
            TimelineEntry::Reasoning(r) => r.seq,
            TimelineEntry::Tool(t) => t.seq,
        }
    }
}

/// Per-turn correlation state. Not persisted; cleared at the start of each turn.
#[derive(Debug, Default)]
pub struct EventCorrelator {
    reasoning_steps: Vec<ReasoningStep>,
    tool_calls: Vec<ToolCallEvent>,
    next_seq: u64,
}

impl EventCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    fn seq(&mut self) -> u64 {
        let s = self.next_seq;
        self.next_seq += 1;
        s
    }

    /// Append a reasoning note; a missing timestamp means "now".
    pub fn push_reasoning(
        &mut self,
        content: impl Into<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> &ReasoningStep {
        let seq = self.seq();
        self.reasoning_steps.push(ReasoningStep {
            content: content.into(),
            timestamp: timestamp.unwrap_or_else(crate::time::now),
            seq,
        });
        &self.reasoning_steps[self.reasoning_steps.len() - 1]
    }

    /// Append a new call in `Calling` state; returns its index in [`Self::tool_calls`].
    pub fn push_tool_call(&mut self, payload: ToolCallPayload) -> usize {
        let seq = self.seq();
        self.tool_calls.push(ToolCallEvent {
            tool_name: payload.tool_name,
            parameters: payload.parameters.unwrap_or_default(),
            status: ToolStatus::Calling,
            result: None,
            error: None,
            duration: None,
            timestamp: payload.timestamp.unwrap_or_else(crate::time::now),
            seq,
        });
        self.tool_calls.len() - 1
    }

    /// Complete (or fail) the latest pending call of the same tool. Returns its index, or
    /// `None` when nothing was pending and the result was dropped.
    pub fn apply_tool_result(&mut self, payload: ToolResultPayload) -> Option<usize> {
        let Some(index) = self
            .tool_calls
            .iter()
            .rposition(|c| c.tool_name == payload.tool_name && c.status == ToolStatus::Calling)
        else {
            log::warn!(
                "dropping result for {}: no pending call",
                payload.tool_name
            );
            return None;
        };
        let call = &mut self.tool_calls[index];
        call.status = if payload.error.is_some() {
            ToolStatus::Failed
        } else {
            ToolStatus::Completed
        };
        call.result = Some(payload.result);
        call.error = payload.error;
        call.duration = payload.duration;
        Some(index)
    }

    pub fn reasoning_steps(&self) -> &[ReasoningStep] {
        &self.reasoning_steps
    }

    pub fn tool_calls(&self) -> &[ToolCallEvent] {
        &self.tool_calls
    }

    pub fn is_empty(&self) -> bool {
        self.reasoning_steps.is_empty() && self.tool_calls.is_empty()
    }

    /// Both sequences merged and sorted by timestamp; equal timestamps keep arrival order.
    pub fn timeline(&self) -> Vec<TimelineEntry<'_>> {
        let mut entries: Vec<TimelineEntry<'_>> = self
            .reasoning_steps
            .iter()
            .map(TimelineEntry::Reasoning)
            .chain(self.tool_calls.iter().map(TimelineEntry::Tool))
            .collect();
        entries.sort_by_key(|e| (e.timestamp(), e.seq()));
        entries
    }

    pub fn clear(&mut self) {
        self.reasoning_steps.clear();
        self.tool_calls.clear();
    }
}
