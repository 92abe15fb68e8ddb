//! Agent activity timeline for the current chat turn.

mod correlator;
pub mod display;

pub use correlator::{EventCorrelator, ReasoningStep, TimelineEntry, ToolCallEvent, ToolStatus};
