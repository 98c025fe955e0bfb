use std::sync::Mutex;

use serde::Serialize;

/// Why a quarantine loop stopped asking questions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Done,
    MalformedQuestion,
    MaxRounds,
}

/// Structured progress of one quarantine run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QuarantineEvent {
    RoundStarted {
        tool_call_id: String,
        round: u32,
        max_rounds: u32,
    },
    QuestionAsked {
        tool_call_id: String,
        round: u32,
        question: String,
        options: Vec<String>,
    },
    AnswerSelected {
        tool_call_id: String,
        round: u32,
        index: usize,
        option: String,
        defaulted: bool,
    },
    Finished {
        tool_call_id: String,
        rounds: u32,
        termination: Termination,
    },
}

pub trait QuarantineObserver: Send + Sync {
    fn on_event(&self, event: &QuarantineEvent);
}

/// Writes every event to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl QuarantineObserver for TracingObserver {
    fn on_event(&self, event: &QuarantineEvent) {
        match event {
            QuarantineEvent::RoundStarted {
                tool_call_id,
                round,
                max_rounds,
            } => tracing::debug!(tool_call_id, round, max_rounds, "quarantine round started"),
            QuarantineEvent::QuestionAsked {
                tool_call_id,
                round,
                question,
                options,
            } => tracing::debug!(
                tool_call_id,
                round,
                question,
                option_count = options.len(),
                "main agent asked a question"
            ),
            QuarantineEvent::AnswerSelected {
                tool_call_id,
                round,
                index,
                defaulted,
                ..
            } => {
                if *defaulted {
                    tracing::warn!(
                        tool_call_id,
                        round,
                        index,
                        "quarantined agent gave an invalid answer, defaulting to the last option"
                    );
                } else {
                    tracing::debug!(tool_call_id, round, index, "quarantined agent answered");
                }
            }
            QuarantineEvent::Finished {
                tool_call_id,
                rounds,
                termination,
            } => tracing::info!(
                tool_call_id,
                rounds,
                termination = ?termination,
                "quarantine finished"
            ),
        }
    }
}

/// Keeps every event in memory, for assertions on loop behaviour
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<QuarantineEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<QuarantineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn rounds_started(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, QuarantineEvent::RoundStarted { .. }))
            .count()
    }
}

impl QuarantineObserver for RecordingObserver {
    fn on_event(&self, event: &QuarantineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
