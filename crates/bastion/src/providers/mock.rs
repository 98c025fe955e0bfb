use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::base::{Completion, CompletionOptions, InferenceClient};
use crate::errors::InferenceError;
use crate::models::message::Message;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    Complete(Completion),
    Fail { status: u16, message: String },
}

impl From<Completion> for MockReply {
    fn from(completion: Completion) -> Self {
        MockReply::Complete(completion)
    }
}

/// A request the mock received
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub messages: Vec<Message>,
    pub options: CompletionOptions,
}

/// A mock client that returns pre-configured replies in order, for testing
///
/// Once the script runs out every call fails with [`InferenceError::EmptyResponse`].
#[derive(Debug, Default)]
pub struct MockInferenceClient {
    replies: Mutex<VecDeque<MockReply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockInferenceClient {
    pub fn new<R: Into<MockReply>>(replies: Vec<R>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push<R: Into<MockReply>>(&self, reply: R) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply.into());
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|replies| replies.len()).unwrap_or(0)
    }
}

#[async_trait]
impl InferenceClient for MockInferenceClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, InferenceError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                model: model.to_string(),
                messages: messages.to_vec(),
                options: options.clone(),
            });
        }

        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front());
        match reply {
            Some(MockReply::Complete(completion)) => Ok(completion),
            Some(MockReply::Fail { status, message }) => {
                Err(InferenceError::Status { status, message })
            }
            None => Err(InferenceError::EmptyResponse),
        }
    }
}
