use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::config::{DualLlmConfig, DualLlmResult};
use super::events::{QuarantineEvent, QuarantineObserver, Termination, TracingObserver};
use super::question::{is_done, parse_question, resolve_answer, Question, ResolvedAnswer};
use crate::errors::DualLlmError;
use crate::models::content::MessageContent;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::prompt_template::load_prompt;
use crate::providers::base::{multiple_choice_schema, CompletionOptions, InferenceClient};
use crate::stores::DualLlmResultStore;

pub const DEFAULT_USER_REQUEST: &str = "process this data";
pub const MULTIPLE_CHOICE_SCHEMA_NAME: &str = "multiple_choice_response";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MainAgentContext<'a> {
    original_user_request: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuarantinedAgentContext<'a> {
    tool_result_data: &'a str,
    question: &'a str,
    options: &'a str,
    max_index: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryContext<'a> {
    qa_text: &'a str,
}

/// What a finished quarantine run produced
#[derive(Debug, Clone, PartialEq)]
pub struct QuarantineOutcome {
    pub summary: String,
    /// The main agent's side of the exchange, which never contains the tool result
    pub conversation: Vec<Message>,
    pub rounds: u32,
    pub termination: Termination,
}

/// The content of the latest user message, or a generic request when there is none
///
/// Multimodal content is passed along as its JSON text.
pub fn original_user_request(messages: &[Message]) -> String {
    let content = messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .and_then(|message| message.content.as_ref())
        .filter(|content| !content.is_empty());

    match content {
        Some(MessageContent::Text(text)) => text.clone(),
        Some(content @ MessageContent::Parts(_)) => {
            serde_json::to_string(content).unwrap_or_else(|_| content.text())
        }
        None => DEFAULT_USER_REQUEST.to_string(),
    }
}

/// A tool message's content as JSON when it parses, as a plain string otherwise
pub fn tool_result_data(message: &Message) -> Value {
    let text = message.text();
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// The textual turns of a Q&A transcript, one per line
fn qa_text(conversation: &[Message]) -> String {
    conversation
        .iter()
        .map(Message::text)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs the dual-LLM quarantine protocol for one untrusted tool result
pub struct DualLlmSubagent {
    config: DualLlmConfig,
    agent_id: String,
    client: Arc<dyn InferenceClient>,
    result_store: Arc<dyn DualLlmResultStore>,
    observer: Arc<dyn QuarantineObserver>,
}

impl DualLlmSubagent {
    pub fn new<S: Into<String>>(
        config: DualLlmConfig,
        agent_id: S,
        client: Arc<dyn InferenceClient>,
        result_store: Arc<dyn DualLlmResultStore>,
    ) -> Self {
        Self {
            config,
            agent_id: agent_id.into(),
            client,
            result_store,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn QuarantineObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn render<T: Serialize>(template: &str, context: &T) -> Result<String, DualLlmError> {
        load_prompt(template, context).map_err(|e| DualLlmError::Template(e.to_string()))
    }

    /// Question the tool result through the quarantined model and return a summary that
    /// is safe to show the privileged model.
    ///
    /// The result is persisted once the summary exists. Tool messages without a call id
    /// are never persisted.
    pub async fn process_with_main_agent(
        &self,
        messages: &[Message],
        tool_message: &Message,
    ) -> Result<QuarantineOutcome, DualLlmError> {
        let tool_call_id = tool_message.tool_call_id.clone().unwrap_or_default();
        let user_request = original_user_request(messages);
        let tool_result = tool_result_data(tool_message);

        let outcome = self
            .run_rounds(&tool_call_id, &user_request, &tool_result)
            .await?;

        if tool_call_id.is_empty() {
            tracing::debug!("tool message has no call id, quarantine result not cached");
        } else {
            self.result_store
                .create(DualLlmResult::new(
                    self.agent_id.clone(),
                    tool_call_id,
                    outcome.conversation.clone(),
                    outcome.summary.clone(),
                ))
                .await?;
        }
        Ok(outcome)
    }

    async fn run_rounds(
        &self,
        tool_call_id: &str,
        user_request: &str,
        tool_result: &Value,
    ) -> Result<QuarantineOutcome, DualLlmError> {
        let opening = Self::render(
            &self.config.main_agent_prompt,
            &MainAgentContext {
                original_user_request: user_request,
            },
        )?;
        let mut conversation = vec![Message::user().with_text(opening)];
        let max_rounds = self.config.max_rounds;
        let mut rounds = 0;
        let mut termination = Termination::MaxRounds;

        for round in 1..=max_rounds {
            rounds = round;
            self.observer.on_event(&QuarantineEvent::RoundStarted {
                tool_call_id: tool_call_id.to_string(),
                round,
                max_rounds,
            });

            let response = self
                .client
                .complete(
                    &self.config.main_model,
                    &conversation,
                    &CompletionOptions::deterministic(),
                )
                .await?
                .trimmed_content();
            conversation.push(Message::assistant().with_text(response.clone()));

            if is_done(&response) {
                termination = Termination::Done;
                break;
            }
            let Some(question) = parse_question(&response) else {
                termination = Termination::MalformedQuestion;
                break;
            };
            self.observer.on_event(&QuarantineEvent::QuestionAsked {
                tool_call_id: tool_call_id.to_string(),
                round,
                question: question.question.clone(),
                options: question.options.clone(),
            });

            let answer = self.answer_question(&question, tool_result).await?;
            let selected = question.options[answer.index].clone();
            self.observer.on_event(&QuarantineEvent::AnswerSelected {
                tool_call_id: tool_call_id.to_string(),
                round,
                index: answer.index,
                option: selected.clone(),
                defaulted: answer.defaulted,
            });

            conversation.push(
                Message::user().with_text(format!("Answer: {} ({})", answer.index, selected)),
            );
        }

        self.observer.on_event(&QuarantineEvent::Finished {
            tool_call_id: tool_call_id.to_string(),
            rounds,
            termination,
        });

        let summary = self.generate_summary(&conversation).await?;
        Ok(QuarantineOutcome {
            summary,
            conversation,
            rounds,
            termination,
        })
    }

    /// The only call that sees the tool result. Its output is reduced to an option index.
    async fn answer_question(
        &self,
        question: &Question,
        tool_result: &Value,
    ) -> Result<ResolvedAnswer, DualLlmError> {
        let tool_result_data =
            serde_json::to_string_pretty(tool_result).unwrap_or_else(|_| tool_result.to_string());
        let options = question.render_options();
        let prompt = Self::render(
            &self.config.quarantined_agent_prompt,
            &QuarantinedAgentContext {
                tool_result_data: &tool_result_data,
                question: &question.question,
                options: &options,
                max_index: question.max_index(),
            },
        )?;

        let completion = self
            .client
            .complete(
                &self.config.quarantined_model,
                &[Message::user().with_text(prompt)],
                &CompletionOptions::deterministic()
                    .with_json_schema(MULTIPLE_CHOICE_SCHEMA_NAME, multiple_choice_schema()),
            )
            .await?;

        let answer = completion
            .structured_output
            .as_ref()
            .and_then(|output| output.get("answer"));
        Ok(resolve_answer(answer, question.options.len()))
    }

    async fn generate_summary(&self, conversation: &[Message]) -> Result<String, DualLlmError> {
        let qa_text = qa_text(conversation);
        let prompt = Self::render(
            &self.config.summary_prompt,
            &SummaryContext { qa_text: &qa_text },
        )?;
        let completion = self
            .client
            .complete(
                &self.config.main_model,
                &[Message::user().with_text(prompt)],
                &CompletionOptions::deterministic(),
            )
            .await?;
        Ok(completion.trimmed_content())
    }
}
