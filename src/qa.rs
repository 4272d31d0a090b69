//! # Answer generation
//!
//! Assembles retrieved contexts, a bounded window of prior conversation, and
//! the user's question into a generation request, and degrades gracefully
//! when the generation backend fails.
//!
//! The prompt layout is deterministic: document name header, numbered
//! context sections in rank order, the question, and a closing instruction
//! to answer only from the given content. Contexts are added until one would
//! push the prompt past the character budget; that one (and the rest of the
//! ranked list behind it) is dropped whole rather than truncated mid-text,
//! which keeps every included section coherent.
//!
//! Conversation history is bounded twice over: only the last few turns are
//! included, and each turn's answer is capped at a fixed character count, so
//! prompt growth is independent of how verbose past answers were.

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::SageError;

/// One prior question/answer exchange. Persistence of these lives outside
/// the core; callers pass in whatever recent history they have.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

/// Opaque prompt→text collaborator.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Label of the underlying model, for answer metadata.
    fn model_name(&self) -> &str;

    /// Produce an answer for the given system/user prompt pair.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, SageError>;
}

/// Generator over any OpenAI-compatible chat completion endpoint.
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(api_base: &str, api_key: &str, model: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(api_base.to_string())
            .with_api_key(api_key.to_string());
        debug!(api_base, model, "generation client created");
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, SageError> {
        let system =
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(system_prompt.to_string()),
                name: None,
            });
        let user = ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(user_prompt.to_string()),
            name: None,
        });

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(vec![system, user])
            .build()
            .map_err(|e| SageError::Generation(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| SageError::Generation(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| SageError::Generation("completion had no content".to_string()))
    }
}

/// Builds the system and user prompts for grounded question answering.
pub struct PromptBuilder {
    context_char_budget: usize,
    history_turns: usize,
    history_answer_cap: usize,
}

impl PromptBuilder {
    pub fn new(context_char_budget: usize, history_turns: usize, history_answer_cap: usize) -> Self {
        Self {
            context_char_budget,
            history_turns,
            history_answer_cap,
        }
    }

    /// The fixed system prompt, with the bounded history window appended
    /// when any turns are supplied.
    pub fn system_prompt(&self, history: &[ConversationTurn]) -> String {
        let mut prompt = String::from(
            "You are an AI assistant specialized in document analysis.\n\
             \n\
             INSTRUCTIONS:\n\
             - Answer using ONLY the provided content\n\
             - If the information is insufficient, say so clearly\n\
             - Keep answers concise but complete\n\
             - Cite the specific parts of the document you used\n\
             - Keep a professional, friendly tone\n\
             \n\
             RESPONSE FORMAT:\n\
             - Start with the direct answer\n\
             - Add supporting detail from the document\n\
             - Close with references when available",
        );

        if !history.is_empty() && self.history_turns > 0 {
            let start = history.len().saturating_sub(self.history_turns);
            prompt.push_str("\n\nPREVIOUS EXCHANGES:");
            for turn in &history[start..] {
                let answer = truncate_chars(&turn.answer, self.history_answer_cap);
                let _ = write!(prompt, "\nQ: {}\nA: {answer}", turn.question);
            }
        }
        prompt
    }

    /// Concatenate ranked contexts into numbered sections under the
    /// character budget, then lay out the full user prompt.
    pub fn user_prompt(&self, question: &str, contexts: &[String], document_name: &str) -> String {
        let mut context_text = String::new();
        for (i, context) in contexts.iter().enumerate() {
            let section = format!("SECTION {}:\n{}\n\n", i + 1, context);
            if char_len(&context_text) + char_len(&section) > self.context_char_budget {
                debug!(
                    included = i,
                    dropped = contexts.len() - i,
                    "context budget reached"
                );
                break;
            }
            context_text.push_str(&section);
        }

        format!(
            "DOCUMENT: {document_name}\n\n\
             RELEVANT CONTENT:\n{}\n\n\
             QUESTION: {question}\n\n\
             Answer the question using only the content provided from the document \"{document_name}\".",
            context_text.trim_end()
        )
    }
}

/// How the answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Success,
    /// Generation failed; the answer is a fallback apology.
    Degraded,
}

/// The generated answer plus its metadata. `error` carries the underlying
/// failure message when `status` is [`AnswerStatus::Degraded`].
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub model: String,
    pub context_count: usize,
    pub status: AnswerStatus,
    pub error: Option<String>,
}

/// Fallback text returned when the generation backend fails.
const FALLBACK_ANSWER: &str =
    "I am sorry, I could not generate an answer for this question right now. Please try again.";

/// Question answering over retrieved contexts.
pub struct DocumentQa {
    generator: Arc<dyn Generator>,
    prompts: PromptBuilder,
    request_timeout: Duration,
}

impl DocumentQa {
    pub fn new(generator: Arc<dyn Generator>, prompts: PromptBuilder, request_timeout: Duration) -> Self {
        Self {
            generator,
            prompts,
            request_timeout,
        }
    }

    /// Answer `question` from the given contexts. Generation failure is
    /// never fatal: the caller always gets an [`Answer`], degraded if the
    /// backend errored or timed out.
    pub async fn answer_question(
        &self,
        question: &str,
        contexts: &[String],
        document_name: &str,
        history: &[ConversationTurn],
    ) -> Answer {
        let system_prompt = self.prompts.system_prompt(history);
        let user_prompt = self.prompts.user_prompt(question, contexts, document_name);

        let completion = match tokio::time::timeout(
            self.request_timeout,
            self.generator.complete(&system_prompt, &user_prompt),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SageError::Timeout {
                operation: "generation",
                seconds: self.request_timeout.as_secs(),
            }),
        };

        match completion {
            Ok(answer) => {
                info!(document_name, "answer generated");
                Answer {
                    answer,
                    model: self.generator.model_name().to_string(),
                    context_count: contexts.len(),
                    status: AnswerStatus::Success,
                    error: None,
                }
            }
            Err(e) => {
                error!(document_name, error = %e, "generation failed; returning fallback answer");
                Answer {
                    answer: FALLBACK_ANSWER.to_string(),
                    model: self.generator.model_name().to_string(),
                    context_count: contexts.len(),
                    status: AnswerStatus::Degraded,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// First `cap` characters of `s`, with a trailing ellipsis when truncated.
fn truncate_chars(s: &str, cap: usize) -> String {
    if char_len(s) <= cap {
        return s.to_string();
    }
    let mut truncated: String = s.chars().take(cap).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, _system: &str, user: &str) -> Result<String, SageError> {
            Ok(format!("echo: {}", user.lines().next().unwrap_or_default()))
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        fn model_name(&self) -> &str {
            "broken"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String, SageError> {
            Err(SageError::Generation("backend unavailable".to_string()))
        }
    }

    fn prompts() -> PromptBuilder {
        PromptBuilder::new(2500, 2, 200)
    }

    #[test]
    fn user_prompt_layout_is_deterministic() {
        let contexts = vec!["first context".to_string(), "second context".to_string()];
        let prompt = prompts().user_prompt("What is this?", &contexts, "report.pdf");

        assert_eq!(
            prompt,
            "DOCUMENT: report.pdf\n\n\
             RELEVANT CONTENT:\n\
             SECTION 1:\nfirst context\n\n\
             SECTION 2:\nsecond context\n\n\
             QUESTION: What is this?\n\n\
             Answer the question using only the content provided from the document \"report.pdf\"."
        );
    }

    #[test]
    fn context_over_budget_is_dropped_whole() {
        let contexts = vec![
            "a".repeat(80),
            "b".repeat(80),
            "tiny".to_string(),
        ];
        let builder = PromptBuilder::new(100, 2, 200);
        let prompt = builder.user_prompt("q", &contexts, "doc");

        assert!(prompt.contains("SECTION 1:"));
        // The second context would overflow; it and everything ranked below
        // it are omitted entirely, never truncated mid-context.
        assert!(!prompt.contains("SECTION 2:"));
        assert!(!prompt.contains("bbbb"));
        assert!(!prompt.contains("tiny"));
    }

    #[test]
    fn history_window_is_bounded_and_answers_capped() {
        let history = vec![
            ConversationTurn {
                question: "oldest?".to_string(),
                answer: "ancient answer".to_string(),
            },
            ConversationTurn {
                question: "middle?".to_string(),
                answer: "middle answer".to_string(),
            },
            ConversationTurn {
                question: "latest?".to_string(),
                answer: "x".repeat(500),
            },
        ];
        let prompt = prompts().system_prompt(&history);

        assert!(!prompt.contains("oldest?"));
        assert!(prompt.contains("middle?"));
        assert!(prompt.contains("latest?"));
        let capped = format!("{}...", "x".repeat(200));
        assert!(prompt.contains(&capped));
        assert!(!prompt.contains(&"x".repeat(201)));
    }

    #[test]
    fn empty_history_leaves_the_system_prompt_alone() {
        let prompt = prompts().system_prompt(&[]);
        assert!(!prompt.contains("PREVIOUS EXCHANGES"));
    }

    #[tokio::test]
    async fn successful_generation_reports_success() {
        let qa = DocumentQa::new(Arc::new(EchoGenerator), prompts(), Duration::from_secs(5));
        let answer = qa
            .answer_question("q", &["ctx".to_string()], "doc", &[])
            .await;

        assert_eq!(answer.status, AnswerStatus::Success);
        assert_eq!(answer.model, "echo");
        assert_eq!(answer.context_count, 1);
        assert!(answer.error.is_none());
        assert!(answer.answer.starts_with("echo: DOCUMENT: doc"));
    }

    #[tokio::test]
    async fn generation_failure_degrades_instead_of_propagating() {
        let qa = DocumentQa::new(Arc::new(FailingGenerator), prompts(), Duration::from_secs(5));
        let answer = qa
            .answer_question("q", &["ctx".to_string()], "doc", &[])
            .await;

        assert_eq!(answer.status, AnswerStatus::Degraded);
        assert_eq!(answer.answer, FALLBACK_ANSWER);
        assert!(answer.error.as_deref().unwrap().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn openai_generator_round_trips_a_chat_completion() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(serde_json::json!({
                        "id": "chatcmpl-1",
                        "object": "chat.completion",
                        "created": 0,
                        "model": "test-model",
                        "choices": [{
                            "index": 0,
                            "message": {"role": "assistant", "content": "Grounded answer."},
                            "finish_reason": "stop"
                        }],
                        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
                    }));
            })
            .await;

        let generator = OpenAiGenerator::new(&server.base_url(), "test-key", "test-model");
        let answer = generator.complete("system", "user").await.unwrap();

        mock.assert_async().await;
        assert_eq!(answer, "Grounded answer.");
    }
}
