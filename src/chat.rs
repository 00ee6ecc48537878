//! Document Q&A over the index and an OpenAI-compatible chat model.
//!
//! [`ChatService::ask`] searches the document's isolation key, builds a
//! system prompt, the recent history and a context-augmented user turn, and
//! appends both the question and the answer to the chat history.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use lectern_core::models::{ChatMessage, ChatRole, StageStatus};
use lectern_core::services::{
    ChatModel, ChatTurn, Indexer, SearchRequest, SearchResult, ServiceError,
};
use lectern_core::store::Store;

use crate::config::ChatConfig;
use crate::http::Endpoint;

pub const DEFAULT_MODEL: &str = "Qwen/Qwen2.5-7B-Instruct";

const SYSTEM_PROMPT: &str = "You answer questions about a single document. \
Use only the excerpts provided with each question. If the excerpts do not \
contain the answer, say so plainly. Answer in the language of the question.";

/// Client for an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiChat {
    endpoint: Endpoint,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("chat.url must be set"))?;
        Ok(Self {
            endpoint: Endpoint::new(url, config.timeout_secs)?,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatTurn]) -> Result<String, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let response = self
            .endpoint
            .post_json(Some("v1/chat/completions"), &body)
            .await?;
        let parsed: CompletionResponse = self.endpoint.read_json(response).await?;
        first_choice(parsed)
    }
}

fn first_choice(parsed: CompletionResponse) -> Result<String, ServiceError> {
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ServiceError::InvalidResponse("completion has no content".into()))
}

#[derive(Debug, Error)]
pub enum AskError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("document is not indexed yet (indexing is {0})")]
    NotIndexed(StageStatus),
    #[error("question must not be empty")]
    EmptyQuestion,
    #[error("chat is not configured (set chat.url)")]
    Disabled,
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Answer produced by [`ChatService::ask`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct Answer {
    pub question: ChatMessage,
    pub answer: ChatMessage,
    pub context: SearchResult,
}

pub struct ChatService {
    store: Arc<dyn Store>,
    indexer: Arc<dyn Indexer>,
    model: Option<Arc<dyn ChatModel>>,
    settings: ChatConfig,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn Store>,
        indexer: Arc<dyn Indexer>,
        model: Option<Arc<dyn ChatModel>>,
        settings: ChatConfig,
    ) -> Self {
        Self {
            store,
            indexer,
            model,
            settings,
        }
    }

    /// Chat service with the OpenAI-compatible client when `chat.url` is set.
    pub fn from_config(
        config: &ChatConfig,
        store: Arc<dyn Store>,
        indexer: Arc<dyn Indexer>,
    ) -> Result<Self> {
        let model: Option<Arc<dyn ChatModel>> = match config.url {
            Some(_) => Some(Arc::new(OpenAiChat::new(config)?)),
            None => None,
        };
        Ok(Self::new(store, indexer, model, config.clone()))
    }

    pub async fn history(&self, document_id: &str) -> Result<Vec<ChatMessage>, AskError> {
        if self.store.get_document(document_id).await?.is_none() {
            return Err(AskError::NotFound(document_id.to_string()));
        }
        Ok(self.store.list_chat_messages(document_id).await?)
    }

    /// Search-only entry point shared with the `search` command and route.
    pub async fn search(
        &self,
        document_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<SearchResult, AskError> {
        let doc = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| AskError::NotFound(document_id.to_string()))?;
        if doc.indexing_status != StageStatus::Ready {
            return Err(AskError::NotIndexed(doc.indexing_status));
        }
        Ok(self
            .indexer
            .search(&SearchRequest {
                isolation_key: doc.isolation_key(),
                query: query.to_string(),
                limit,
                context_window: self.settings.context_window,
            })
            .await?)
    }

    pub async fn ask(&self, document_id: &str, question: &str) -> Result<Answer, AskError> {
        let model = self.model.as_ref().ok_or(AskError::Disabled)?;
        let question = question.trim();
        if question.is_empty() {
            return Err(AskError::EmptyQuestion);
        }

        let context = self
            .search(document_id, question, self.settings.context_limit)
            .await?;
        let history = self.store.list_chat_messages(document_id).await?;
        let messages = build_prompt(&history, self.settings.history_limit, &context, question);

        tracing::debug!(doc_id = %document_id, turns = messages.len(), "asking chat model");
        let reply = model.complete(&messages).await?;

        let question = ChatMessage::new(document_id, ChatRole::User, question);
        let answer = ChatMessage::new(document_id, ChatRole::Assistant, reply.trim());
        self.store.append_chat_message(&question).await?;
        self.store.append_chat_message(&answer).await?;

        Ok(Answer {
            question,
            answer,
            context,
        })
    }
}

/// System prompt, the last `history_limit` messages, then the question with
/// the retrieved excerpts.
pub fn build_prompt(
    history: &[ChatMessage],
    history_limit: usize,
    context: &SearchResult,
    question: &str,
) -> Vec<ChatTurn> {
    let mut messages = vec![ChatTurn::system(SYSTEM_PROMPT)];

    let skip = history.len().saturating_sub(history_limit);
    for message in &history[skip..] {
        messages.push(match message.role {
            ChatRole::User => ChatTurn::user(message.content.clone()),
            ChatRole::Assistant => ChatTurn::assistant(message.content.clone()),
        });
    }

    let excerpts = if context.matched_text.trim().is_empty() {
        "(no relevant excerpts found)".to_string()
    } else {
        context.matched_text.clone()
    };
    messages.push(ChatTurn::user(format!(
        "Document excerpts:\n{}\n\nQuestion: {}",
        excerpts, question
    )));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_core::models::{NewDocument, Stage};
    use lectern_core::services::{IndexReceipt, IndexRequest, SearchEntry};
    use lectern_core::store::memory::InMemoryStore;
    use std::sync::Mutex;

    struct FixedIndexer;

    #[async_trait]
    impl Indexer for FixedIndexer {
        async fn index(&self, _request: &IndexRequest) -> Result<IndexReceipt, ServiceError> {
            Ok(IndexReceipt {
                status: "ok".into(),
            })
        }

        async fn search(&self, request: &SearchRequest) -> Result<SearchResult, ServiceError> {
            Ok(SearchResult {
                matched_text: format!("excerpt for {}", request.isolation_key),
                entries: vec![SearchEntry {
                    chunk_index: Some(0),
                    score: 0.9,
                    text: "excerpt".into(),
                }],
            })
        }
    }

    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<Vec<ChatTurn>>>,
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        async fn complete(&self, messages: &[ChatTurn]) -> Result<String, ServiceError> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            Ok("  The answer.  ".into())
        }
    }

    async fn document(store: &InMemoryStore, indexed: bool) -> String {
        let doc = store
            .create_document(&NewDocument {
                title: "Budget".into(),
                source_ref: "budget.pdf".into(),
                content_type: None,
            })
            .await
            .unwrap();
        store.begin_stage(&doc.id, Stage::Extraction).await.unwrap();
        store.complete_extraction(&doc.id, "text").await.unwrap();
        if indexed {
            store.begin_stage(&doc.id, Stage::Indexing).await.unwrap();
            store.complete_indexing(&doc.id, 1).await.unwrap();
        }
        doc.id
    }

    #[tokio::test]
    async fn test_ask_appends_question_and_answer() {
        let store = Arc::new(InMemoryStore::new());
        let id = document(&store, true).await;
        let model = Arc::new(RecordingModel::default());
        let chat = ChatService::new(
            store.clone(),
            Arc::new(FixedIndexer),
            Some(model.clone() as Arc<dyn ChatModel>),
            ChatConfig::default(),
        );

        let first = chat.ask(&id, "  How much?  ").await.unwrap();
        assert_eq!(first.question.content, "How much?");
        assert_eq!(first.answer.content, "The answer.");
        chat.ask(&id, "And then?").await.unwrap();

        let history = chat.history(&id).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].role, ChatRole::User);

        let prompts = model.prompts.lock().unwrap();
        // The second prompt carries the first exchange.
        assert_eq!(prompts[1].len(), 1 + 2 + 1);
        assert!(prompts[1][3]
            .content
            .contains(&format!("excerpt for doc-{}", id)));
    }

    #[tokio::test]
    async fn test_ask_rejections() {
        let store = Arc::new(InMemoryStore::new());
        let pending = document(&store, false).await;
        let chat = ChatService::new(
            store.clone(),
            Arc::new(FixedIndexer),
            Some(Arc::new(RecordingModel::default())),
            ChatConfig::default(),
        );

        assert!(matches!(
            chat.ask(&pending, "Why?").await,
            Err(AskError::NotIndexed(StageStatus::Pending))
        ));
        assert!(matches!(
            chat.ask("missing", "Why?").await,
            Err(AskError::NotFound(_))
        ));
        assert!(matches!(
            chat.ask(&pending, "   ").await,
            Err(AskError::EmptyQuestion)
        ));
        assert!(matches!(
            chat.history("missing").await,
            Err(AskError::NotFound(_))
        ));

        let disabled = ChatService::new(store, Arc::new(FixedIndexer), None, ChatConfig::default());
        assert!(matches!(
            disabled.ask(&pending, "Why?").await,
            Err(AskError::Disabled)
        ));
    }

    fn message(role: ChatRole, content: &str) -> ChatMessage {
        ChatMessage::new("doc", role, content)
    }

    #[test]
    fn test_prompt_keeps_recent_history() {
        let history: Vec<ChatMessage> = (0..6)
            .map(|i| {
                let role = if i % 2 == 0 {
                    ChatRole::User
                } else {
                    ChatRole::Assistant
                };
                message(role, &format!("m{}", i))
            })
            .collect();
        let context = SearchResult {
            matched_text: "The budget is 40k.".into(),
            entries: vec![],
        };

        let prompt = build_prompt(&history, 4, &context, "What is the budget?");
        assert_eq!(prompt.len(), 1 + 4 + 1);
        assert_eq!(prompt[0].role, "system");
        assert_eq!(prompt[1].content, "m2");
        assert_eq!(prompt[4].role, "assistant");
        let last = prompt.last().unwrap();
        assert_eq!(last.role, "user");
        assert!(last.content.contains("The budget is 40k."));
        assert!(last.content.ends_with("Question: What is the budget?"));
    }

    #[test]
    fn test_prompt_without_context() {
        let prompt = build_prompt(&[], 10, &SearchResult::default(), "Anything?");
        assert_eq!(prompt.len(), 2);
        assert!(prompt[1].content.contains("no relevant excerpts"));
    }

    #[test]
    fn test_first_choice() {
        let parsed: CompletionResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "Forty thousand."}}]}"#,
        )
        .unwrap();
        assert_eq!(first_choice(parsed).unwrap(), "Forty thousand.");

        let empty: CompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(first_choice(empty).is_err());
    }
}
