//! Dialogue: turn a user transcript into a stream of speakable sentences.

pub mod sentence;

pub use sentence::SentenceSplitter;

use crate::error::{AssistantError, Result};
use crate::history::ConversationStore;
use crate::llm::{ChatMessage, ConversationEngine, ThinkTagStripper, ToolReply};
use crate::pipeline::messages::SentenceUnit;
use crate::tools::ToolRegistry;
use futures_util::StreamExt;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Conversation driver owning the engine, the user's history, and the tools.
pub struct DialogueAgent {
    engine: Box<dyn ConversationEngine>,
    store: ConversationStore,
    user_id: String,
    tools: ToolRegistry,
    trigger_keywords: Vec<String>,
}

impl DialogueAgent {
    /// Create an agent for `user_id`, seeding `system_prompt` into a new
    /// conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the history file cannot be written.
    pub fn new(
        engine: Box<dyn ConversationEngine>,
        mut store: ConversationStore,
        user_id: impl Into<String>,
        system_prompt: &str,
    ) -> Result<Self> {
        let user_id = user_id.into();
        store.ensure_system_prompt(&user_id, system_prompt)?;
        Ok(Self {
            engine,
            store,
            user_id,
            tools: ToolRegistry::new(),
            trigger_keywords: Vec::new(),
        })
    }

    /// Enable tool mode for transcripts containing any of `keywords`.
    pub fn with_tools(mut self, tools: ToolRegistry, keywords: Vec<String>) -> Self {
        self.tools = tools;
        self.trigger_keywords = keywords.into_iter().map(|k| k.to_lowercase()).collect();
        self
    }

    /// Messages recorded for the active user.
    pub fn history(&self) -> &[ChatMessage] {
        self.store.history(&self.user_id)
    }

    /// Whether `text` should be answered with a tool invocation.
    pub fn wants_tool(&self, text: &str) -> bool {
        if self.tools.is_empty() {
            return false;
        }
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .any(|w| {
                let w = w.to_lowercase();
                self.trigger_keywords.iter().any(|k| *k == w)
            })
    }

    /// Respond to one user utterance.
    ///
    /// The user turn is recorded first. Sentences are sent on `tx` as soon
    /// as they complete, and the full reply is recorded as one assistant
    /// turn once the engine finishes. Returns the reply text.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails; no assistant turn is recorded
    /// in that case.
    pub async fn respond(
        &mut self,
        user_text: &str,
        tx: mpsc::Sender<SentenceUnit>,
    ) -> Result<String> {
        self.store
            .append(&self.user_id, ChatMessage::user(user_text))?;

        let reply = if self.wants_tool(user_text) {
            self.respond_with_tool(&tx).await?
        } else {
            self.respond_streaming(&tx).await?
        };

        if reply.trim().is_empty() {
            info!("empty reply, no assistant turn recorded");
        } else {
            self.store
                .append(&self.user_id, ChatMessage::assistant(reply.trim()))?;
        }
        Ok(reply)
    }

    async fn respond_streaming(&mut self, tx: &mpsc::Sender<SentenceUnit>) -> Result<String> {
        let started = Instant::now();
        let history = self.store.history(&self.user_id).to_vec();
        let mut stream = self.engine.stream_reply(&history).await?;

        let mut stripper = ThinkTagStripper::new();
        let mut splitter = SentenceSplitter::new();
        let mut reply = String::new();
        let mut sentences = 0usize;

        while let Some(fragment) = stream.next().await {
            let visible = stripper.push(&fragment?);
            reply.push_str(&visible);
            for sentence in splitter.push(&visible) {
                if sentences == 0 {
                    info!(
                        first_sentence_ms = started.elapsed().as_millis() as u64,
                        "first sentence ready"
                    );
                }
                sentences += 1;
                send_unit(tx, sentence).await?;
            }
        }

        let tail = stripper.finish();
        reply.push_str(&tail);
        let mut rest = splitter.push(&tail);
        rest.extend(splitter.finish());
        for sentence in rest {
            sentences += 1;
            send_unit(tx, sentence).await?;
        }

        info!(
            sentences,
            generation_ms = started.elapsed().as_millis() as u64,
            "reply complete"
        );
        Ok(reply)
    }

    async fn respond_with_tool(&mut self, tx: &mpsc::Sender<SentenceUnit>) -> Result<String> {
        let history = self.store.history(&self.user_id).to_vec();
        let definitions = self.tools.definitions();
        match self.engine.request_tool_call(&history, &definitions).await? {
            ToolReply::Call(call) => match self.tools.dispatch(&call) {
                Ok(Some(ack)) => {
                    send_unit(tx, ack.clone()).await?;
                    Ok(ack)
                }
                Ok(None) => Ok(String::new()),
                Err(e) => {
                    warn!(tool = %call.name, "tool failed: {e}");
                    Ok(String::new())
                }
            },
            ToolReply::Text(text) => {
                for sentence in SentenceSplitter::split_all(&text) {
                    send_unit(tx, sentence).await?;
                }
                Ok(text)
            }
        }
    }
}

async fn send_unit(tx: &mpsc::Sender<SentenceUnit>, text: String) -> Result<()> {
    tx.send(SentenceUnit {
        text,
        enqueued_at: Instant::now(),
    })
    .await
    .map_err(|_| AssistantError::Channel("sentence receiver dropped".into()))
}
