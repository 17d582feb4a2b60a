//! Conversation engine boundary.
//!
//! The dialogue stage talks to any [`ConversationEngine`]: a streamed reply
//! for ordinary turns, or a single structured tool call when the user asks
//! for an action. [`OpenAiChat`] implements it against any OpenAI-compatible
//! server (Ollama, vLLM, llama.cpp, ...).

pub mod openai;
pub mod sse;

pub use openai::OpenAiChat;

use crate::error::Result;
use crate::tools::{ToolCall, ToolDefinition};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions seeded at the start of a conversation.
    System,
    /// The human speaker.
    User,
    /// The assistant's reply.
    Assistant,
}

/// A single message in a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author of the message.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// System message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A stream of reply text fragments.
pub type ReplyStream = BoxStream<'static, Result<String>>;

/// Answer to a tool-mode request.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolReply {
    /// The engine asked for a tool invocation.
    Call(ToolCall),
    /// The engine answered in prose instead.
    Text(String),
}

/// An opaque conversational model.
#[async_trait]
pub trait ConversationEngine: Send {
    /// Start a streamed reply to `history`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be started. Errors during the
    /// stream arrive as `Err` items.
    async fn stream_reply(&mut self, history: &[ChatMessage]) -> Result<ReplyStream>;

    /// Ask for a single structured tool invocation from the offered `tools`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn request_tool_call(
        &mut self,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ToolReply>;
}

/// Incrementally strips `<think>...</think>` blocks across streaming fragments.
#[derive(Debug, Default)]
pub struct ThinkTagStripper {
    in_think_block: bool,
    carry: String,
}

impl ThinkTagStripper {
    const OPEN: &'static str = "<think>";
    const CLOSE: &'static str = "</think>";

    /// Create a stripper outside any think block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment and return newly visible text.
    pub fn push(&mut self, fragment: &str) -> String {
        self.carry.push_str(fragment);
        let mut visible = String::new();

        loop {
            let tag = if self.in_think_block {
                Self::CLOSE
            } else {
                Self::OPEN
            };
            if let Some(pos) = self.carry.find(tag) {
                if !self.in_think_block {
                    visible.push_str(&self.carry[..pos]);
                }
                self.carry.drain(..pos + tag.len());
                self.in_think_block = !self.in_think_block;
                continue;
            }

            // Hold back only a suffix that could still grow into `tag`.
            let keep_from = partial_tag_start(&self.carry, tag);
            if !self.in_think_block {
                visible.push_str(&self.carry[..keep_from]);
            }
            self.carry.drain(..keep_from);
            break;
        }

        visible
    }

    /// End of stream: release held-back text. Unclosed think content is dropped.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.carry);
        if self.in_think_block {
            self.in_think_block = false;
            return String::new();
        }
        rest
    }
}

/// Byte index where a trailing prefix of `tag` begins, or `text.len()`.
fn partial_tag_start(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&n| text.ends_with(&tag[..n]))
        .map_or(text.len(), |n| text.len() - n)
}

/// Remove `<think>...</think>` blocks from complete text.
pub fn strip_think_tags(text: &str) -> String {
    let mut stripper = ThinkTagStripper::new();
    let mut out = stripper.push(text);
    out.push_str(&stripper.finish());
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn strip_all(fragments: &[&str]) -> String {
        let mut s = ThinkTagStripper::new();
        let mut out: String = fragments.iter().map(|f| s.push(f)).collect();
        out.push_str(&s.finish());
        out
    }

    #[test]
    fn passes_plain_text_through() {
        assert_eq!(strip_all(&["Hello ", "world."]), "Hello world.");
    }

    #[test]
    fn removes_think_block_in_one_fragment() {
        assert_eq!(strip_think_tags("<think>hmm</think>Hi there."), "Hi there.");
    }

    #[test]
    fn removes_think_block_split_across_fragments() {
        assert_eq!(
            strip_all(&["<th", "ink>plan", "ning</thi", "nk>Answer", "."]),
            "Answer."
        );
    }

    #[test]
    fn holds_back_only_possible_tag_prefix() {
        let mut s = ThinkTagStripper::new();
        assert_eq!(s.push("a < b"), "a < b");
        assert_eq!(s.push(" and <t"), " and ");
        assert_eq!(s.push("able>"), "<table>");
    }

    #[test]
    fn unclosed_think_is_dropped() {
        assert_eq!(strip_all(&["Visible. <think>never closed"]), "Visible. ");
    }

    #[test]
    fn multibyte_text_survives() {
        assert_eq!(strip_all(&["caf\u{e9} ", "<think>x</think>", "na\u{ef}ve"]), "caf\u{e9} na\u{ef}ve");
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }
}
