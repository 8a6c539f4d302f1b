//! Request and response types shared by every model backend.

use serde::{Deserialize, Serialize};
use superagent_types::{HistoryMessage, Role};

/// Default completion budget when a caller does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// Speaker of a chat message as the provider APIs see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One turn of a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Conversation history is replayed as chat turns. System entries carry no
/// speaker in the chat APIs, so they are folded into the system prompt by
/// [`CompletionRequest::with_history`]; tool entries are shown to the model
/// as user-side observations.
impl From<&HistoryMessage> for ChatMessage {
    fn from(message: &HistoryMessage) -> Self {
        match message.role {
            Role::Assistant => ChatMessage::assistant(message.content.clone()),
            Role::Tool => ChatMessage::user(format!("Tool output:\n{}", message.content)),
            Role::User | Role::System => ChatMessage::user(message.content.clone()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// A single non-streaming completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            system: None,
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
        }
    }

    /// A request consisting of one user prompt.
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::user(prompt)])
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Prepend conversation history ahead of the existing messages.
    pub fn with_history(mut self, history: &[HistoryMessage]) -> Self {
        let mut system_notes = Vec::new();
        let mut turns = Vec::with_capacity(history.len() + self.messages.len());
        for entry in history {
            if entry.role == Role::System {
                system_notes.push(entry.content.clone());
            } else {
                turns.push(ChatMessage::from(entry));
            }
        }
        turns.append(&mut self.messages);
        self.messages = turns;

        if !system_notes.is_empty() {
            let mut system = self.system.take().unwrap_or_default();
            for note in system_notes {
                if !system.is_empty() {
                    system.push_str("\n\n");
                }
                system.push_str(&note);
            }
            self.system = Some(system);
        }
        self
    }

    /// The text of the last user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

/// A finished completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl Completion {
    pub fn new(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            usage: Usage::default(),
            finish_reason: None,
        }
    }
}
