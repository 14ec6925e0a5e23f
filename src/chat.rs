// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Chat history and draft persistence
//
// Chats and their messages live in a MemoryStore. A StoreObserver writes
// the drafts of one streaming completion into the assistant message it
// owns, so several sessions can stream into the same store concurrently.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::config::ModelConfig;
use crate::driver::StreamObserver;
use crate::message::{ChatMessage, Role};
use crate::stream::StreamError;
use crate::transport::{CompletionRequest, CompletionTransport};

/// Appended to non-final drafts while the assistant is still typing.
pub const CURSOR: &str = "\u{2588}";

/// Description of a chat that has not been titled yet.
pub const NEW_CHAT: &str = "New Chat";

pub const TITLE_PROMPT: &str =
    "Provide a short and relevant title for this chat. Answer with only the title.";

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat {0} not found")]
    ChatNotFound(Uuid),

    #[error("message {0} not found")]
    MessageNotFound(Uuid),

    #[error(transparent)]
    Completion(#[from] StreamError),
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub id: Uuid,
    pub description: String,
    /// Tokens spent on this chat: estimates for streamed replies plus
    /// reported usage for title requests.
    pub total_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub pinned: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Insertion order, breaks `created_at` ties.
    seq: u64,
}

impl StoredMessage {
    /// Wire form, without a trailing typing cursor.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.trim_end_matches(CURSOR))
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory chat store backed by `DashMap` for concurrent access.
#[derive(Default)]
pub struct MemoryStore {
    chats: DashMap<Uuid, Chat>,
    messages: DashMap<Uuid, StoredMessage>,
    next_seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_chat(&self, description: impl Into<String>) -> Chat {
        let chat = Chat {
            id: Uuid::new_v4(),
            description: description.into(),
            total_tokens: 0,
            created_at: Utc::now(),
            pinned: false,
        };
        self.chats.insert(chat.id, chat.clone());
        chat
    }

    pub fn chat(&self, chat_id: Uuid) -> Option<Chat> {
        self.chats.get(&chat_id).map(|c| c.value().clone())
    }

    /// All chats, pinned first, then newest first.
    pub fn chats(&self) -> Vec<Chat> {
        let mut chats: Vec<Chat> = self.chats.iter().map(|c| c.value().clone()).collect();
        chats.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        chats
    }

    pub fn add_message(
        &self,
        chat_id: Uuid,
        role: Role,
        content: impl Into<String>,
    ) -> Result<StoredMessage, ChatError> {
        if !self.chats.contains_key(&chat_id) {
            return Err(ChatError::ChatNotFound(chat_id));
        }
        let message = StoredMessage {
            id: Uuid::new_v4(),
            chat_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.messages.insert(message.id, message.clone());
        Ok(message)
    }

    pub fn message(&self, message_id: Uuid) -> Option<StoredMessage> {
        self.messages.get(&message_id).map(|m| m.value().clone())
    }

    /// Replace a message's content. Writing the same content twice is a no-op.
    pub fn update_content(&self, message_id: Uuid, content: &str) -> Result<(), ChatError> {
        let mut message = self
            .messages
            .get_mut(&message_id)
            .ok_or(ChatError::MessageNotFound(message_id))?;
        if message.content != content {
            message.content = content.to_string();
        }
        Ok(())
    }

    /// Messages of one chat in creation order.
    pub fn messages_for(&self, chat_id: Uuid) -> Vec<StoredMessage> {
        let mut messages: Vec<StoredMessage> = self
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .map(|m| m.value().clone())
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
        messages
    }

    /// Add to the chat's token total and return the new total.
    pub fn add_tokens(&self, chat_id: Uuid, tokens: u64) -> Result<u64, ChatError> {
        let mut chat = self
            .chats
            .get_mut(&chat_id)
            .ok_or(ChatError::ChatNotFound(chat_id))?;
        chat.total_tokens = chat.total_tokens.saturating_add(tokens);
        Ok(chat.total_tokens)
    }

    pub fn set_description(
        &self,
        chat_id: Uuid,
        description: impl Into<String>,
    ) -> Result<(), ChatError> {
        let mut chat = self
            .chats
            .get_mut(&chat_id)
            .ok_or(ChatError::ChatNotFound(chat_id))?;
        chat.description = description.into();
        Ok(())
    }

    pub fn set_pinned(&self, chat_id: Uuid, pinned: bool) -> Result<(), ChatError> {
        let mut chat = self
            .chats
            .get_mut(&chat_id)
            .ok_or(ChatError::ChatNotFound(chat_id))?;
        chat.pinned = pinned;
        Ok(())
    }

    /// Remove a chat and all of its messages. Returns false if it did not exist.
    pub fn delete_chat(&self, chat_id: Uuid) -> bool {
        let existed = self.chats.remove(&chat_id).is_some();
        self.messages.retain(|_, m| m.chat_id != chat_id);
        existed
    }
}

// ---------------------------------------------------------------------------
// StoreObserver
// ---------------------------------------------------------------------------

/// Writes the drafts of one completion into an assistant message.
pub struct StoreObserver {
    store: Arc<MemoryStore>,
    chat_id: Uuid,
    message_id: Uuid,
    finished: AtomicBool,
    last_error: Mutex<Option<StreamError>>,
}

impl StoreObserver {
    pub fn new(store: Arc<MemoryStore>, chat_id: Uuid, message_id: Uuid) -> Self {
        Self {
            store,
            chat_id,
            message_id,
            finished: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// The error that ended the session, if it failed.
    pub fn last_error(&self) -> Option<StreamError> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drop the typing cursor once no final draft will arrive.
    fn settle(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(message) = self.store.message(self.message_id) {
            let settled = message.content.trim_end_matches(CURSOR);
            self.write(settled);
        }
    }

    fn write(&self, content: &str) {
        if let Err(err) = self.store.update_content(self.message_id, content) {
            tracing::warn!(chat_id = %self.chat_id, error = %err, "draft not stored");
        }
    }
}

impl StreamObserver for StoreObserver {
    fn on_content(&self, content: &str, is_final: bool) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        if !is_final {
            self.write(&format!("{content}{CURSOR}"));
            return;
        }

        self.finished.store(true, Ordering::SeqCst);
        self.write(content);
        if let Err(err) = self.store.add_tokens(self.chat_id, estimate_tokens(content)) {
            tracing::warn!(chat_id = %self.chat_id, error = %err, "token usage not stored");
        }
    }

    fn on_error(&self, error: &StreamError) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error.clone());
        self.settle();
    }

    fn on_done(&self) {
        self.settle();
    }
}

// ---------------------------------------------------------------------------
// Prompts and titles
// ---------------------------------------------------------------------------

/// System prompt, then the chat history, then the new user input.
pub fn build_prompt(
    system_prompt: &str,
    history: &[StoredMessage],
    user_input: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(history.iter().map(StoredMessage::to_chat_message));
    messages.push(ChatMessage::user(user_input));
    messages
}

/// Ask the model for a short title, store it as the chat description and
/// add the reported usage to the chat's token total.
pub async fn describe_chat(
    transport: &dyn CompletionTransport,
    model: &ModelConfig,
    system_prompt: &str,
    store: &MemoryStore,
    chat_id: Uuid,
) -> Result<String, ChatError> {
    if store.chat(chat_id).is_none() {
        return Err(ChatError::ChatNotFound(chat_id));
    }

    let history = store.messages_for(chat_id);
    let request = CompletionRequest::new(model, build_prompt(system_prompt, &history, TITLE_PROMPT));
    let completion = transport.complete(&request).await?;

    let title = clean_title(&completion.content);
    let title = if title.is_empty() {
        NEW_CHAT.to_string()
    } else {
        title
    };

    store.set_description(chat_id, title.as_str())?;
    if let Some(tokens) = completion.total_tokens {
        store.add_tokens(chat_id, tokens)?;
    }
    tracing::debug!(chat_id = %chat_id, title = %title, "chat titled");
    Ok(title)
}

fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}
