//! Bounded conversation history.
//!
//! The newest `max_turns` exchanges are kept verbatim. Older exchanges are
//! folded into one-line digests, and only the newest `max_turns` digests
//! survive, so prompt size stays bounded no matter how long a session runs.

use super::provider::ChatMessage;
use crate::util::truncate;
use std::collections::VecDeque;

const DIGEST_CHARS: usize = 160;

#[derive(Debug, Clone, PartialEq)]
struct Turn {
    user: String,
    assistant: String,
}

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    system: Option<String>,
    turns: VecDeque<Turn>,
    digests: VecDeque<String>,
    max_turns: usize,
    total_turns: usize,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            system: None,
            turns: VecDeque::new(),
            digests: VecDeque::new(),
            max_turns: max_turns.max(1),
            total_turns: 0,
        }
    }

    pub fn set_system(&mut self, system: impl Into<String>) {
        self.system = Some(system.into());
    }

    pub fn push_turn(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.turns.push_back(Turn {
            user: user.into(),
            assistant: assistant.into(),
        });
        self.total_turns += 1;
        while self.turns.len() > self.max_turns {
            if let Some(old) = self.turns.pop_front() {
                self.digests.push_back(compress_turn(&old.user, &old.assistant));
            }
        }
        while self.digests.len() > self.max_turns {
            self.digests.pop_front();
        }
    }

    /// Messages for the next request: system prompt, digest of old turns,
    /// recent turns verbatim, then `next_user`.
    pub fn messages_for(&self, next_user: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() * 2 + 3);
        if let Some(system) = &self.system {
            messages.push(ChatMessage::system(system.clone()));
        }
        if !self.digests.is_empty() {
            let mut summary = String::from("Summary of earlier exchanges in this session:\n");
            for digest in &self.digests {
                summary.push_str("- ");
                summary.push_str(digest);
                summary.push('\n');
            }
            messages.push(ChatMessage::system(summary));
        }
        for turn in &self.turns {
            messages.push(ChatMessage::user(turn.user.clone()));
            messages.push(ChatMessage::assistant(turn.assistant.clone()));
        }
        messages.push(ChatMessage::user(next_user));
        messages
    }

    /// Messages that would be sent, excluding the next user message.
    pub fn len(&self) -> usize {
        self.messages_for("").len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.total_turns == 0
    }

    pub fn total_turns(&self) -> usize {
        self.total_turns
    }

    pub fn retained_turns(&self) -> usize {
        self.turns.len()
    }
}

/// Deterministic one-line digest of an exchange.
pub fn compress_turn(user: &str, assistant: &str) -> String {
    let request = first_meaningful_line(user);
    let answer_lines = assistant
        .lines()
        .filter(|l| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with("```") && !t.starts_with('#')
        })
        .count();
    truncate(
        &format!("asked: {request} | answered with {answer_lines} code lines"),
        DIGEST_CHARS,
    )
}

fn first_meaningful_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string()
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::Role;

    fn role_count(messages: &[ChatMessage], role: Role) -> usize {
        messages.iter().filter(|m| m.role == role).count()
    }

    #[test]
    fn keeps_recent_turns_verbatim() {
        let mut history = ConversationHistory::new(2);
        history.set_system("sys");
        history.push_turn("generate A", "code A");
        let messages = history.messages_for("next");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "generate A");
        assert_eq!(messages[3].content, "next");
    }

    #[test]
    fn old_turns_are_compressed_and_bounded() {
        let mut history = ConversationHistory::new(2);
        history.set_system("sys");
        for i in 0..10 {
            history.push_turn(format!("fix error {i}"), format!("line one\nline two {i}"));
        }
        assert_eq!(history.total_turns(), 10);
        assert_eq!(history.retained_turns(), 2);
        let messages = history.messages_for("again");
        // system + digest + 2 turns * 2 + next
        assert_eq!(messages.len(), 7);
        assert_eq!(role_count(&messages, Role::System), 2);
        let digest = &messages[1].content;
        assert!(digest.contains("fix error 7"));
        assert!(!digest.contains("fix error 5"));
    }

    #[test]
    fn compression_is_deterministic() {
        let a = compress_turn("\n  Fix this VRL error\nmore", "```vrl\n.a = 1\n.b = 2\n```");
        let b = compress_turn("\n  Fix this VRL error\nmore", "```vrl\n.a = 1\n.b = 2\n```");
        assert_eq!(a, b);
        assert_eq!(a, "asked: Fix this VRL error | answered with 2 code lines");
    }
}
