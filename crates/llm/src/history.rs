//! The bounded, self-compacting conversation history.
//!
//! Appends are cheap; when the approximate token count exceeds the soft
//! ceiling, the store compacts: the cheapest-to-lose messages (by a fixed
//! category priority) are summarized into a single system-role "Summary of
//! previous messages:" entry, in place. Tool calls and their outputs are
//! compacted or retained together, never split. On summarization failure
//! the selection is simply truncated.
//!
//! Locking: the message list is mutex-guarded; the summarization request
//! itself runs outside the lock on a detached copy (it reenters the
//! engine, which may be serving other requests). If the history changed
//! while summarizing, the round is abandoned and the next append retries.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::messages::{Message, MessageContent, MessageStatus, Role, pair_tool_messages};
use crate::token_estimate;

/// Lookahead window when pairing a tool call with its output.
const TOOL_PAIR_LOOKAHEAD: usize = 10;

/// Marker prefix identifying compaction summaries.
pub const SUMMARY_PREFIX: &str = "Summary of previous messages:";

/// Produces a summary of a rendered transcript. Implemented by the engine
/// (which routes it to a summary-class model) and by test stubs.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> anyhow::Result<String>;
}

/// Compaction priority, lowest value compacted first. The ordering encodes
/// which information is cheapest to lose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Category {
    AssistantThinking = 0,
    ToolResults = 1,
    ToolCalls = 2,
    AssistantResponses = 3,
    UserInputs = 4,
    HistorySummaries = 5,
    ToolErrors = 6,
    SystemErrors = 7,
    TalkToUserCalls = 8,
    QuotedUserSpeech = 9,
    SystemInstructions = 10,
    Unknown = 11,
}

fn categorize(message: &Message) -> Category {
    match message {
        Message::Thinking { .. } => Category::AssistantThinking,

        Message::ToolOutput { status, .. } => match status {
            Some(MessageStatus::Incomplete) => Category::ToolErrors,
            _ => Category::ToolResults,
        },

        Message::ToolCall { name, .. } => {
            if name == "talk_to_user" {
                Category::TalkToUserCalls
            } else {
                Category::ToolCalls
            }
        }

        Message::Conversational { role, content, .. } => {
            let text = content.text();

            match role {
                Role::Assistant => Category::AssistantResponses,
                Role::User => {
                    if text.trim_start().starts_with('"') {
                        Category::QuotedUserSpeech
                    } else {
                        Category::UserInputs
                    }
                }
                Role::System | Role::Developer => {
                    if text.starts_with(SUMMARY_PREFIX) {
                        Category::HistorySummaries
                    } else if text.trim_start().starts_with("Error") {
                        Category::SystemErrors
                    } else {
                        Category::SystemInstructions
                    }
                }
            }
        }
    }
}

pub struct HistoryStore {
    messages: Mutex<Vec<Message>>,
    token_ceiling: u64,
    floor: usize,
    ai_name: String,
    your_name: String,
}

impl HistoryStore {
    pub fn new(token_ceiling: u64, floor: usize, ai_name: impl Into<String>, your_name: impl Into<String>) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            token_ceiling,
            floor,
            ai_name: ai_name.into(),
            your_name: your_name.into(),
        }
    }

    /// Append a message; compacts afterwards when the estimate exceeds the
    /// ceiling.
    pub async fn append(&self, message: Message, summarizer: &dyn Summarizer) {
        {
            let mut messages = self.messages.lock().expect("history lock poisoned");
            messages.push(message);
        }

        self.compact_if_needed(summarizer).await;
    }

    /// Current messages, oldest first.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.lock().expect("history lock poisoned").clone()
    }

    /// Drop everything.
    pub fn reset(&self) {
        self.messages.lock().expect("history lock poisoned").clear();
    }

    /// Approximate token count of the current history.
    pub fn estimated_tokens(&self) -> u64 {
        let messages = self.messages.lock().expect("history lock poisoned");
        token_estimate::conversation_tokens(&messages)
    }

    async fn compact_if_needed(&self, summarizer: &dyn Summarizer) {
        // Detached copy; summarization must not hold the lock.
        let detached = self.snapshot();

        let total_tokens = token_estimate::conversation_tokens(&detached);
        if total_tokens <= self.token_ceiling || detached.len() <= self.floor {
            return;
        }

        let excess = total_tokens - self.token_ceiling;
        let mut selected = select_for_compaction(&detached, excess, self.floor);
        if selected.is_empty() {
            return;
        }

        // Fold any existing summary entries into the new batch so the
        // history carries at most one summary at a time.
        for (index, message) in detached.iter().enumerate() {
            if categorize(message) == Category::HistorySummaries && !selected.contains(&index) {
                selected.push(index);
            }
        }
        selected.sort_unstable();

        let transcript = self.render_transcript(&detached, &selected);

        let summary = match summarizer.summarize(&transcript).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                log::warn!("history summarization failed, truncating instead: {e}");
                None
            }
        };

        let mut messages = self.messages.lock().expect("history lock poisoned");

        // Concurrent appends may have shifted indices; only apply when the
        // prefix we worked from is unchanged.
        if messages.len() < detached.len() || messages[..detached.len()] != detached[..] {
            log::debug!("history changed during summarization; skipping this compaction round");
            return;
        }

        let insert_at = selected[0];

        // Remove selected indices from the end so positions stay valid.
        for &index in selected.iter().rev() {
            messages.remove(index);
        }

        if let Some(summary) = summary {
            messages.insert(
                insert_at,
                Message::Conversational {
                    role: Role::System,
                    content: MessageContent::Text(format!("{SUMMARY_PREFIX}\n{summary}")),
                    status: None,
                },
            );
        }
    }

    fn render_transcript(&self, messages: &[Message], selected: &[usize]) -> String {
        let mut transcript = String::new();

        for &index in selected {
            let message = &messages[index];
            let label = match message.effective_role() {
                Role::User => self.your_name.as_str(),
                Role::Assistant => self.ai_name.as_str(),
                Role::System | Role::Developer => "System",
            };

            transcript.push_str(label);
            transcript.push_str(": ");
            transcript.push_str(&message.render_text());
            transcript.push('\n');
        }

        transcript
    }
}

/// Units of compaction: a single message index, or a (call, output) pair
/// that must live or die together.
#[derive(Debug)]
struct Unit {
    indices: Vec<usize>,
    category: Category,
    tokens: u64,
}

/// Choose indices to compact: oldest-first from the cheapest category
/// upwards, until the excess is covered, while leaving at least `floor`
/// messages (counting the summary that will replace the selection).
fn select_for_compaction(messages: &[Message], excess_tokens: u64, floor: usize) -> Vec<usize> {
    let pairs = pair_tool_messages(messages, TOOL_PAIR_LOOKAHEAD);
    let paired_with: std::collections::HashMap<usize, usize> =
        pairs.iter().flat_map(|&(a, b)| [(a, b), (b, a)]).collect();

    let mut units: Vec<Unit> = Vec::new();
    let mut consumed = vec![false; messages.len()];

    for index in 0..messages.len() {
        if consumed[index] {
            continue;
        }
        consumed[index] = true;

        let mut indices = vec![index];
        let mut category = categorize(&messages[index]);

        if let Some(&partner) = paired_with.get(&index)
            && !consumed[partner]
        {
            consumed[partner] = true;
            indices.push(partner);
            category = category.min(categorize(&messages[partner]));
        }

        let tokens = indices.iter().map(|&i| token_estimate::message_tokens(&messages[i])).sum();
        units.push(Unit {
            indices,
            category,
            tokens,
        });
    }

    // Cheapest category first; within a category, oldest first.
    let mut order: Vec<usize> = (0..units.len()).collect();
    order.sort_by_key(|&u| (units[u].category, units[u].indices[0]));

    let mut selected: Vec<usize> = Vec::new();
    let mut freed = 0u64;
    let mut remaining = messages.len();

    for unit_index in order {
        if freed >= excess_tokens {
            break;
        }

        let unit = &units[unit_index];

        // +1 accounts for the summary entry that replaces the selection.
        if remaining - unit.indices.len() + 1 < floor {
            continue;
        }

        selected.extend(&unit.indices);
        freed += unit.tokens;
        remaining -= unit.indices.len();
    }

    selected.sort_unstable();
    selected
}
