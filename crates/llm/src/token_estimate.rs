//! Approximate token counting, used for history bounds and pre-flight
//! input estimates.
//!
//! Counts use the `o200k_base` encoding for every model. Exact per-model
//! tokenization differs, but the bound these counts feed is a soft ceiling;
//! being a few percent off is acceptable.

use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;

use crate::messages::Message;

/// Fixed per-message overhead covering role markers and separators.
const MESSAGE_OVERHEAD_TOKENS: u64 = 4;

static BPE: LazyLock<CoreBPE> = LazyLock::new(|| {
    tiktoken_rs::o200k_base().expect("bundled o200k_base encoding loads")
});

/// Approximate token count of a text fragment.
pub fn text_tokens(text: &str) -> u64 {
    BPE.encode_with_special_tokens(text).len() as u64
}

/// Approximate token count of one message, including framing overhead.
pub fn message_tokens(message: &Message) -> u64 {
    text_tokens(&message.render_text()) + MESSAGE_OVERHEAD_TOKENS
}

/// Approximate token count of a whole conversation.
pub fn conversation_tokens(messages: &[Message]) -> u64 {
    messages.iter().map(message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(text_tokens(""), 0);
    }

    #[test]
    fn longer_text_counts_more_tokens() {
        let short = text_tokens("hello");
        let long = text_tokens("hello world, this is a longer sentence about nothing in particular");
        assert!(long > short);
        assert!(short >= 1);
    }

    #[test]
    fn message_count_includes_overhead() {
        let message = Message::user("hi");
        assert!(message_tokens(&message) > text_tokens("hi"));
    }
}
