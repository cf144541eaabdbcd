//! Tokenizer half of the Usage Recorder (C9).
//!
//! Wraps `tiktoken-rs` to estimate prompt/completion token counts for the
//! endpoints that carry usage accounting (chat completions, completions,
//! embeddings). This is an estimate, not the provider's own count — the
//! original source does the same, falling back to its own tokenizer
//! whenever the upstream response doesn't carry a `usage` block itself.

use serde_json::Value;
use tiktoken_rs::CoreBPE;

pub struct Tokenizer {
    bpe: CoreBPE,
}

impl Tokenizer {
    /// `cl100k_base` is the closest general-purpose encoding to what most
    /// chat-completion-style models use; exact per-model encodings aren't
    /// worth tracking for an estimate used only for limiter/cost purposes.
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            bpe: tiktoken_rs::cl100k_base()?,
        })
    }

    pub fn count(&self, text: &str) -> u64 {
        self.bpe.encode_with_special_tokens(text).len() as u64
    }

    /// Token count of every `content` string found in a chat-style
    /// `messages` array, falling back to 0 for a body with no messages
    /// (e.g. embeddings, which use [`Tokenizer::prompt_tokens_from_input`]
    /// instead).
    pub fn prompt_tokens_from_messages(&self, body: &Value) -> u64 {
        let Some(messages) = body.get("messages").and_then(Value::as_array) else {
            return 0;
        };
        messages
            .iter()
            .filter_map(|m| m.get("content"))
            .filter_map(|c| c.as_str())
            .map(|s| self.count(s))
            .sum()
    }

    /// Token count of an embeddings-style `input` field, which may be a
    /// single string or an array of strings.
    pub fn prompt_tokens_from_input(&self, body: &Value) -> u64 {
        match body.get("input") {
            Some(Value::String(s)) => self.count(s),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| self.count(s))
                .sum(),
            _ => 0,
        }
    }

    /// Token count of a non-streamed chat completion response, or of the
    /// concatenation of every buffered `delta.content` chunk for a
    /// streamed one (callers accumulate the string themselves).
    pub fn completion_tokens_from_text(&self, text: &str) -> u64 {
        self.count(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counts_plain_text() {
        let tok = Tokenizer::new().unwrap();
        assert!(tok.count("hello world") > 0);
    }

    #[test]
    fn empty_text_is_zero_tokens() {
        let tok = Tokenizer::new().unwrap();
        assert_eq!(tok.count(""), 0);
    }

    #[test]
    fn sums_message_contents() {
        let tok = Tokenizer::new().unwrap();
        let body = json!({
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hello"}
            ]
        });
        let total = tok.prompt_tokens_from_messages(&body);
        assert_eq!(
            total,
            tok.count("be terse") + tok.count("hello")
        );
    }

    #[test]
    fn embeddings_input_array() {
        let tok = Tokenizer::new().unwrap();
        let body = json!({"input": ["a", "b c"]});
        assert_eq!(
            tok.prompt_tokens_from_input(&body),
            tok.count("a") + tok.count("b c")
        );
    }

    #[test]
    fn missing_messages_is_zero() {
        let tok = Tokenizer::new().unwrap();
        let body = json!({"foo": "bar"});
        assert_eq!(tok.prompt_tokens_from_messages(&body), 0);
    }
}
