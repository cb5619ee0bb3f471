//! Greeting fast path.
//!
//! A tiny phrase table that answers trivial greetings without an LLM
//! round-trip. English and Chinese variants, matched after trimming and
//! lowercasing.

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "hola", "yo", "hi~", "hello~", "good morning", "good evening",
    "你好", "您好", "嗨", "哈喽", "嘿", "早上好", "晚上好", "晚安", "嗨~",
];

const RESPONSES: &[&str] = &[
    "Hello! Great to see you. How can I help today?",
    "Hi there! What can I do for you?",
    "你好！很高兴见到你！有什么我可以帮助的吗？",
    "Hey! I'm listening — what do you need?",
    "你好呀！有什么问题尽管问我～",
];

/// Whether the input is a bare greeting the fast path can answer.
pub fn is_simple_greeting(text: &str) -> bool {
    let clean = text.trim().to_lowercase();
    GREETINGS.iter().any(|g| *g == clean)
}

/// A canned greeting reply. Varies by input so repeated greetings do not
/// feel scripted, while staying deterministic for tests.
pub fn greeting_response(text: &str) -> &'static str {
    let index = text.trim().chars().map(|c| c as usize).sum::<usize>() % RESPONSES.len();
    RESPONSES[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greetings_match_case_insensitively() {
        assert!(is_simple_greeting("hi"));
        assert!(is_simple_greeting("  Hello "));
        assert!(is_simple_greeting("你好"));
        assert!(is_simple_greeting("HEY"));
    }

    #[test]
    fn sentences_do_not_match() {
        assert!(!is_simple_greeting("hello, can you calculate 7*6?"));
        assert!(!is_simple_greeting("tell me a story"));
        assert!(!is_simple_greeting(""));
    }

    #[test]
    fn response_is_deterministic_per_input() {
        assert_eq!(greeting_response("hi"), greeting_response("hi"));
        assert!(!greeting_response("你好").is_empty());
    }
}
