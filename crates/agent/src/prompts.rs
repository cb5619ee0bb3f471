//! System prompt assembly.
//!
//! A static base prompt plus per-turn context additions: the detected
//! intent hint and how much tool output is already on the table. Kept
//! short; long system prompts cost every turn.

use crate::state::TurnState;

const BASE_PROMPT: &str = "\
You are a helpful, concise voice assistant. Answer in the language the \
user writes in. Prefer short, spoken-style sentences; avoid markdown \
formatting, tables, and long enumerations. When a tool can answer a \
question precisely (math, time, weather, knowledge lookup), call the \
tool instead of guessing. After using tools, weave the results into a \
natural reply rather than quoting them verbatim.";

/// The intent hint appended for non-default intents.
fn intent_hint(intent: &str) -> Option<&'static str> {
    match intent {
        "search" => Some("The user seems to be looking something up; consider the search tools."),
        "calculation" => Some("The user wants a computation; use the calculator tool for exact results."),
        "time_query" => Some("The user is asking about time or dates; use the time tool."),
        "image_generation" => {
            Some("The user is asking for image creation, which is not available; say so politely.")
        }
        "help_request" => Some("The user wants guidance; explain step by step, briefly."),
        _ => None,
    }
}

/// Build the per-turn system prompt.
pub fn build_system_prompt(state: &TurnState) -> String {
    let mut prompt = String::from(BASE_PROMPT);

    if let Some(intent) = state.current_intent.as_deref() {
        if let Some(hint) = intent_hint(intent) {
            prompt.push_str("\n\n");
            prompt.push_str(hint);
        }
    }

    if !state.tool_results.is_empty() {
        prompt.push_str(&format!(
            "\n\nThis turn already produced {} tool result(s); base your \
             answer on them and do not repeat identical tool calls.",
            state.tool_results.len()
        ));
    }

    prompt
}

/// Canned user-safe replies for failure paths.
pub mod canned {
    pub const EMPTY_INPUT: &str = "I didn't catch any input — could you say that again?";
    pub const LLM_FAILURE: &str =
        "Sorry, I ran into a problem while thinking about that. Please try again in a moment.";
    pub const MISSING_RESPONSE: &str =
        "Sorry, I couldn't put together a proper answer this time.";
    pub const TOOL_LIMIT: &str =
        "I had to stop after several rounds of tool use; here is what I have so far.";
}
