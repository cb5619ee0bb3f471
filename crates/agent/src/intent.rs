//! Keyword-based intent heuristic.
//!
//! Deliberately cheap and string-based: the label is a system-prompt
//! hint, not a routing decision.

/// Derive a lightweight intent label from the user input.
pub fn analyze_intent(user_input: &str) -> &'static str {
    let input = user_input.to_lowercase();
    let contains_any = |words: &[&str]| words.iter().any(|w| input.contains(w));

    if contains_any(&["search", "find", "look", "搜索", "查找"]) {
        "search"
    } else if contains_any(&["calculate", "math", "compute", "计算"]) {
        "calculation"
    } else if contains_any(&["time", "date", "when", "时间", "日期"]) {
        "time_query"
    } else if contains_any(&["image", "picture", "generate", "create", "图片", "生成"]) {
        "image_generation"
    } else if contains_any(&["help", "what", "how", "帮助", "怎么"]) {
        "help_request"
    } else {
        "general_conversation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_keywords() {
        assert_eq!(analyze_intent("search for rust tutorials"), "search");
        assert_eq!(analyze_intent("搜索Python教程"), "search");
        assert_eq!(analyze_intent("CALCULATE 2+2"), "calculation");
        assert_eq!(analyze_intent("what time is it"), "time_query");
        assert_eq!(analyze_intent("generate an image of a cat"), "image_generation");
        assert_eq!(analyze_intent("how does this work"), "help_request");
        assert_eq!(analyze_intent("nice weather today"), "general_conversation");
    }

    #[test]
    fn earlier_categories_win_on_overlap() {
        // "find" (search) beats "how" (help_request).
        assert_eq!(analyze_intent("how do I find my keys"), "search");
    }
}
