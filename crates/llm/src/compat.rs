//! Model-family parameter compatibility.
//!
//! Families differ in how they accept generation parameters: the gpt-5
//! generation takes `max_completion_tokens` and rejects `temperature`,
//! while gpt-4-era models take `max_tokens` and accept `temperature`.
//! This table is the only place that knows; the request builder consults
//! it and callers of the client never see model prefixes.

/// Wire-level parameter rules for one model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyRules {
    /// Name of the max-output-tokens parameter on the wire.
    pub max_tokens_param: &'static str,
    /// Whether the family accepts a `temperature` parameter at all.
    pub supports_temperature: bool,
}

const NEXT_GEN: FamilyRules = FamilyRules {
    max_tokens_param: "max_completion_tokens",
    supports_temperature: false,
};

const CLASSIC: FamilyRules = FamilyRules {
    max_tokens_param: "max_tokens",
    supports_temperature: true,
};

/// Prefix table, longest match wins. Exact names sort before shorter
/// prefixes so family-wide rules can be overridden per model.
const FAMILIES: &[(&str, FamilyRules)] = &[
    ("gpt-5-pro", NEXT_GEN),
    ("gpt-5", NEXT_GEN),
    ("o1", NEXT_GEN),
    ("gpt-4", CLASSIC),
    ("gpt-3.5", CLASSIC),
];

/// Resolve the parameter rules for a model name.
///
/// Unknown models get the classic rules, which every OpenAI-compatible
/// server understands.
pub fn rules_for(model: &str) -> FamilyRules {
    for (prefix, rules) in FAMILIES {
        if model == *prefix || model.starts_with(prefix) {
            return *rules;
        }
    }
    CLASSIC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_gen_family_uses_completion_tokens() {
        let rules = rules_for("gpt-5-mini");
        assert_eq!(rules.max_tokens_param, "max_completion_tokens");
        assert!(!rules.supports_temperature);
    }

    #[test]
    fn pro_model_matches_before_family_prefix() {
        assert_eq!(rules_for("gpt-5-pro"), NEXT_GEN);
    }

    #[test]
    fn classic_family_uses_max_tokens() {
        let rules = rules_for("gpt-4-turbo");
        assert_eq!(rules.max_tokens_param, "max_tokens");
        assert!(rules.supports_temperature);
    }

    #[test]
    fn unknown_model_defaults_to_classic() {
        let rules = rules_for("llama3:8b");
        assert_eq!(rules.max_tokens_param, "max_tokens");
        assert!(rules.supports_temperature);
    }
}
