//! Built-in handoff rules.
//!
//! Patterns run against normalised text (see [`super::normalize`]): lowercase, `ё` folded to `е`,
//! punctuation replaced by spaces. Keyword rules match any word starting with the keyword, so
//! `оператор` also covers `оператора` and `операторы`.

use once_cell::sync::Lazy;

use super::HandoffRule;

/// How a rule's text is turned into a regex.
pub(crate) enum RuleKind {
    /// Word starting with the given stem
    Keyword(&'static str),
    /// Raw regex over normalised text
    Pattern(&'static str),
}

pub(crate) struct RuleSpec {
    pub name: &'static str,
    pub kind: RuleKind,
    pub weight: f32,
}

const fn keyword(name: &'static str, stem: &'static str, weight: f32) -> RuleSpec {
    RuleSpec {
        name,
        kind: RuleKind::Keyword(stem),
        weight,
    }
}

const fn pattern(name: &'static str, regex: &'static str, weight: f32) -> RuleSpec {
    RuleSpec {
        name,
        kind: RuleKind::Pattern(regex),
        weight,
    }
}

pub(crate) const BUILTIN_RULES: &[RuleSpec] = &[
    // Direct requests for a person
    keyword("operator", "оператор", 0.7),
    keyword("manager", "менеджер", 0.6),
    keyword("specialist", "специалист", 0.5),
    keyword("employee", "сотрудник", 0.5),
    keyword("consultant", "консультант", 0.5),
    keyword("support", "поддержк", 0.4),
    pattern("live_person", r"\bжив\w*\s+(?:\w+\s+)?(?:человек|люд|оператор|сотрудник)\w*", 0.8),
    keyword("human", "человек", 0.3),
    // Verbs that turn a noun into a request
    pattern(
        "call_request",
        r"\b(?:позов\w*|позвать|пригласи\w*|соедини\w*|переключи\w*|свяжи\w*|связаться|поговорить|дайте)\b",
        0.3,
    ),
    // Frustration with the bot
    pattern("bot_complaint", r"\b(?:ты|вы)\s+(?:же\s+)?(?:бот|робот)\w*", 0.4),
    pattern("not_understood", r"\bне\s+понима\w*", 0.3),
    keyword("complaint", "жалоб", 0.4),
    // English
    pattern(
        "en_human",
        r"\b(?:human|real person|live agent|agent|operator|representative|manager|someone real)\b",
        0.6,
    ),
    pattern("en_request", r"\b(?:talk to|speak to|speak with|connect me|transfer me|let me talk)\b", 0.3),
    // Negations cancel the request they qualify
    pattern(
        "negation",
        r"\bне\s+(?:нужн\w*|надо|нужен|зови\w*|позов\w*|хочу)\s+(?:\w+\s+)?(?:оператор|человек|менеджер|сотрудник|специалист)\w*",
        -0.8,
    ),
    pattern(
        "en_negation",
        r"\b(?:no|don t|do not|dont)\s+(?:need|want)\s+(?:a\s+|an\s+|the\s+)?(?:human|operator|agent|manager)\b",
        -0.8,
    ),
];

/// Compiled built-in rules, shared by every detector.
pub(crate) static DEFAULT_RULES: Lazy<Vec<HandoffRule>> = Lazy::new(|| {
    BUILTIN_RULES
        .iter()
        .map(|spec| HandoffRule::from_spec(spec).expect("built-in handoff pattern compiles"))
        .collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules_compile() {
        assert_eq!(DEFAULT_RULES.len(), BUILTIN_RULES.len());
        let mut names: Vec<_> = BUILTIN_RULES.iter().map(|r| r.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), BUILTIN_RULES.len(), "rule names must be unique");
    }
}
