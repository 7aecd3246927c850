//! Disallowed-topic gate.
//!
//! A question is inadmissible when it contains any denylist keyword,
//! compared case-insensitively as a plain substring. False positives are
//! accepted ("weaponry" matches "weapon").

/// Keyword denylist check applied before any retrieval.
#[derive(Debug, Clone)]
pub struct TopicGate {
    denylist: Vec<String>,
}

impl TopicGate {
    pub fn new<I, S>(denylist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let denylist = denylist
            .into_iter()
            .map(|kw| kw.as_ref().trim().to_lowercase())
            .filter(|kw| !kw.is_empty())
            .collect();
        Self { denylist }
    }

    /// Returns `true` when the question may be answered.
    pub fn classify(&self, question: &str) -> bool {
        self.matched_keyword(question).is_none()
    }

    /// The first denylist keyword found in `question`, if any.
    pub fn matched_keyword(&self, question: &str) -> Option<&str> {
        let lowered = question.to_lowercase();
        self.denylist
            .iter()
            .find(|kw| lowered.contains(kw.as_str()))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_denylist;

    #[test]
    fn test_default_denylist_rejects_keywords() {
        let gate = TopicGate::new(default_denylist());
        assert!(!gate.classify("What is your opinion on POLITICS?"));
        assert!(!gate.classify("Where can I buy a weapon"));
        assert!(!gate.classify("Is hate speech moderated here?"));
        assert!(gate.classify("How do I reset my password?"));
    }

    #[test]
    fn test_substring_matching_is_conservative() {
        let gate = TopicGate::new(["weapon"]);
        assert_eq!(gate.matched_keyword("List all weaponry"), Some("weapon"));
    }

    #[test]
    fn test_denylist_normalised() {
        let gate = TopicGate::new(["  Adult ", ""]);
        assert!(!gate.classify("adult content policy"));
        assert!(gate.classify("anything else"));
    }

    #[test]
    fn test_empty_denylist_admits_everything() {
        let gate = TopicGate::new(Vec::<String>::new());
        assert!(gate.classify("politics"));
    }
}
