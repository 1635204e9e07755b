//! Action extraction from raw agent text.
//!
//! Both environments expect an `Action:` marker; everything after the first
//! marker (possibly spanning several lines) is the action. The household
//! grammar additionally rewrites `put X in Y` / `put X on Y` to the
//! simulator's `put X in/on Y` verb.

use std::sync::OnceLock;

use regex_lite::Regex;
use thiserror::Error;

const MARKER: &str = "Action:";

/// Why no action could be extracted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionParseError {
    #[error("agent output contains no 'Action:' marker")]
    MissingMarker,
    #[error("agent output has an empty action after 'Action:'")]
    EmptyAction,
}

/// The action grammar of one environment family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionGrammar {
    /// `Action:` followed by optional whitespace, with put-phrase normalization.
    Household,
    /// `Action: ` with exactly one space, taken verbatim.
    Science,
}

impl ActionGrammar {
    pub fn parse(&self, agent_output: &str) -> Result<String, ActionParseError> {
        let text = agent_output.trim();
        let action = match self {
            Self::Household => {
                let rest = after_marker(text, MARKER)?;
                let rest = rest
                    .strip_prefix(|c: char| c.is_whitespace())
                    .unwrap_or(rest);
                normalize_put(rest)
            }
            Self::Science => after_marker(text, "Action: ")?.to_string(),
        };

        if action.trim().is_empty() {
            return Err(ActionParseError::EmptyAction);
        }
        Ok(action)
    }
}

fn after_marker<'a>(text: &'a str, marker: &str) -> Result<&'a str, ActionParseError> {
    text.find(marker)
        .map(|idx| &text[idx + marker.len()..])
        .ok_or(ActionParseError::MissingMarker)
}

fn put_pattern() -> &'static Regex {
    static PUT: OnceLock<Regex> = OnceLock::new();
    PUT.get_or_init(|| {
        Regex::new(r"put\s+(.*)\s+(?i:[io]n)\s+(.*)").expect("put pattern is a valid regex")
    })
}

/// Rewrite `put <obj> in <recep>` / `put <obj> on <recep>` to the canonical
/// `put <obj> in/on <recep>`. Anything else is returned unchanged.
pub fn normalize_put(action: &str) -> String {
    match put_pattern().captures(action) {
        Some(caps) => format!("put {} in/on {}", &caps[1], &caps[2]),
        None => action.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_household_put_on_is_normalized() {
        let action = ActionGrammar::Household.parse("Action: put apple on table").unwrap();
        assert_eq!(action, "put apple in/on table");
    }

    #[test]
    fn test_household_put_in_uppercase_preposition() {
        let action = ActionGrammar::Household
            .parse("Thought: done.\nAction: put mug 1 IN cabinet 2")
            .unwrap();
        assert_eq!(action, "put mug 1 in/on cabinet 2");
    }

    #[test]
    fn test_household_canonical_put_is_unchanged() {
        let action = ActionGrammar::Household
            .parse("Action: put apple 1 in/on fridge 1")
            .unwrap();
        assert_eq!(action, "put apple 1 in/on fridge 1");
    }

    #[test]
    fn test_household_plain_action_is_unchanged() {
        let action = ActionGrammar::Household.parse("Action: go to fridge").unwrap();
        assert_eq!(action, "go to fridge");
    }

    #[test]
    fn test_household_marker_without_space() {
        let action = ActionGrammar::Household.parse("Action:open drawer 1").unwrap();
        assert_eq!(action, "open drawer 1");
    }

    #[test]
    fn test_takes_everything_after_first_marker() {
        let text = "Thought: think.\nAction: go to desk 1\nAction: look";
        let action = ActionGrammar::Science.parse(text).unwrap();
        assert_eq!(action, "go to desk 1\nAction: look");
    }

    #[test]
    fn test_missing_marker_is_reported() {
        assert_eq!(
            ActionGrammar::Household.parse("I will open the fridge."),
            Err(ActionParseError::MissingMarker)
        );
        assert_eq!(
            ActionGrammar::Science.parse("Action:look around"),
            Err(ActionParseError::MissingMarker)
        );
    }

    #[test]
    fn test_empty_action_is_reported() {
        assert_eq!(
            ActionGrammar::Household.parse("Thought: hmm\nAction:   "),
            Err(ActionParseError::EmptyAction)
        );
    }

    #[test]
    fn test_science_does_not_normalize_put() {
        let action = ActionGrammar::Science.parse("Action: put seed on pot").unwrap();
        assert_eq!(action, "put seed on pot");
    }
}
