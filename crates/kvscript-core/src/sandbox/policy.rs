//! Script policy: deny-list and fixed heuristics, checked before compilation.
//!
//! This is a cheap textual pre-filter. It is trivially bypassed by string
//! concatenation or encoding; containment comes from the capability surface
//! and the execution timeout, not from this check.

use super::error::{ScriptError, ScriptResult};

/// Always-on heuristics, matched case-sensitively: `(token, category)`.
const BUILTIN_DENY: &[(&str, &str)] = &[
    ("System.exit", "system operation"),
    ("process.exit", "system operation"),
    ("Runtime.getRuntime", "system operation"),
    ("ProcessBuilder", "system operation"),
    ("java.io.File", "file operation"),
    ("new File", "file operation"),
    ("Class.forName", "reflection operation"),
    ("ClassLoader", "reflection operation"),
    ("eval(", "reflection operation"),
];

/// Stateless pre-filter for script text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyValidator {
    /// `(as configured, uppercased)` pairs.
    forbidden: Vec<(String, String)>,
}

impl PolicyValidator {
    /// Build a validator from a configured deny-list. Blank entries are ignored.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let forbidden = patterns
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .filter(|p| !p.trim().is_empty())
            .map(|p| {
                let upper = p.to_uppercase();
                (p, upper)
            })
            .collect();
        Self { forbidden }
    }

    /// Configured deny-list entries, as given.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.forbidden.iter().map(|(p, _)| p.as_str())
    }

    /// Check `script` against the policy.
    ///
    /// Order: emptiness, configured deny-list (case-insensitive), builtin
    /// heuristics (case-sensitive). The first failure wins.
    pub fn validate(&self, script: &str) -> ScriptResult<()> {
        if script.trim().is_empty() {
            return Err(ScriptError::Validation("empty script".into()));
        }

        let upper = script.to_uppercase();
        if let Some((pattern, _)) = self.forbidden.iter().find(|(_, u)| upper.contains(u)) {
            return Err(ScriptError::SecurityViolation {
                category: "pattern",
                token: pattern.clone(),
            });
        }

        if let Some(&(token, category)) = BUILTIN_DENY.iter().find(|(t, _)| script.contains(t)) {
            return Err(ScriptError::SecurityViolation {
                category,
                token: token.to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> PolicyValidator {
        PolicyValidator::new(["FLUSHALL", "FLUSHDB", "DEL *", "CONFIG"])
    }

    #[test]
    fn test_empty_and_whitespace_rejected() {
        for text in ["", "   ", "\n\t "] {
            match validator().validate(text) {
                Err(ScriptError::Validation(msg)) => assert!(msg.contains("empty")),
                other => panic!("expected Validation, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_deny_list_is_case_insensitive() {
        match validator().validate("flushall()") {
            Err(ScriptError::SecurityViolation { token, category }) => {
                assert_eq!(token, "FLUSHALL");
                assert_eq!(category, "pattern");
            }
            other => panic!("expected SecurityViolation, got {:?}", other),
        }
        assert!(validator().validate("let c = Config;").is_err());
    }

    #[test]
    fn test_builtin_heuristics_apply_without_config() {
        let empty = PolicyValidator::default();
        for text in [
            "System.exit(0)",
            "Runtime.getRuntime().exec(\"ls\")",
            "new File('/tmp/x').delete()",
            "Class.forName(\"x\")",
            "eval(\"1 + 1\")",
        ] {
            assert!(
                matches!(
                    empty.validate(text),
                    Err(ScriptError::SecurityViolation { .. })
                ),
                "expected {text} to be rejected"
            );
        }
    }

    #[test]
    fn test_heuristics_are_case_sensitive() {
        // Only the configured deny-list is case-folded.
        assert!(PolicyValidator::default().validate("system.EXIT").is_ok());
    }

    #[test]
    fn test_clean_script_passes() {
        assert!(validator().validate("get(\"k1\")").is_ok());
    }

    #[test]
    fn test_concatenation_bypasses_deny_list() {
        // Textual matching only; see module docs.
        assert!(validator().validate("let cmd = \"FLUSH\" + \"ALL\";").is_ok());
    }

    #[test]
    fn test_blank_patterns_ignored() {
        let v = PolicyValidator::new(["", "  ", "KEYS"]);
        assert_eq!(v.patterns().collect::<Vec<_>>(), vec!["KEYS"]);
        assert!(v.validate("get(\"k\")").is_ok());
    }
}
