use serde::{Deserialize, Serialize};

/// A named capability grant, e.g. `calendar:write`.
///
/// Scopes are `domain:capability` strings. Ordering is lexical so scope sets
/// sort deterministically for hashing.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// The part before the first `:`, or the whole scope when there is none.
    pub fn domain(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }

    /// The read-only counterpart of this scope (`calendar:write` -> `calendar:read`).
    pub fn read_projection(&self) -> Scope {
        Scope(format!("{}:read", self.domain()))
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Scope {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Classification of a scope under a [`ScopePolicy`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScopeClass {
    ReadOnly,
    /// Ends in a write suffix.
    Write,
    /// Contains a pattern that is never permitted on a read path.
    Forbidden { pattern: String },
}

/// Rules deciding which scopes count as read-only.
///
/// Forbidden patterns take precedence over suffixes, so `payments:read` is
/// still refused on a read path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopePolicy {
    /// Suffixes marking a write scope (matched case-insensitively).
    pub write_suffixes: Vec<String>,
    /// Substrings that make a scope forbidden on read paths.
    pub forbidden_patterns: Vec<String>,
}

impl Default for ScopePolicy {
    fn default() -> Self {
        Self {
            write_suffixes: vec![
                ":write".into(),
                ":create".into(),
                ":update".into(),
                ":delete".into(),
                ":admin".into(),
            ],
            forbidden_patterns: vec![
                "payment".into(),
                "transfer".into(),
                "initiate".into(),
                "withdraw".into(),
                "purchase".into(),
            ],
        }
    }
}

impl ScopePolicy {
    pub fn classify(&self, scope: &Scope) -> ScopeClass {
        let lowered = scope.as_str().to_ascii_lowercase();

        if let Some(pattern) = self
            .forbidden_patterns
            .iter()
            .find(|p| lowered.contains(&p.to_ascii_lowercase()))
        {
            return ScopeClass::Forbidden {
                pattern: pattern.clone(),
            };
        }

        if self
            .write_suffixes
            .iter()
            .any(|s| lowered.ends_with(&s.to_ascii_lowercase()))
        {
            return ScopeClass::Write;
        }

        ScopeClass::ReadOnly
    }

    pub fn is_read_only(&self, scope: &Scope) -> bool {
        self.classify(scope) == ScopeClass::ReadOnly
    }
}
