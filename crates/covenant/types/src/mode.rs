use serde::{Deserialize, Serialize};

/// How far an operation may reach into the outside world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// No side effects; the pipeline only produces suggestions.
    SuggestOnly,
    /// Full pipeline, no external writes.
    Simulate,
    /// Real external effect, gated by approval.
    Execute,
}

impl RunMode {
    /// Stable wire name used in canonical hash inputs and audit entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::SuggestOnly => "suggest_only",
            RunMode::Simulate => "simulate",
            RunMode::Execute => "execute",
        }
    }

    pub fn is_execute(&self) -> bool {
        matches!(self, RunMode::Execute)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification carried by a loop; drives the approval threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    Low,
    Medium,
    High,
}

impl RiskClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskClass::Low => "low",
            RiskClass::Medium => "medium",
            RiskClass::High => "high",
        }
    }
}

impl std::fmt::Display for RiskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
