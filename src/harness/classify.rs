//! Outcome classification for a single capability call

use crate::harness::channel::Reply;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Substrings that suggest a result is really an error message
const ERROR_INDICATORS: &[&str] = &[
    "error",
    "exception",
    "failed",
    "not found",
    "错误",
    "失败",
    "未找到",
];

/// Results at least this long are assumed to be real payloads that merely mention errors
const SHORT_RESULT_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    Passed,
    /// A result that reads like an error; half a pass
    Partial,
    Failed,
    /// No response within the call timeout
    Timeout,
    Unknown,
}

impl CapabilityStatus {
    /// Contribution toward the aggregate pass weight
    pub fn pass_weight(&self) -> f64 {
        match self {
            CapabilityStatus::Passed => 1.0,
            CapabilityStatus::Partial => 0.5,
            _ => 0.0,
        }
    }
}

impl fmt::Display for CapabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CapabilityStatus::Passed => "passed",
            CapabilityStatus::Partial => "partial",
            CapabilityStatus::Failed => "failed",
            CapabilityStatus::Timeout => "timeout",
            CapabilityStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

fn looks_like_error(result: &Value) -> bool {
    let text = result.to_string().to_lowercase();
    text.chars().count() < SHORT_RESULT_LIMIT
        && ERROR_INDICATORS.iter().any(|needle| text.contains(needle))
}

/// Judge a reply. A structured `isError` flag is trusted when present;
/// the substring heuristic only applies without one.
pub fn classify(reply: &Reply) -> CapabilityStatus {
    let message = match reply {
        Reply::TimedOut => return CapabilityStatus::Timeout,
        Reply::Response(message) => message,
    };

    if message.error.is_some() {
        return CapabilityStatus::Failed;
    }

    let result = match &message.result {
        Some(result) => result,
        None => return CapabilityStatus::Unknown,
    };

    match result.get("isError").and_then(|v| v.as_bool()) {
        Some(true) => CapabilityStatus::Failed,
        Some(false) => CapabilityStatus::Passed,
        None if looks_like_error(result) => CapabilityStatus::Partial,
        None => CapabilityStatus::Passed,
    }
}
