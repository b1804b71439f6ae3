//! Stream API payloads and the record persisted per post.

use serde::{Deserialize, Serialize};

/// Filter rule installed on the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRule {
    /// Filter expression, e.g. `from:someaccount`
    pub value: String,
    /// Label echoed back on every matching post; used as the timeline name
    pub tag: String,
}

impl StreamRule {
    pub fn new(value: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            tag: tag.into(),
        }
    }
}

/// Rule as listed by the rules endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstalledRule {
    pub id: String,
    pub value: String,
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RulesResponse {
    /// Absent when no rules are installed
    #[serde(default)]
    pub data: Vec<InstalledRule>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AddRules<'a> {
    pub add: &'a [StreamRule],
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteRules {
    pub delete: DeleteIds,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteIds {
    pub ids: Vec<String>,
}

/// One line of the streaming body.
#[derive(Debug, Deserialize)]
pub(crate) struct StreamLine {
    pub data: PostData,
    #[serde(default)]
    pub matching_rules: Vec<MatchingRule>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostData {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MatchingRule {
    pub tag: String,
}

/// What gets written for each post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub tid: String,
    pub text: String,
    pub ticker: Option<String>,
    pub timeline: String,
    /// Local receive time, `%Y-%m-%d %H:%M:%S`
    pub timestamp: String,
}
