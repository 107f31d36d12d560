use serde::{Deserialize, Serialize};

/// Opaque identifier for a specific patch revision (commit-like).
/// Keys the lock registry and names the revision to the verification
/// program and the review service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionId(pub String);

impl RevisionId {
    pub fn from_str(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which events and polled changes this daemon instance cares about.
/// Fixed for the daemon's lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeFilter {
    pub project: String,
    pub branch: String,
    /// Service-account identity on the review service.
    pub account: String,
}

/// Who gets emailed when a verdict is posted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyPolicy {
    Owner,
    Nobody,
}

impl NotifyPolicy {
    /// Wire value understood by the review service.
    pub fn as_arg(self) -> &'static str {
        match self {
            NotifyPolicy::Owner => "OWNER",
            NotifyPolicy::Nobody => "NONE",
        }
    }
}

/// A Verified-label update for one revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewVerdict {
    pub project: String,
    pub revision: RevisionId,
    /// -1 or +1; a zero score is never posted.
    pub score: i8,
    pub notify: NotifyPolicy,
}
