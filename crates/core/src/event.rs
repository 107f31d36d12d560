//! Decoding of the review service's live event feed.
//!
//! The subscription asks for exactly three event kinds, so the decoded
//! set is closed: anything else on the wire is a decode failure that
//! aborts the current subscription, not a silently ignored default.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{ChangeFilter, RevisionId};

/// Ref value the service reports when a ref was deleted.
const ZERO_REV: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Error)]
pub enum EventError {
    /// The feed delivered an event kind outside the subscribed set.
    #[error("unrecognized event kind: {0:?}")]
    UnrecognizedKind(String),

    #[error("malformed event record: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub username: Option<String>,
}

/// The change a comment or patch set belongs to.
#[derive(Clone, Debug, Deserialize)]
pub struct ChangeInfo {
    pub project: String,
    pub branch: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PatchSetInfo {
    pub revision: String,
}

/// One label delta attached to a comment.
#[derive(Clone, Debug, Deserialize)]
pub struct Approval {
    #[serde(rename = "type")]
    pub label: String,
    pub value: String,
    /// Absent when the vote did not change.
    #[serde(rename = "oldValue", default)]
    pub old_value: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CommentAdded {
    pub change: ChangeInfo,
    #[serde(rename = "patchSet")]
    pub patch_set: PatchSetInfo,
    pub author: Account,
    #[serde(default)]
    pub approvals: Vec<Approval>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PatchsetCreated {
    pub change: ChangeInfo,
    #[serde(rename = "patchSet")]
    pub patch_set: PatchSetInfo,
    pub uploader: Account,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RefUpdate {
    pub project: String,
    #[serde(rename = "refName")]
    pub ref_name: String,
    #[serde(rename = "newRev")]
    pub new_rev: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RefUpdated {
    #[serde(default)]
    pub submitter: Option<Account>,
    #[serde(rename = "refUpdate")]
    pub ref_update: RefUpdate,
}

/// One decoded record from the live event feed.
#[derive(Clone, Debug)]
pub enum EventRecord {
    CommentAdded(CommentAdded),
    PatchsetCreated(PatchsetCreated),
    RefUpdated(RefUpdated),
}

/// Decodes one raw feed line. Unknown kinds are fatal to the caller's
/// subscription by contract.
pub fn decode_event(line: &str) -> Result<EventRecord, EventError> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();
    match kind.as_str() {
        "comment-added" => Ok(EventRecord::CommentAdded(serde_json::from_value(value)?)),
        "patchset-created" => Ok(EventRecord::PatchsetCreated(serde_json::from_value(value)?)),
        "ref-updated" => Ok(EventRecord::RefUpdated(serde_json::from_value(value)?)),
        _ => Err(EventError::UnrecognizedKind(kind)),
    }
}

impl EventRecord {
    /// Pure relevance test: yields the candidate revision if this
    /// event calls for a verification attempt under `filter`.
    pub fn candidate(&self, filter: &ChangeFilter) -> Option<RevisionId> {
        match self {
            EventRecord::CommentAdded(e) => e.candidate(filter),
            EventRecord::PatchsetCreated(e) => e.candidate(filter),
            EventRecord::RefUpdated(e) => e.candidate(filter),
        }
    }
}

impl CommentAdded {
    /// A reviewer explicitly revoked a prior verification: the
    /// Verified label moved from a non-zero value back to zero on one
    /// of our own changes. Treated as a re-verification request.
    fn candidate(&self, filter: &ChangeFilter) -> Option<RevisionId> {
        if self.change.project != filter.project || self.change.branch != filter.branch {
            return None;
        }
        if self.author.username.as_deref() != Some(filter.account.as_str()) {
            return None;
        }
        let revoked = self.approvals.iter().any(|a| {
            a.label == "Verified"
                && a.value == "0"
                && a.old_value.as_deref().is_some_and(|old| old != "0")
        });
        revoked.then(|| RevisionId::from_str(self.patch_set.revision.clone()))
    }
}

impl PatchsetCreated {
    fn candidate(&self, filter: &ChangeFilter) -> Option<RevisionId> {
        if self.change.project != filter.project || self.change.branch != filter.branch {
            return None;
        }
        if self.uploader.username.as_deref() != Some(filter.account.as_str()) {
            return None;
        }
        Some(RevisionId::from_str(self.patch_set.revision.clone()))
    }
}

impl RefUpdated {
    /// Metadata and tag refs never carry buildable revisions, and an
    /// all-zero new value means the ref was deleted.
    fn candidate(&self, filter: &ChangeFilter) -> Option<RevisionId> {
        let update = &self.ref_update;
        if update.project != filter.project {
            return None;
        }
        if update.ref_name.starts_with("refs/meta/") || update.ref_name.starts_with("refs/tags/") {
            return None;
        }
        if update.new_rev == ZERO_REV {
            return None;
        }
        Some(RevisionId::from_str(update.new_rev.clone()))
    }
}
