//! Classification of a verification program's exit status.
//!
//! Only genuine failures consume review-service attention; transient
//! and vanished-ref conditions are expected noise from an eventually
//! consistent event source and stay silent.

use crate::types::{ChangeFilter, NotifyPolicy, ReviewVerdict, RevisionId};

/// Exit status reserved for "the revision resolved to no buildable
/// content", e.g. the review was abandoned between discovery and
/// build (sysexits EX_NOINPUT).
pub const EXIT_REF_MISSING: i32 = 66;

/// Exit status reserved for a temporary condition, e.g. a network
/// error while fetching the revision (sysexits EX_TEMPFAIL).
pub const EXIT_TRANSIENT: i32 = 75;

/// What a finished verification attempt means for the change under
/// review.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationOutcome {
    Success,
    /// Temporary condition; a later event or reconciliation pass will
    /// re-surface the revision.
    TransientSkip,
    /// The candidate no longer resolves to buildable content.
    RefMissingSkip,
    Failure,
}

/// Maps a process exit status to an outcome. Total over every status:
/// a job killed by a signal (`None`) counts as a failure.
pub fn classify(code: Option<i32>) -> VerificationOutcome {
    match code {
        Some(0) => VerificationOutcome::Success,
        Some(EXIT_REF_MISSING) => VerificationOutcome::RefMissingSkip,
        Some(EXIT_TRANSIENT) => VerificationOutcome::TransientSkip,
        _ => VerificationOutcome::Failure,
    }
}

impl VerificationOutcome {
    /// The verdict to publish, if any. Success scores +1 and notifies
    /// nobody; failure scores -1 and notifies the owner; skips produce
    /// no verdict at all.
    pub fn verdict(self, filter: &ChangeFilter, revision: &RevisionId) -> Option<ReviewVerdict> {
        let (score, notify) = match self {
            VerificationOutcome::Success => (1, NotifyPolicy::Nobody),
            VerificationOutcome::Failure => (-1, NotifyPolicy::Owner),
            VerificationOutcome::TransientSkip | VerificationOutcome::RefMissingSkip => {
                return None;
            }
        };
        Some(ReviewVerdict {
            project: filter.project.clone(),
            revision: revision.clone(),
            score,
            notify,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ChangeFilter {
        ChangeFilter {
            project: "p".into(),
            branch: "b".into(),
            account: "verifier".into(),
        }
    }

    #[test]
    fn zero_is_success() {
        assert_eq!(classify(Some(0)), VerificationOutcome::Success);
    }

    #[test]
    fn sentinels_map_to_skips() {
        assert_eq!(classify(Some(EXIT_REF_MISSING)), VerificationOutcome::RefMissingSkip);
        assert_eq!(classify(Some(EXIT_TRANSIENT)), VerificationOutcome::TransientSkip);
    }

    #[test]
    fn everything_else_is_failure() {
        for code in [1, 2, 65, 67, 74, 76, 127, 255] {
            assert_eq!(classify(Some(code)), VerificationOutcome::Failure);
        }
        // Killed by a signal: no exit code at all.
        assert_eq!(classify(None), VerificationOutcome::Failure);
    }

    #[test]
    fn success_scores_plus_one_quietly() {
        let rev = RevisionId::from_str("abc123");
        let verdict = VerificationOutcome::Success.verdict(&filter(), &rev).unwrap();
        assert_eq!(verdict.score, 1);
        assert_eq!(verdict.notify, NotifyPolicy::Nobody);
        assert_eq!(verdict.revision, rev);
        assert_eq!(verdict.project, "p");
    }

    #[test]
    fn failure_scores_minus_one_and_notifies_owner() {
        let rev = RevisionId::from_str("abc123");
        let verdict = VerificationOutcome::Failure.verdict(&filter(), &rev).unwrap();
        assert_eq!(verdict.score, -1);
        assert_eq!(verdict.notify, NotifyPolicy::Owner);
    }

    #[test]
    fn skips_produce_no_verdict() {
        let rev = RevisionId::from_str("abc123");
        assert!(VerificationOutcome::TransientSkip.verdict(&filter(), &rev).is_none());
        assert!(VerificationOutcome::RefMissingSkip.verdict(&filter(), &rev).is_none());
    }
}
