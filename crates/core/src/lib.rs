#![forbid(unsafe_code)]

//! Shared domain types and pure logic for the change verifier.

pub mod event;
pub mod outcome;
pub mod types;

pub use event::{decode_event, EventError, EventRecord};
pub use outcome::{classify, VerificationOutcome, EXIT_REF_MISSING, EXIT_TRANSIENT};
pub use types::{ChangeFilter, NotifyPolicy, ReviewVerdict, RevisionId};
