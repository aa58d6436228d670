//! Reference tracking
//!
//! This module keeps track of which references are queued, being processed,
//! processed in the current run, or known from the previous run.

mod normalize;
mod store;

pub use normalize::normalize_reference;
pub use store::{
    ReferenceStore, ResumePolicy, RunState, ACTIVE_STORE, CACHED_STORE, PROCESSED_STORE,
    QUEUED_STORE, RUN_STATE_STORE,
};
