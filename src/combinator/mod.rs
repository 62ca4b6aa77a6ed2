//! Combinators over deferreds.
//!
//! - [`DeferredList`]: wait for many deferreds, with early-exit and
//!   error-consumption options
//! - [`gather_results`]: plain list of values, or the first failure

pub mod deferred_list;
pub mod gather;

pub use deferred_list::{DeferredList, DeferredListBuilder, FirstError, ListEntry, ListOutcome};
pub use gather::gather_results;
