//! Core value types.
//!
//! - [`Ticket`]: names one scheduled call
//! - [`Time`]: scheduler time in milliseconds

pub mod id;

pub use id::{Ticket, Time};
