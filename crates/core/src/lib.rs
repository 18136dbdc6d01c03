//! Domain types for the Pixio generation client.
//!
//! Everything in this crate is pure: job lifecycle rules, the submission
//! model, credit reservations, and the presentation mapping. Network I/O
//! lives in `pixio-client`.

pub mod credits;
pub mod error;
pub mod job;
pub mod presenter;
pub mod submission;
pub mod types;
pub mod upload;
