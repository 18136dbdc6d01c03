//! Pixio REST client and job orchestration.
//!
//! Provides the HTTP API wrapper, environment configuration, the upload
//! handshake, the cancellable per-job poll loop with backoff, a shared job
//! tracker broadcasting lifecycle events, and the credit-gated launcher
//! that ties them together.

pub mod api;
pub mod backoff;
pub mod config;
pub mod download;
pub mod events;
pub mod launcher;
pub mod messages;
pub mod poller;
pub mod tracker;
pub mod upload;
