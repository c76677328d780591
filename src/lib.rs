#![deny(missing_docs)]
//! Najah results bot
//!
//! A Telegram bot that serves national exam results to a large Arabic-speaking
//! audience. Many backend bot credentials present themselves to users as a
//! single logical bot: one credential receives all inbound traffic while
//! responses are load-balanced across the full token list, with failover to
//! the primary credential when a backend token misbehaves.

/// Broadcast fan-out engine with batched concurrency
pub mod broadcast;
/// Telegram conversation flows, templates and ingress
pub mod bot;
/// Configuration management
pub mod config;
/// Student directory access (students, exam results)
pub mod directory;
/// Token routing, bot managers and outbound dispatch
pub mod dispatch;
/// External result-lookup API client
pub mod lookup;
/// Per-user request rate limiting
pub mod ratelimit;
/// Conversation state model and session store contract
pub mod session;
/// Session persistence backed by R2/S3
pub mod storage;
pub mod utils;
/// User input validation
pub mod validation;
