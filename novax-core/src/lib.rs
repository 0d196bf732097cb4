//! # novax-core
//!
//! Core library for novax - a tutoring backend where users work through
//! topics with an AI mentor and earn experience for their reasoning.
//!
//! This library provides:
//! - The session lifecycle manager (start, record, complete, abandon)
//! - Transcript buffers for in-progress conversations (memory or Redis)
//! - The LLM scoring gateway
//! - The leveling schedule
//! - The durable session ledger on SQLite
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! A session's messages live only in the transcript buffer while it is in
//! progress. Completion turns the transcript into score points in the
//! ledger and retires the buffer; experience and levels are always derived
//! from completed score points, never stored.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use novax_core::{
//!     create_scoring_gateway, create_transcript_buffer, Config, Database, LevelSchedule,
//!     Role, SessionLifecycle,
//! };
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let lifecycle = SessionLifecycle::new(
//!     Arc::new(db),
//!     create_transcript_buffer(&config.transcript).expect("buffer"),
//!     create_scoring_gateway(&config).expect("scoring"),
//!     LevelSchedule::from_config(&config.leveling).expect("leveling"),
//! );
//!
//! let session = lifecycle.start(7, 3).expect("start");
//! lifecycle.record_message(session, Role::User, "Explain recursion").expect("record");
//! let outcome = lifecycle.complete(session, 7, 3).expect("complete");
//! println!("level {} with {} exp", outcome.level, outcome.total_exp);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use error::{Error, PartialStage, Result};
pub use ledger::SessionLedger;
pub use leveling::{LevelProgress, LevelSchedule};
pub use lifecycle::SessionLifecycle;
pub use markers::{parse_reply, MentorReply, ReplySignals};
pub use scoring::{create_scoring_gateway, LlmScoringGateway, ScoringGateway};
pub use transcript::{create_transcript_buffer, MemoryTranscriptBuffer, TranscriptBuffer};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod leveling;
pub mod lifecycle;
pub mod logging;
pub mod markers;
pub mod scoring;
pub mod transcript;
pub mod types;
