//! Security collaborators for the Switchyard proxy.
//!
//! Provides response redaction, the redaction audit trail and bearer-token
//! verification used at the HTTP boundary.
//!
//! # Main types
//!
//! - [`Redactor`] — Pluggable response redaction transform.
//! - [`DictionaryRedactor`] — Dictionary + generic PII redactor.
//! - [`AuditSink`] — Records pre/post redaction payloads.
//! - [`FileAuditSink`] — Writes audit records as JSON files.
//! - [`verify_bearer`] — Checks an `Authorization` header against a token list.

/// Redaction audit trail.
pub mod audit;
/// Bearer token verification.
pub mod auth;
/// Case-insensitive whole-word dictionary matcher.
pub mod matcher;
/// Redaction transform.
pub mod redaction;
/// Generic email and phone number scanner.
pub mod scanner;

pub use audit::{AuditOperation, AuditSink, FileAuditSink};
pub use auth::verify_bearer;
pub use matcher::Matcher;
pub use redaction::{DictionaryRedactor, Redactor};
pub use scanner::redact_generic;

/// Replacement text for every redacted span.
pub const REDACTED: &str = "[REDACTED]";
