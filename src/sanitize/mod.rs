//! Sanitization of LLM-generated statements.
//!
//! Generated SQL and Cypher are untrusted input. Both pass through a
//! validator before touching a backend: read-only statement kinds only,
//! allow-listed tables/labels only, and an enforced result cap.

mod cypher;
mod sql;

pub use cypher::{CypherPolicy, SanitizedCypher};
pub use sql::sanitize_select;
