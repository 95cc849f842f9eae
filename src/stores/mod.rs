//! Backend store seams.
//!
//! The relational, graph and vector backends sit behind traits so the
//! engines and the migrator stay testable without live services. Concrete
//! implementations: SQLite (embedded), Neo4j over its HTTP transaction
//! API, and a Pinecone-style vector index over REST.

mod neo4j;
mod pinecone;
mod sqlite;

pub use neo4j::Neo4jHttp;
pub use pinecone::PineconeIndex;
pub use sqlite::SqliteStore;

use crate::types::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Read access to the relational store.
#[async_trait]
pub trait SqlStore: Send + Sync {
    /// Execute a sanitized, read-only SQL statement. Rows come back as
    /// JSON objects keyed by column name.
    async fn query(&self, sql: &str) -> Result<Vec<Value>>;

    /// Fetch full records for a table by primary-key values (`name`).
    async fn fetch_records(&self, table: &str, ids: &[String]) -> Result<Vec<Value>>;

    /// Fetch one page of a table, ordered by primary key.
    async fn fetch_page(&self, table: &str, offset: u64, limit: u64) -> Result<Vec<Value>>;

    /// Row count for a table.
    async fn count(&self, table: &str) -> Result<u64>;
}

/// Write counters reported by the graph store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub nodes_created: u64,
    pub relationships_created: u64,
}

/// Access to the property-graph store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Run a read statement; each row is a JSON object (or bare value for
    /// single-column results).
    async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Value>>;

    /// Run a write statement and return its counters.
    async fn run_write(&self, statement: &str, parameters: Value) -> Result<WriteSummary>;
}

/// One nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f64,
    /// Source doctype recorded in the vector metadata
    pub doctype: Option<String>,
    /// Source record ids grouped into this vector
    pub record_ids: Vec<String>,
}

/// One vector to upsert. Metadata carries only doctype + record ids,
/// never full content.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Value,
}

/// Access to the vector index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top-k nearest neighbors within a namespace.
    async fn query(&self, vector: &[f32], top_k: usize, namespace: &str)
        -> Result<Vec<VectorMatch>>;

    /// Upsert vectors into a namespace; returns the accepted count.
    async fn upsert(&self, namespace: &str, vectors: Vec<VectorRecord>) -> Result<usize>;
}
