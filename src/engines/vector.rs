//! Retrieval-augmented engine over the vector index.
//!
//! This is the router's safety net, so it degrades instead of failing:
//! empty retrieval produces a polite "not enough context" answer rather
//! than an error. Vectors carry only doctype + record ids; the actual
//! content is re-fetched from the relational store at answer time.

use crate::embeddings::EmbeddingProvider;
use crate::engines::{EngineAnswer, EngineError, QueryEngine};
use crate::llm::{refine_with_history, ChatModel, DoctypeSelector};
use crate::render::record_to_text;
use crate::schema::SchemaCatalog;
use crate::stores::{SqlStore, VectorIndex, VectorMatch};
use crate::types::{Engine, Turn};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const NO_CONTEXT_ANSWER: &str =
    "I don't have enough context in the knowledge base to answer that.";

const SYNTHESIS_PROMPT: &str = "You are a helpful assistant for an LMS team. Answer the \
user's question using ONLY the provided context records. Be concise. If the context does \
not contain the answer, say you don't have enough information. Never invent records.";

/// Retrieval-augmented answering engine.
pub struct VectorEngine {
    llm: Arc<dyn ChatModel>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn SqlStore>,
    catalog: Arc<SchemaCatalog>,
    selector: DoctypeSelector,
    top_k: usize,
    route_top_n: usize,
    max_context_chars: usize,
    timeout: Duration,
}

impl VectorEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn SqlStore>,
        catalog: Arc<SchemaCatalog>,
        top_k: usize,
        route_top_n: usize,
        max_context_chars: usize,
        timeout: Duration,
    ) -> Self {
        let selector = DoctypeSelector::new(Arc::clone(&llm), Arc::clone(&catalog));
        Self {
            llm,
            embedder,
            index,
            store,
            catalog,
            selector,
            top_k,
            route_top_n,
            max_context_chars,
            timeout,
        }
    }

    /// Query each routed doctype's namespace and merge hits by score.
    async fn retrieve(
        &self,
        vector: &[f32],
        doctypes: &[String],
    ) -> Result<Vec<VectorMatch>, EngineError> {
        let mut merged: Vec<VectorMatch> = Vec::new();
        let mut failures = 0usize;
        for doctype in doctypes {
            match tokio::time::timeout(self.timeout, self.index.query(vector, self.top_k, doctype))
                .await
            {
                Ok(Ok(matches)) => merged.extend(matches),
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!(namespace = %doctype, error = %e, "vector namespace query failed");
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!(namespace = %doctype, "vector namespace query timed out");
                }
            }
        }
        if !doctypes.is_empty() && failures == doctypes.len() {
            return Err(EngineError::Execution(
                "all vector namespace queries failed".to_string(),
            ));
        }
        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(self.top_k);
        Ok(merged)
    }

    /// Group matched record ids by doctype, preserving score order and
    /// dropping duplicates.
    fn group_by_doctype(&self, matches: &[VectorMatch], fallback: &str) -> BTreeMap<String, Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for m in matches {
            let doctype = m.doctype.clone().unwrap_or_else(|| fallback.to_string());
            let ids = grouped.entry(doctype).or_default();
            for id in &m.record_ids {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }
        grouped
    }

    /// Fetch full records and render them into a bounded context block.
    async fn build_context(
        &self,
        grouped: &BTreeMap<String, Vec<String>>,
    ) -> (String, Vec<serde_json::Value>) {
        let mut blocks: Vec<String> = Vec::new();
        let mut sources: Vec<serde_json::Value> = Vec::new();
        let mut used = 0usize;

        let mut budget_hit = false;
        for (doctype, ids) in grouped {
            let Some(table) = self.catalog.table_of(doctype) else {
                tracing::warn!(%doctype, "matched doctype has no table in the catalog");
                continue;
            };
            let records = match self.store.fetch_records(table, ids).await {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(%doctype, error = %e, "record fetch failed");
                    continue;
                }
            };
            let display_field = self.catalog.display_field_for(doctype);
            let mut included: Vec<String> = Vec::new();
            for record in &records {
                let text = record_to_text(doctype, display_field, record);
                if used + text.len() > self.max_context_chars {
                    budget_hit = true;
                    break;
                }
                used += text.len();
                if let Some(id) = record.get("name").and_then(|v| v.as_str()) {
                    included.push(id.to_string());
                }
                blocks.push(text);
            }
            // records already in the context stay attributed even when the
            // budget cuts this doctype short
            if !included.is_empty() {
                sources.push(json!({"doctype": doctype, "record_ids": included}));
            }
            if budget_hit {
                break;
            }
        }

        (blocks.join("\n\n---\n\n"), sources)
    }
}

#[async_trait]
impl QueryEngine for VectorEngine {
    fn engine(&self) -> Engine {
        Engine::Vector
    }

    async fn attempt(
        &self,
        query: &str,
        history: &[Turn],
    ) -> Result<EngineAnswer, EngineError> {
        let refined = refine_with_history(self.llm.as_ref(), query, history).await;
        let doctypes = self.selector.pick(&refined, self.route_top_n).await;
        tracing::debug!(?doctypes, %refined, "vector routing");

        let vector = self
            .embedder
            .embed(&refined)
            .await
            .map_err(|e| EngineError::Execution(format!("embedding failed: {e}")))?;

        let matches = self.retrieve(&vector, &doctypes).await?;
        let fallback_doctype = doctypes.first().cloned().unwrap_or_default();
        let grouped = self.group_by_doctype(&matches, &fallback_doctype);
        let (context, sources) = self.build_context(&grouped).await;

        if context.trim().is_empty() {
            // The safety net answers politely instead of failing.
            return Ok(EngineAnswer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                rows: None,
                metadata: json!({
                    "refined_query": refined,
                    "routed_doctypes": doctypes,
                    "sources": [],
                    "matches": matches.len(),
                }),
            });
        }

        let user_msg = format!("QUESTION:\n{refined}\n\nCONTEXT RECORDS:\n{context}");
        let answer = self
            .llm
            .complete(SYNTHESIS_PROMPT, &user_msg)
            .await
            .map_err(|e| EngineError::Execution(format!("answer synthesis failed: {e}")))?;

        Ok(EngineAnswer {
            answer,
            rows: None,
            metadata: json!({
                "refined_query": refined,
                "routed_doctypes": doctypes,
                "sources": sources,
                "context_chars": context.len(),
            }),
        })
    }
}
