//! Doctype pre-selection.
//!
//! Picks a small, ordered set of candidate entity types for a question so
//! downstream query generation stays well-scoped. Falls back to a keyword
//! heuristic when the LLM is unavailable or returns unusable output.

use crate::llm::ChatModel;
use crate::schema::{canonical_doctype, SchemaCatalog};
use serde::Deserialize;
use std::sync::Arc;

const SELECTOR_PROMPT: &str = r#"You are a routing assistant.
Given:
- A natural language question about LMS data
- A JSON schema that lists DocTypes, their fields, and link relationships

Return ONLY a JSON object with:
{
  "doctypes": ["DocType A", "DocType B", ...],
  "reason": "short explanation (<= 30 words)"
}

Rules:
- Choose the minimum set of DocTypes that can answer the query.
- Prefer DocTypes explicitly mentioning fields used in the question.
- If no explicit match exists, pick the semantically closest.
- Use link relationships to include supporting DocTypes only if needed.
- Keep 'doctypes' length <= TOP_N (the tool will tell you).
- No prose outside JSON. No backticks."#;

#[derive(Debug, Deserialize)]
struct SelectorReply {
    #[serde(default)]
    doctypes: Vec<String>,
}

/// LLM-backed doctype selector with a heuristic fallback.
pub struct DoctypeSelector {
    llm: Arc<dyn ChatModel>,
    catalog: Arc<SchemaCatalog>,
}

impl DoctypeSelector {
    pub fn new(llm: Arc<dyn ChatModel>, catalog: Arc<SchemaCatalog>) -> Self {
        Self { llm, catalog }
    }

    /// Pick up to `top_n` candidate doctypes for the question.
    ///
    /// Never fails: LLM errors and unparseable replies fall back to the
    /// keyword heuristic, which always returns something for a non-empty
    /// catalog.
    pub async fn pick(&self, query: &str, top_n: usize) -> Vec<String> {
        let summary = self.catalog.compact_summary();
        let user_msg = format!(
            "TOP_N={top_n}\n\nQUESTION:\n{query}\n\nSCHEMA SUMMARY (DocTypes with fields & links):\n{summary}"
        );

        match self.llm.complete(SELECTOR_PROMPT, &user_msg).await {
            Ok(reply) => match serde_json::from_str::<SelectorReply>(&reply) {
                Ok(parsed) => {
                    let normalized = self.catalog.normalize_doctypes(&parsed.doctypes);
                    if normalized.is_empty() {
                        self.fallback(query, top_n)
                    } else {
                        normalized.into_iter().take(top_n).collect()
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "doctype selector returned invalid JSON");
                    self.fallback(query, top_n)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "doctype selector LLM call failed");
                self.fallback(query, top_n)
            }
        }
    }

    /// Keyword-overlap heuristic: score each allow-listed table by name,
    /// field and description overlap with the question.
    fn fallback(&self, query: &str, top_n: usize) -> Vec<String> {
        let ql = query.to_lowercase();
        let mut scored: Vec<(i64, String)> = Vec::new();

        for table in self.catalog.allowlisted_tables() {
            let doctype = self.catalog.doctype_of(table);
            let info = &self.catalog.tables[table];
            let mut score = 0i64;

            for token in doctype.to_lowercase().split_whitespace() {
                if ql.contains(token) {
                    score += 5;
                }
            }
            for col in &info.columns {
                let any_token = col
                    .name()
                    .split('_')
                    .any(|tok| !tok.is_empty() && ql.contains(tok));
                if any_token {
                    score += 1;
                }
            }
            let desc = info.description.to_lowercase();
            if !desc.is_empty() && ql.split_whitespace().any(|w| desc.contains(w)) {
                score += 1;
            }

            if score > 0 {
                scored.push((score, doctype));
            }
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let picked: Vec<String> = scored.into_iter().take(top_n).map(|(_, d)| d).collect();

        if picked.is_empty() {
            // nothing matched; hand back the head of the allow-list
            self.catalog
                .allowlist
                .iter()
                .take(top_n)
                .map(|t| canonical_doctype(t).to_string())
                .collect()
        } else {
            picked
        }
    }
}
