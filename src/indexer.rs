//! Vector index population.
//!
//! Walks the allow-listed tables, renders records into text blocks,
//! embeds them, and upserts into the vector index one namespace per
//! doctype. Records are grouped so one vector covers a handful of rows;
//! its metadata keeps only the doctype and the covered record ids, and
//! retrieval re-fetches the rows from the relational store.

use crate::embeddings::EmbeddingProvider;
use crate::render::record_to_text;
use crate::schema::SchemaCatalog;
use crate::stores::{SqlStore, VectorIndex, VectorRecord};
use crate::types::Result;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Records grouped into one vector.
const GROUP_RECORDS: usize = 20;

/// Texts embedded per API call.
const EMBED_BATCH: usize = 64;

/// Outcome of one indexing run.
#[derive(Debug, Default, Serialize)]
pub struct IndexReport {
    /// Vectors upserted per doctype.
    pub vectors: BTreeMap<String, u64>,
    /// Records covered per doctype.
    pub records: BTreeMap<String, u64>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Builds the vector index from the relational store.
pub struct VectorIndexer {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    sql: Arc<dyn SqlStore>,
    catalog: Arc<SchemaCatalog>,
    batch_size: usize,
}

impl VectorIndexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        sql: Arc<dyn SqlStore>,
        catalog: Arc<SchemaCatalog>,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            sql,
            catalog,
            batch_size: batch_size.max(1),
        }
    }

    /// Index every allow-listed doctype.
    pub async fn index_all(&self) -> Result<IndexReport> {
        let started = Instant::now();
        let mut report = IndexReport::default();
        for doctype in self.catalog.allowlisted_doctypes() {
            self.index_one(&doctype, &mut report).await;
        }
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Index a single doctype (accepts a table name too).
    pub async fn index_doctype(&self, doctype_or_table: &str) -> Result<IndexReport> {
        let started = Instant::now();
        let mut report = IndexReport::default();
        let doctype = self.catalog.doctype_of(doctype_or_table);
        self.index_one(&doctype, &mut report).await;
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    async fn index_one(&self, doctype: &str, report: &mut IndexReport) {
        let Some(table) = self.catalog.table_of(doctype) else {
            report.errors.push(format!("unknown doctype {doctype}"));
            return;
        };
        let table = table.to_string();
        let display_field = self.catalog.display_field_for(doctype);

        // gather grouped text blocks
        let mut groups: Vec<(String, Vec<String>, String)> = Vec::new();
        let mut ids: Vec<String> = Vec::new();
        let mut texts: Vec<String> = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = match self.sql.fetch_page(&table, offset, self.batch_size as u64).await {
                Ok(page) => page,
                Err(e) => {
                    report.errors.push(format!("fetch {table} at {offset}: {e}"));
                    return;
                }
            };
            if page.is_empty() {
                break;
            }
            offset += page.len() as u64;

            for record in &page {
                let Some(id) = record.get("name").and_then(|v| v.as_str()) else {
                    continue;
                };
                ids.push(id.to_string());
                texts.push(record_to_text(doctype, display_field, record));
                if ids.len() == GROUP_RECORDS {
                    groups.push(flush_group(doctype, &mut ids, &mut texts));
                }
            }
        }
        if !ids.is_empty() {
            groups.push(flush_group(doctype, &mut ids, &mut texts));
        }
        if groups.is_empty() {
            report.vectors.insert(doctype.to_string(), 0);
            report.records.insert(doctype.to_string(), 0);
            return;
        }

        // embed and upsert
        let mut upserted = 0u64;
        let mut covered = 0u64;
        for chunk in groups.chunks(EMBED_BATCH) {
            let inputs: Vec<String> = chunk.iter().map(|(_, _, text)| text.clone()).collect();
            let embeddings = match self.embedder.embed_batch(&inputs).await {
                Ok(embeddings) => embeddings,
                Err(e) => {
                    report.errors.push(format!("embed {doctype}: {e}"));
                    continue;
                }
            };
            if embeddings.len() != chunk.len() {
                report.errors.push(format!(
                    "embed {doctype}: got {} embeddings for {} inputs",
                    embeddings.len(),
                    chunk.len()
                ));
                continue;
            }

            let vectors: Vec<VectorRecord> = chunk
                .iter()
                .zip(embeddings)
                .map(|((id, record_ids, _), values)| VectorRecord {
                    id: id.clone(),
                    values,
                    metadata: json!({ "doctype": doctype, "record_ids": record_ids }),
                })
                .collect();
            let record_count: u64 = chunk.iter().map(|(_, ids, _)| ids.len() as u64).sum();

            match self.index.upsert(doctype, vectors).await {
                Ok(count) => {
                    upserted += count as u64;
                    covered += record_count;
                }
                Err(e) => report.errors.push(format!("upsert {doctype}: {e}")),
            }
        }

        tracing::info!(%doctype, vectors = upserted, records = covered, "indexed doctype");
        report.vectors.insert(doctype.to_string(), upserted);
        report.records.insert(doctype.to_string(), covered);
    }
}

fn flush_group(
    doctype: &str,
    ids: &mut Vec<String>,
    texts: &mut Vec<String>,
) -> (String, Vec<String>, String) {
    let record_ids = std::mem::take(ids);
    let text = std::mem::take(texts).join("\n\n");
    let id = format!("{doctype}::{}", record_ids[0]);
    (id, record_ids, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::sample_catalog;
    use crate::stores::{SqliteStore, VectorMatch};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; 3])
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; 3]).collect())
        }
        fn dimensions(&self) -> usize {
            3
        }
    }

    #[derive(Default)]
    struct RecordingIndex {
        upserts: Mutex<Vec<(String, Vec<VectorRecord>)>>,
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn query(
            &self,
            _vector: &[f32],
            _top_k: usize,
            _namespace: &str,
        ) -> Result<Vec<VectorMatch>> {
            Ok(Vec::new())
        }
        async fn upsert(&self, namespace: &str, vectors: Vec<VectorRecord>) -> Result<usize> {
            let count = vectors.len();
            self.upserts
                .lock()
                .unwrap()
                .push((namespace.to_string(), vectors));
            Ok(count)
        }
    }

    fn video_store() -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_batch(
                r#"
                CREATE TABLE "tabStudent" (name TEXT, name1 TEXT, grade TEXT, school TEXT, status TEXT);
                CREATE TABLE "tabSchool" (name TEXT, name1 TEXT, city TEXT);
                CREATE TABLE "tabCourse Video" (name TEXT, video_name TEXT, difficulty_tier TEXT, link TEXT);
                INSERT INTO "tabCourse Video" VALUES
                    ('CV-001', 'Needs First, Wants Later', 'Basic', 'https://v/1'),
                    ('CV-002', 'Budgeting Deep Dive', 'Advanced', 'https://v/2');
                "#,
            )
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_index_doctype_groups_and_upserts() {
        let index = Arc::new(RecordingIndex::default());
        let indexer = VectorIndexer::new(
            Arc::new(FixedEmbedder),
            Arc::clone(&index) as Arc<dyn VectorIndex>,
            video_store(),
            Arc::new(sample_catalog()),
            50,
        );

        let report = indexer.index_doctype("Course Video").await.unwrap();
        assert_eq!(report.vectors["Course Video"], 1); // both rows fit one group
        assert_eq!(report.records["Course Video"], 2);
        assert!(report.errors.is_empty());

        let upserts = index.upserts.lock().unwrap();
        assert_eq!(upserts.len(), 1);
        let (namespace, vectors) = &upserts[0];
        assert_eq!(namespace, "Course Video");
        assert_eq!(vectors[0].id, "Course Video::CV-001");
        assert_eq!(
            vectors[0].metadata["record_ids"],
            json!(["CV-001", "CV-002"])
        );
    }

    #[tokio::test]
    async fn test_index_all_covers_empty_tables() {
        let index = Arc::new(RecordingIndex::default());
        let indexer = VectorIndexer::new(
            Arc::new(FixedEmbedder),
            index,
            video_store(),
            Arc::new(sample_catalog()),
            50,
        );

        let report = indexer.index_all().await.unwrap();
        assert_eq!(report.vectors["Student"], 0);
        assert_eq!(report.vectors["Course Video"], 1);
    }
}
