//! SQLite-backed [`VectorStore`].
//!
//! Schema:
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `chunks` | id, parent, sequence index, content, metadata JSON, content hash |
//! | `chunks_fts` | FTS5 index over chunk content (BM25 via `rank`) |
//! | `chunk_vectors` | embedding per chunk as a little-endian f32 BLOB |
//!
//! Filters are translated into `json_extract` conditions over
//! `chunks.metadata_json` with bound parameters. Vector search loads the
//! filtered vectors and computes cosine similarity in Rust.
//!
//! Every write runs in one transaction, so `replace_parent` either swaps
//! a parent's chunks completely or leaves the old ones. The set of
//! filterable metadata keys is computed once and cached: upserts extend
//! it, deletes drop it so the next lookup rescans.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions,
};
use sqlx::{Row, Sqlite};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::RwLock;
use tracing::debug;

use ragloom_core::embedding::{blob_to_vec, cosine_similarity, terms, vec_to_blob};
use ragloom_core::filter::{FilterOp, FilterPredicate, FilterValue};
use ragloom_core::models::DataChunk;
use ragloom_core::store::{
    check_replacement, check_vector_count, rank_candidates, reserved_fields, ChunkCandidate,
    ChunkRecord, StoreResult, StoreStats, VectorStore,
};
use ragloom_core::StoreError;

type Query<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite implementation of [`VectorStore`].
pub struct SqliteStore {
    pool: SqlitePool,
    /// Distinct metadata keys; `None` until first computed or after a delete.
    fields: RwLock<Option<BTreeSet<String>>>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` in WAL mode.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(connection_err)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(connection_err)?;

        Ok(Self {
            pool,
            fields: RwLock::new(None),
        })
    }

    /// Create tables and indexes. Safe to run repeatedly.
    pub async fn init_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                parent_id TEXT NOT NULL,
                sequence_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                content_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(schema_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunk_vectors (
                chunk_id TEXT PRIMARY KEY,
                dims INTEGER NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(schema_err)?;

        // FTS5 CREATE is not idempotent natively, so we check first
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(schema_err)?;

        if !fts_exists {
            sqlx::query("CREATE VIRTUAL TABLE chunks_fts USING fts5(chunk_id UNINDEXED, content)")
                .execute(&self.pool)
                .await
                .map_err(schema_err)?;
        }

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_parent_id ON chunks(parent_id)")
            .execute(&self.pool)
            .await
            .map_err(schema_err)?;

        Ok(())
    }

    /// Release the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn write_chunks(
        &self,
        chunks: &[DataChunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(insert_err)?;
        write_rows(&mut *tx, chunks, vectors).await?;
        tx.commit().await.map_err(insert_err)?;
        self.note_keys(chunks);
        Ok(())
    }

    fn cached_fields(&self) -> Option<BTreeSet<String>> {
        self.fields.read().ok().and_then(|f| f.clone())
    }

    /// Add the metadata keys of freshly written chunks to the cache.
    fn note_keys(&self, chunks: &[DataChunk]) {
        if let Ok(mut fields) = self.fields.write() {
            if let Some(set) = fields.as_mut() {
                for chunk in chunks {
                    set.extend(chunk.metadata_map().into_iter().map(|(k, _)| k));
                }
            }
        }
    }

    fn forget_keys(&self) {
        if let Ok(mut fields) = self.fields.write() {
            *fields = None;
        }
    }
}

/// Insert or overwrite chunk rows, FTS rows and vectors on `conn`.
async fn write_rows(
    conn: &mut SqliteConnection,
    chunks: &[DataChunk],
    vectors: Option<&[Vec<f32>]>,
) -> StoreResult<()> {
    for (i, chunk) in chunks.iter().enumerate() {
        let metadata_json = serde_json::to_string(&chunk.metadata_map())
            .map_err(|e| StoreError::Insert(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO chunks (id, parent_id, sequence_index, content, metadata_json, content_hash)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                parent_id = excluded.parent_id,
                sequence_index = excluded.sequence_index,
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                content_hash = excluded.content_hash
            "#,
        )
        .bind(&chunk.chunk_id)
        .bind(&chunk.parent_id)
        .bind(chunk.sequence_index as i64)
        .bind(&chunk.content)
        .bind(&metadata_json)
        .bind(chunk.content_hash())
        .execute(&mut *conn)
        .await
        .map_err(insert_err)?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(&chunk.chunk_id)
            .execute(&mut *conn)
            .await
            .map_err(insert_err)?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, content) VALUES (?, ?)")
            .bind(&chunk.chunk_id)
            .bind(&chunk.content)
            .execute(&mut *conn)
            .await
            .map_err(insert_err)?;

        match vectors.and_then(|v| v.get(i)) {
            Some(vec) => {
                sqlx::query(
                    r#"
                    INSERT INTO chunk_vectors (chunk_id, dims, embedding)
                    VALUES (?, ?, ?)
                    ON CONFLICT(chunk_id) DO UPDATE SET
                        dims = excluded.dims,
                        embedding = excluded.embedding
                    "#,
                )
                .bind(&chunk.chunk_id)
                .bind(vec.len() as i64)
                .bind(vec_to_blob(vec))
                .execute(&mut *conn)
                .await
                .map_err(insert_err)?;
            }
            None => {
                sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
                    .bind(&chunk.chunk_id)
                    .execute(&mut *conn)
                    .await
                    .map_err(insert_err)?;
            }
        }
    }
    Ok(())
}

/// Delete a parent's vectors, FTS rows and chunks on `conn`.
async fn delete_parent_rows(conn: &mut SqliteConnection, parent_id: &str) -> sqlx::Result<u64> {
    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE parent_id = ?)",
    )
    .bind(parent_id)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE parent_id = ?)",
    )
    .bind(parent_id)
    .execute(&mut *conn)
    .await?;
    let result = sqlx::query("DELETE FROM chunks WHERE parent_id = ?")
        .bind(parent_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, chunk: &DataChunk, vector: Option<&[f32]>) -> StoreResult<()> {
        let vectors = vector.map(|v| vec![v.to_vec()]);
        self.write_chunks(std::slice::from_ref(chunk), vectors.as_deref())
            .await
    }

    async fn upsert_batch(
        &self,
        chunks: &[DataChunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> StoreResult<()> {
        check_vector_count(chunks, vectors)?;
        self.write_chunks(chunks, vectors).await
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> StoreResult<Vec<ChunkCandidate>> {
        let mut params = Vec::new();
        let mut sql = String::from(
            r#"
            SELECT c.id, c.content, c.metadata_json, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            "#,
        );
        if let Some(f) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter_sql(f, &mut params));
        }

        let rows = bind_all(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;

        let candidates: Vec<ChunkCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                candidate_from_row(row, cosine_similarity(query_vec, &vec) as f64)
            })
            .collect();

        debug!(scanned = candidates.len(), "sqlite vector search");
        Ok(rank_candidates(candidates, top_k))
    }

    async fn keyword_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&FilterPredicate>,
    ) -> StoreResult<Vec<ChunkCandidate>> {
        let Some(fts_query) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        let mut params = vec![SqlParam::Text(fts_query)];
        let mut sql = String::from(
            r#"
            SELECT c.id, c.content, c.metadata_json, chunks_fts.rank AS rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?
            "#,
        );
        if let Some(f) = filter {
            sql.push_str(" AND ");
            sql.push_str(&filter_sql(f, &mut params));
        }
        sql.push_str(" ORDER BY rank, c.id LIMIT ?");
        params.push(SqlParam::Int(top_k as i64));

        let rows = bind_all(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;

        let candidates = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                // negate so higher = better
                candidate_from_row(row, -rank)
            })
            .collect();
        Ok(rank_candidates(candidates, top_k))
    }

    async fn delete(&self, chunk_id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(delete_err)?;
        sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut *tx)
            .await
            .map_err(delete_err)?;
        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&mut *tx)
            .await
            .map_err(delete_err)?;
        let result = sqlx::query("DELETE FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .execute(&mut *tx)
            .await
            .map_err(delete_err)?;
        tx.commit().await.map_err(delete_err)?;
        self.forget_keys();
        Ok(result.rows_affected() > 0)
    }

    async fn delete_parent(&self, parent_id: &str) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await.map_err(delete_err)?;
        let removed = delete_parent_rows(&mut *tx, parent_id)
            .await
            .map_err(delete_err)?;
        tx.commit().await.map_err(delete_err)?;
        self.forget_keys();
        Ok(removed as usize)
    }

    async fn replace_parent(
        &self,
        parent_id: &str,
        chunks: &[DataChunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> StoreResult<usize> {
        check_replacement(parent_id, chunks, vectors)?;
        let mut tx = self.pool.begin().await.map_err(insert_err)?;
        let removed = delete_parent_rows(&mut *tx, parent_id)
            .await
            .map_err(insert_err)?;
        // dropping `tx` on error rolls back, keeping the old rows
        write_rows(&mut *tx, chunks, vectors).await?;
        tx.commit().await.map_err(insert_err)?;
        if removed > 0 {
            self.forget_keys();
        } else {
            self.note_keys(chunks);
        }
        Ok(removed as usize)
    }

    async fn get(&self, chunk_id: &str) -> StoreResult<Option<ChunkRecord>> {
        let row = sqlx::query(
            r#"
            SELECT c.id, c.parent_id, c.sequence_index, c.content, c.metadata_json, c.content_hash,
                   EXISTS(SELECT 1 FROM chunk_vectors cv WHERE cv.chunk_id = c.id) AS has_vector
            FROM chunks c
            WHERE c.id = ?
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)?;

        Ok(row.map(|row| {
            let sequence_index: i64 = row.get("sequence_index");
            let metadata_json: String = row.get("metadata_json");
            let has_vector: i64 = row.get("has_vector");
            ChunkRecord {
                chunk_id: row.get("id"),
                parent_id: row.get("parent_id"),
                sequence_index: sequence_index as usize,
                content: row.get("content"),
                metadata: parse_metadata(&metadata_json),
                content_hash: row.get("content_hash"),
                has_vector: has_vector != 0,
            }
        }))
    }

    async fn indexed_fields(&self) -> StoreResult<BTreeSet<String>> {
        if let Some(fields) = self.cached_fields() {
            return Ok(fields);
        }
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT j.key FROM chunks, json_each(chunks.metadata_json) AS j",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;
        let mut fields = reserved_fields();
        fields.extend(keys);
        debug!(fields = fields.len(), "scanned metadata keys");
        if let Ok(mut cache) = self.fields.write() {
            *cache = Some(fields.clone());
        }
        Ok(fields)
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM chunks) AS chunks,
                (SELECT COUNT(*) FROM chunk_vectors) AS vectors,
                (SELECT COUNT(DISTINCT parent_id) FROM chunks) AS parents
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(query_err)?;
        let chunks: i64 = row.get("chunks");
        let vectors: i64 = row.get("vectors");
        let parents: i64 = row.get("parents");
        Ok(StoreStats {
            chunks: chunks as usize,
            vectors: vectors as usize,
            parents: parents as usize,
        })
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(delete_err)?;
        for table in ["chunk_vectors", "chunks_fts", "chunks"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await
                .map_err(delete_err)?;
        }
        tx.commit().await.map_err(delete_err)?;
        self.forget_keys();
        Ok(())
    }
}

/// A bound SQL parameter produced while translating a filter.
#[derive(Debug, Clone, PartialEq)]
enum SqlParam {
    Text(String),
    Int(i64),
    Real(f64),
}

impl SqlParam {
    fn from_value(value: &FilterValue) -> Self {
        match value {
            FilterValue::String(s) => SqlParam::Text(s.clone()),
            FilterValue::Integer(i) => SqlParam::Int(*i),
            FilterValue::Float(f) => SqlParam::Real(*f),
            FilterValue::Bool(b) => SqlParam::Int(*b as i64),
            // lists never reach a scalar slot after FilterBuilder::build
            FilterValue::List(_) => SqlParam::Text(String::new()),
        }
    }
}

fn bind_all<'q>(mut query: Query<'q>, params: &[SqlParam]) -> Query<'q> {
    for p in params {
        query = match p {
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Real(f) => query.bind(*f),
        };
    }
    query
}

/// Translate a predicate into a SQL condition over `c.metadata_json`,
/// appending its parameters to `params` in placeholder order.
fn filter_sql(predicate: &FilterPredicate, params: &mut Vec<SqlParam>) -> String {
    match predicate {
        FilterPredicate::Condition { field, op } => {
            params.push(SqlParam::Text(json_path(field)));
            let column = "json_extract(c.metadata_json, ?)";
            match op {
                FilterOp::Equals(v) => {
                    params.push(SqlParam::from_value(v));
                    format!("{} = ?", column)
                }
                FilterOp::Range { min, max } => {
                    params.push(SqlParam::from_value(min));
                    params.push(SqlParam::from_value(max));
                    format!("{} BETWEEN ? AND ?", column)
                }
                FilterOp::OneOf(values) => {
                    params.extend(values.iter().map(SqlParam::from_value));
                    let marks = vec!["?"; values.len()].join(", ");
                    format!("{} IN ({})", column, marks)
                }
            }
        }
        FilterPredicate::And(children) => join_sql(children, " AND ", params),
        FilterPredicate::Or(children) => join_sql(children, " OR ", params),
    }
}

fn join_sql(children: &[FilterPredicate], sep: &str, params: &mut Vec<SqlParam>) -> String {
    let parts: Vec<String> = children.iter().map(|c| filter_sql(c, params)).collect();
    format!("({})", parts.join(sep))
}

fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', ""))
}

/// Quote each term so FTS5 operators in user input are inert.
fn fts_match_expression(query: &str) -> Option<String> {
    let quoted: Vec<String> = terms(query).map(|t| format!("\"{}\"", t)).collect();
    if quoted.is_empty() {
        None
    } else {
        Some(quoted.join(" OR "))
    }
}

fn parse_metadata(json: &str) -> Map<String, Value> {
    serde_json::from_str(json).unwrap_or_default()
}

fn candidate_from_row(row: &sqlx::sqlite::SqliteRow, raw_score: f64) -> ChunkCandidate {
    let metadata_json: String = row.get("metadata_json");
    ChunkCandidate {
        chunk_id: row.get("id"),
        content: row.get("content"),
        metadata: parse_metadata(&metadata_json),
        raw_score,
    }
}

fn connection_err(e: sqlx::Error) -> StoreError {
    StoreError::Connection(e.to_string())
}

fn schema_err(e: sqlx::Error) -> StoreError {
    StoreError::Schema(e.to_string())
}

fn insert_err(e: sqlx::Error) -> StoreError {
    StoreError::Insert(e.to_string())
}

fn query_err(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn delete_err(e: sqlx::Error) -> StoreError {
    StoreError::Delete(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragloom_core::chunk::DataChunker;
    use ragloom_core::context::ChunkingContextBuilder;
    use ragloom_core::filter::FilterBuilder;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("data/loom.sqlite"))
            .await
            .unwrap();
        store.init_schema().await.unwrap();
        (tmp, store)
    }

    fn chunk(parent: &str, text: &str, page: u32) -> DataChunk {
        let ctx = ChunkingContextBuilder::for_text()
            .with_parent_id(parent)
            .with_page(page)
            .build()
            .unwrap();
        DataChunker::new().chunk(text, &ctx).unwrap().remove(0)
    }

    #[test]
    fn test_fts_expression_quotes_terms() {
        assert_eq!(
            fts_match_expression("budget AND \"review\" -x").as_deref(),
            Some("\"budget\" OR \"and\" OR \"review\" OR \"x\"")
        );
        assert!(fts_match_expression("  ** ").is_none());
    }

    #[test]
    fn test_filter_sql_binds_in_order() {
        let f = FilterBuilder::or(vec![
            FilterBuilder::equals("type", "text"),
            FilterBuilder::range("page_number", 1, 3),
        ])
        .unwrap()
        .build()
        .unwrap();
        let mut params = Vec::new();
        let sql = filter_sql(&f, &mut params);
        assert_eq!(
            sql,
            "(json_extract(c.metadata_json, ?) = ? OR json_extract(c.metadata_json, ?) BETWEEN ? AND ?)"
        );
        assert_eq!(
            params,
            vec![
                SqlParam::Text("$.\"type\"".to_string()),
                SqlParam::Text("text".to_string()),
                SqlParam::Text("$.\"page_number\"".to_string()),
                SqlParam::Int(1),
                SqlParam::Int(3),
            ]
        );
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let (_tmp, store) = open_temp().await;
        store.init_schema().await.unwrap();
        assert_eq!(store.stats().await.unwrap(), StoreStats::default());
        store.close().await;
    }

    #[tokio::test]
    async fn test_upsert_get_and_overwrite() {
        let (_tmp, store) = open_temp().await;
        let mut c = chunk("doc", "wavelet denoising", 2);
        store.upsert(&c, Some(&[0.1, 0.2])).await.unwrap();
        let got = store.get(&c.chunk_id).await.unwrap().unwrap();
        assert_eq!(got.content, "wavelet denoising");
        assert!(got.has_vector);
        assert_eq!(got.metadata["page_number"], 2);

        c.content = "fourier analysis".to_string();
        store.upsert(&c, None).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.vectors, 0);
        let hits = store.keyword_search("wavelet", 5, None).await.unwrap();
        assert!(hits.is_empty());
        let hits = store.keyword_search("fourier", 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].raw_score > 0.0);
    }

    #[tokio::test]
    async fn test_filtered_searches() {
        let (_tmp, store) = open_temp().await;
        let a = chunk("a", "budget review friday", 1);
        let b = chunk("b", "budget planning monday", 5);
        store.upsert(&a, Some(&[1.0, 0.0])).await.unwrap();
        store.upsert(&b, Some(&[0.0, 1.0])).await.unwrap();

        let late = FilterBuilder::range("page_number", 3, 10).build().unwrap();
        let hits = store.keyword_search("budget", 5, Some(&late)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, b.chunk_id);

        let hits = store
            .vector_search(&[1.0, 0.0], 5, Some(&late))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, b.chunk_id);

        let hits = store.vector_search(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits[0].chunk_id, a.chunk_id);
    }

    #[tokio::test]
    async fn test_delete_parent_clear_and_fields() {
        let (_tmp, store) = open_temp().await;
        store.upsert(&chunk("a", "one", 1), None).await.unwrap();
        store.upsert(&chunk("b", "two", 1), None).await.unwrap();
        assert!(store.indexed_fields().await.unwrap().contains("page_number"));

        assert_eq!(store.delete_parent("a").await.unwrap(), 1);
        assert_eq!(store.stats().await.unwrap().parents, 1);
        assert!(store.keyword_search("one", 5, None).await.unwrap().is_empty());

        store.clear().await.unwrap();
        assert_eq!(store.stats().await.unwrap().chunks, 0);
    }

    #[tokio::test]
    async fn test_replace_parent_swaps_in_one_step() {
        let (_tmp, store) = open_temp().await;
        let old = chunk("doc", "old wording", 1);
        store.upsert(&old, Some(&[1.0, 0.0])).await.unwrap();
        store.upsert(&chunk("other", "untouched", 1), None).await.unwrap();

        let new = chunk("doc", "new wording", 2);
        let removed = store
            .replace_parent("doc", std::slice::from_ref(&new), None)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&old.chunk_id).await.unwrap().is_none());
        assert_eq!(store.get(&new.chunk_id).await.unwrap().unwrap().content, "new wording");
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.vectors, 0);
        assert!(store.keyword_search("old", 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_replace_rolls_back() {
        let (_tmp, store) = open_temp().await;
        let old = chunk("doc", "survivor text", 1);
        store.upsert(&old, Some(&[1.0, 0.0])).await.unwrap();

        // Break the FTS step so the transaction fails after deleting vectors.
        sqlx::query("DROP TABLE chunks_fts")
            .execute(&store.pool)
            .await
            .unwrap();
        let new = chunk("doc", "replacement", 1);
        let err = store
            .replace_parent("doc", std::slice::from_ref(&new), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Insert(_)));

        let got = store.get(&old.chunk_id).await.unwrap().unwrap();
        assert_eq!(got.content, "survivor text");
        assert!(got.has_vector);
        assert!(store.get(&new.chunk_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_indexed_fields_cache_tracks_writes() {
        let (_tmp, store) = open_temp().await;
        store.upsert(&chunk("a", "one", 1), None).await.unwrap();
        let fields = store.indexed_fields().await.unwrap();
        assert!(fields.contains("page_number"));
        assert!(!fields.contains("author"));
        assert!(store.cached_fields().is_some());

        let ctx = ChunkingContextBuilder::for_text()
            .with_parent_id("b")
            .with_metadata("author", "noether")
            .build()
            .unwrap();
        let authored = DataChunker::new().chunk("rings", &ctx).unwrap();
        store.upsert_batch(&authored, None).await.unwrap();
        assert!(store.indexed_fields().await.unwrap().contains("author"));

        store.delete_parent("b").await.unwrap();
        assert!(store.cached_fields().is_none());
        assert!(!store.indexed_fields().await.unwrap().contains("author"));
    }
}
