//! SQLite-backed [`DocumentStore`] implementation.
//!
//! One `documents` table holds every keyspace; vectors are little-endian
//! `f32` BLOBs. Vector search loads the indexed column for the keyspace and
//! ranks it in process by cosine similarity.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::migrate;
use crate::models::{EnrichedDocument, SearchHit};

use super::{
    check_search, rank, reconcile_index, Candidate, DocumentStore, IndexStatus, Keyspace,
    VectorIndex,
};

/// SQLite implementation of the [`DocumentStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn connect(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Names of every provisioned keyspace.
    pub async fn keyspaces(&self) -> Result<Vec<Keyspace>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM keyspaces ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        names.iter().map(|n| n.parse()).collect()
    }

    async fn require_keyspace(&self, keyspace: &Keyspace) -> Result<()> {
        let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM keyspaces WHERE name = ?")
            .bind(keyspace.to_string())
            .fetch_one(&self.pool)
            .await?;
        if found == 0 {
            bail!("keyspace not found: {}", keyspace);
        }
        Ok(())
    }

    async fn find_index(&self, keyspace: &Keyspace, name: &str) -> Result<Option<VectorIndex>> {
        let row = sqlx::query("SELECT name, field, dims FROM vector_indexes WHERE keyspace = ? AND name = ?")
            .bind(keyspace.to_string())
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| index_from_row(&r)))
    }
}

fn index_from_row(row: &sqlx::sqlite::SqliteRow) -> VectorIndex {
    VectorIndex {
        name: row.get("name"),
        field: row.get("field"),
        dims: row.get::<i64, _>("dims") as usize,
    }
}

/// Column holding a vector field. Only known fields map to a column.
fn vector_column(field: &str) -> Result<&'static str> {
    match field {
        "image_embedding" => Ok("image_embedding"),
        "text_embedding" => Ok("text_embedding"),
        other => Err(anyhow!("not a vector field: {}", other)),
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn ensure_keyspace(&self, keyspace: &Keyspace) -> Result<()> {
        sqlx::query("INSERT INTO keyspaces (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(keyspace.to_string())
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert(&self, keyspace: &Keyspace, doc: &EnrichedDocument) -> Result<()> {
        self.require_keyspace(keyspace).await?;

        sqlx::query(
            r#"
            INSERT INTO documents (keyspace, id, title, release_date, popularity, imdb_id,
                                   overview, poster_path, backdrop_path, embedding_model,
                                   image_embedding, text_embedding, dims, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(keyspace, id) DO UPDATE SET
                title = excluded.title,
                release_date = excluded.release_date,
                popularity = excluded.popularity,
                imdb_id = excluded.imdb_id,
                overview = excluded.overview,
                poster_path = excluded.poster_path,
                backdrop_path = excluded.backdrop_path,
                embedding_model = excluded.embedding_model,
                image_embedding = excluded.image_embedding,
                text_embedding = excluded.text_embedding,
                dims = excluded.dims,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(keyspace.to_string())
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(&doc.release_date)
        .bind(doc.popularity)
        .bind(&doc.imdb_id)
        .bind(&doc.overview)
        .bind(&doc.poster_path)
        .bind(&doc.backdrop_path)
        .bind(&doc.embedding_model)
        .bind(vec_to_blob(&doc.image_embedding))
        .bind(doc.text_embedding.as_deref().map(vec_to_blob))
        .bind(doc.image_embedding.len() as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, keyspace: &Keyspace, id: &str) -> Result<Option<EnrichedDocument>> {
        self.require_keyspace(keyspace).await?;

        let row = sqlx::query(
            r#"
            SELECT id, title, release_date, popularity, imdb_id, overview, poster_path,
                   backdrop_path, embedding_model, image_embedding, text_embedding
            FROM documents WHERE keyspace = ? AND id = ?
            "#,
        )
        .bind(keyspace.to_string())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let image: Vec<u8> = r.get("image_embedding");
            let text: Option<Vec<u8>> = r.get("text_embedding");
            EnrichedDocument {
                id: r.get("id"),
                title: r.get("title"),
                release_date: r.get("release_date"),
                popularity: r.get("popularity"),
                imdb_id: r.get("imdb_id"),
                overview: r.get("overview"),
                poster_path: r.get("poster_path"),
                backdrop_path: r.get("backdrop_path"),
                embedding_model: r.get("embedding_model"),
                image_embedding: blob_to_vec(&image),
                text_embedding: text.map(|b| blob_to_vec(&b)),
            }
        }))
    }

    async fn count(&self, keyspace: &Keyspace) -> Result<u64> {
        self.require_keyspace(keyspace).await?;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE keyspace = ?")
            .bind(keyspace.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn create_vector_index(
        &self,
        keyspace: &Keyspace,
        index: &VectorIndex,
    ) -> Result<IndexStatus> {
        self.require_keyspace(keyspace).await?;
        vector_column(&index.field)?;

        if let Some(existing) = self.find_index(keyspace, &index.name).await? {
            return reconcile_index(&existing, index);
        }

        let result = sqlx::query(
            "INSERT INTO vector_indexes (keyspace, name, field, dims, created_at) VALUES (?, ?, ?, ?, ?) ON CONFLICT(keyspace, name) DO NOTHING",
        )
        .bind(keyspace.to_string())
        .bind(&index.name)
        .bind(&index.field)
        .bind(index.dims as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Lost a race with a concurrent creator
            let existing = self
                .find_index(keyspace, &index.name)
                .await?
                .ok_or_else(|| anyhow!("vector index vanished: {}", index.name))?;
            return reconcile_index(&existing, index);
        }
        Ok(IndexStatus::Created)
    }

    async fn list_indexes(&self, keyspace: &Keyspace) -> Result<Vec<VectorIndex>> {
        self.require_keyspace(keyspace).await?;
        let rows = sqlx::query("SELECT name, field, dims FROM vector_indexes WHERE keyspace = ? ORDER BY name")
            .bind(keyspace.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(index_from_row).collect())
    }

    async fn vector_search(
        &self,
        keyspace: &Keyspace,
        index_name: &str,
        field: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.require_keyspace(keyspace).await?;
        let index = self
            .find_index(keyspace, index_name)
            .await?
            .ok_or_else(|| anyhow!("vector index not found: {}", index_name))?;
        check_search(&index, field, query)?;
        let column = vector_column(field)?;

        let sql = format!(
            "SELECT id, title, poster_path, {col} AS vector FROM documents WHERE keyspace = ? AND {col} IS NOT NULL",
            col = column
        );
        let rows = sqlx::query(&sql)
            .bind(keyspace.to_string())
            .fetch_all(&self.pool)
            .await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                Candidate {
                    id: row.get("id"),
                    title: row.get("title"),
                    poster_path: row.get("poster_path"),
                    vector: blob_to_vec(&blob),
                }
            })
            .collect();

        Ok(rank(candidates, query, limit))
    }
}
