use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS keyspaces (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            keyspace TEXT NOT NULL,
            id TEXT NOT NULL,
            title TEXT NOT NULL,
            release_date TEXT,
            popularity REAL,
            imdb_id TEXT,
            overview TEXT,
            poster_path TEXT,
            backdrop_path TEXT,
            embedding_model TEXT NOT NULL,
            image_embedding BLOB NOT NULL,
            text_embedding BLOB,
            dims INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (keyspace, id),
            FOREIGN KEY (keyspace) REFERENCES keyspaces(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_indexes (
            keyspace TEXT NOT NULL,
            name TEXT NOT NULL,
            field TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (keyspace, name),
            FOREIGN KEY (keyspace) REFERENCES keyspaces(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_updated_at ON documents(keyspace, updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
