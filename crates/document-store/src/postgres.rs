use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    Document, DocumentId, DocumentStoreError, Result, Version,
    store::{Change, ChangeKind, ChangeSet, DocumentStore},
};

/// PostgreSQL-backed document store implementation.
///
/// Documents live in a single `documents` table keyed by id. Every change
/// set is committed in one transaction; version checks are enforced by the
/// `WHERE version = $n` clause of each statement.
#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Creates a new PostgreSQL document store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_document(row: PgRow) -> Result<Document> {
        Ok(Document {
            id: DocumentId::new(row.try_get::<String, _>("id")?)?,
            version: Version::new(row.try_get("version")?),
            last_modified: row.try_get("last_modified")?,
            body: row.try_get("body")?,
        })
    }

    async fn current_version(
        tx: &mut Transaction<'_, Postgres>,
        id: &DocumentId,
    ) -> Result<Version> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM documents WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&mut **tx)
            .await?;
        Ok(version.map(Version::new).unwrap_or(Version::initial()))
    }

    async fn conflict(
        tx: &mut Transaction<'_, Postgres>,
        id: &DocumentId,
        expected: Version,
    ) -> DocumentStoreError {
        match Self::current_version(tx, id).await {
            Ok(actual) => DocumentStoreError::ConcurrencyConflict {
                document_id: id.clone(),
                expected,
                actual,
            },
            Err(e) => e,
        }
    }

    async fn apply_put(
        tx: &mut Transaction<'_, Postgres>,
        change: &Change,
        body: &serde_json::Value,
    ) -> Result<Version> {
        let now = Utc::now();
        let version: Option<i64> = match change.expected_version {
            None => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO documents (id, collection, version, last_modified, body)
                    VALUES ($1, $2, 1, $3, $4)
                    ON CONFLICT (id) DO UPDATE SET
                        version = documents.version + 1,
                        last_modified = EXCLUDED.last_modified,
                        body = EXCLUDED.body
                    RETURNING version
                    "#,
                )
                .bind(change.id.as_str())
                .bind(change.id.collection())
                .bind(now)
                .bind(body)
                .fetch_optional(&mut **tx)
                .await?
            }
            Some(expected) if expected.is_initial() => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO documents (id, collection, version, last_modified, body)
                    VALUES ($1, $2, 1, $3, $4)
                    ON CONFLICT (id) DO NOTHING
                    RETURNING version
                    "#,
                )
                .bind(change.id.as_str())
                .bind(change.id.collection())
                .bind(now)
                .bind(body)
                .fetch_optional(&mut **tx)
                .await?
            }
            Some(expected) => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    UPDATE documents
                    SET version = version + 1, last_modified = $2, body = $3
                    WHERE id = $1 AND version = $4
                    RETURNING version
                    "#,
                )
                .bind(change.id.as_str())
                .bind(now)
                .bind(body)
                .bind(expected.as_i64())
                .fetch_optional(&mut **tx)
                .await?
            }
        };

        match version {
            Some(version) => Ok(Version::new(version)),
            None => Err(Self::conflict(
                tx,
                &change.id,
                change.expected_version.unwrap_or(Version::initial()),
            )
            .await),
        }
    }

    async fn apply_delete(tx: &mut Transaction<'_, Postgres>, change: &Change) -> Result<()> {
        match change.expected_version {
            None => {
                sqlx::query("DELETE FROM documents WHERE id = $1")
                    .bind(change.id.as_str())
                    .execute(&mut **tx)
                    .await?;
            }
            Some(expected) if expected.is_initial() => {
                let actual = Self::current_version(tx, &change.id).await?;
                if !actual.is_initial() {
                    return Err(DocumentStoreError::ConcurrencyConflict {
                        document_id: change.id.clone(),
                        expected,
                        actual,
                    });
                }
            }
            Some(expected) => {
                let result = sqlx::query("DELETE FROM documents WHERE id = $1 AND version = $2")
                    .bind(change.id.as_str())
                    .bind(expected.as_i64())
                    .execute(&mut **tx)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(Self::conflict(tx, &change.id, expected).await);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn load(&self, id: &DocumentId) -> Result<Option<Document>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, version, last_modified, body
            FROM documents
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_document).transpose()
    }

    async fn commit(&self, changes: ChangeSet) -> Result<Vec<(DocumentId, Version)>> {
        // Dropping the transaction on any early return rolls it back
        let mut tx = self.pool.begin().await?;

        let mut versions = Vec::with_capacity(changes.len());
        for change in &changes.changes {
            let version = match &change.kind {
                ChangeKind::Put(body) => Self::apply_put(&mut tx, change, body).await?,
                ChangeKind::Delete => {
                    Self::apply_delete(&mut tx, change).await?;
                    Version::initial()
                }
            };
            versions.push((change.id.clone(), version));
        }

        tx.commit().await?;
        Ok(versions)
    }
}
