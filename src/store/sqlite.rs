use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::{Demonstration, Program, StoreError, BASE_INSTRUCTION};

const CREATE_PROGRAM_TABLE: &str = "CREATE TABLE IF NOT EXISTS program ( \
    id INTEGER PRIMARY KEY AUTOINCREMENT, \
    parent_id INTEGER, \
    instruction TEXT NOT NULL, \
    demonstrations TEXT NOT NULL, \
    created_at INTEGER NOT NULL, \
    score REAL )";

/// Versioned, append-only program records. The autoincrement rowid is the
/// monotonic version id; allocation happens inside the single INSERT, so two
/// concurrent `create` calls can never observe the same id.
pub(crate) struct ProgramStore {
    pool: SqlitePool,
}

impl ProgramStore {
    pub(crate) async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(CREATE_PROGRAM_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub(crate) async fn create(
        &self,
        instruction: &str,
        demonstrations: &[Demonstration],
        parent_id: Option<i64>,
        score: Option<f64>,
    ) -> Result<Program, StoreError> {
        let demonstrations_json = serde_json::to_string(demonstrations)?;
        let created_at = Utc::now();

        let row = sqlx::query(
            "INSERT INTO program (parent_id, instruction, demonstrations, created_at, score) \
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(parent_id)
        .bind(instruction)
        .bind(&demonstrations_json)
        .bind(created_at.timestamp_millis())
        .bind(score)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Database(e),
        })?;

        let id = row.get::<i64, _>("id");
        log::info!("Created program version {id} (parent: {parent_id:?}, score: {score:?})");

        Ok(Program {
            id,
            parent_id,
            instruction: instruction.to_string(),
            demonstrations: demonstrations.to_vec(),
            created_at,
            score,
        })
    }

    pub(crate) async fn get(&self, id: i64) -> Result<Program, StoreError> {
        let row = sqlx::query(
            "SELECT id, parent_id, instruction, demonstrations, created_at, score \
             FROM program WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        Self::program_from_row(row)
    }

    /// All programs in creation order.
    pub(crate) async fn list(&self) -> Result<Vec<Program>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, parent_id, instruction, demonstrations, created_at, score \
             FROM program ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::program_from_row).collect()
    }

    /// Guarantees version 1 exists so classification and optimization always
    /// have a base program to start from.
    pub(crate) async fn ensure_base_program(&self) -> Result<Program, StoreError> {
        match self.list().await?.into_iter().next() {
            Some(program) => Ok(program),
            None => self.create(BASE_INSTRUCTION, &[], None, None).await,
        }
    }

    fn program_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Program, StoreError> {
        let id = row.get::<i64, _>("id");
        let demonstrations =
            serde_json::from_str::<Vec<Demonstration>>(&row.get::<String, _>("demonstrations"))?;
        let created_at = DateTime::from_timestamp_millis(row.get::<i64, _>("created_at"))
            .ok_or(StoreError::CorruptRecord(id))?;

        Ok(Program {
            id,
            parent_id: row.get::<Option<i64>, _>("parent_id"),
            instruction: row.get::<String, _>("instruction"),
            demonstrations,
            created_at,
            score: row.get::<Option<f64>, _>("score"),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::Provenance;
    use crate::test_data::memory_pool;

    #[tokio::test]
    async fn version_ids_are_monotonic_and_content_immutable() {
        let store = ProgramStore::new(memory_pool().await).await.unwrap();

        let demos = vec![Demonstration {
            input: "My card got stuck".to_string(),
            label: "card_swallowed".to_string(),
            provenance: Provenance::Seed,
            reasoning: None,
        }];

        let first = store.create("Classify the query.", &demos, None, None).await.unwrap();
        let second = store
            .create("Classify the query.", &demos, Some(first.id), Some(0.5))
            .await
            .unwrap();

        assert!(second.id > first.id);

        // Duplicate content under a distinct id is allowed, no deduplication.
        let third = store.create("Classify the query.", &demos, None, None).await.unwrap();
        assert!(third.id > second.id);

        let loaded_a = store.get(first.id).await.unwrap();
        let loaded_b = store.get(first.id).await.unwrap();
        assert_eq!(loaded_a, loaded_b);
        assert_eq!(loaded_a.instruction, "Classify the query.");
        assert_eq!(loaded_a.demonstrations, demos);

        let all = store.list().await.unwrap();
        assert_eq!(
            all.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![first.id, second.id, third.id]
        );
    }

    #[test]
    fn version_collision_error_has_a_fixed_message() {
        assert_eq!(
            StoreError::Conflict.to_string(),
            "StoreError: Version id collision"
        );
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let store = ProgramStore::new(memory_pool().await).await.unwrap();
        match store.get(99).await {
            Err(StoreError::NotFound(99)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn base_program_is_created_once() {
        let store = ProgramStore::new(memory_pool().await).await.unwrap();
        let base = store.ensure_base_program().await.unwrap();
        assert_eq!(base.instruction, BASE_INSTRUCTION);
        assert!(base.demonstrations.is_empty());

        let again = store.ensure_base_program().await.unwrap();
        assert_eq!(again.id, base.id);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
