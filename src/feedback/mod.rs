mod error;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::{
    dataset::LabeledExample,
    store::{Demonstration, Provenance},
};

pub(crate) use error::FeedbackError;

const CREATE_FEEDBACK_TABLE: &str = "CREATE TABLE IF NOT EXISTS feedback ( \
    id INTEGER PRIMARY KEY AUTOINCREMENT, \
    query TEXT NOT NULL, \
    predicted_label TEXT NOT NULL, \
    correct_label TEXT NOT NULL, \
    created_at INTEGER NOT NULL, \
    consumed INTEGER NOT NULL DEFAULT 0 )";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FeedbackRecord {
    pub(crate) id: i64,
    pub(crate) query: String,
    pub(crate) predicted_label: String,
    pub(crate) correct_label: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) consumed: bool,
}

impl FeedbackRecord {
    pub(crate) fn demonstration(&self) -> Demonstration {
        Demonstration {
            input: self.query.clone(),
            label: self.correct_label.clone(),
            provenance: Provenance::Feedback,
            reasoning: None,
        }
    }

    pub(crate) fn example(&self) -> LabeledExample {
        LabeledExample {
            text: self.query.clone(),
            label: self.correct_label.clone(),
        }
    }
}

/// Append-only log of user corrections. Records are claimed for one
/// optimization run by flipping their consumed flag; the flag is never unset.
pub(crate) struct FeedbackStore {
    pool: SqlitePool,
}

impl FeedbackStore {
    pub(crate) async fn new(pool: SqlitePool) -> Result<Self, FeedbackError> {
        sqlx::query(CREATE_FEEDBACK_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub(crate) async fn submit(
        &self,
        query: &str,
        predicted_label: &str,
        correct_label: &str,
    ) -> Result<FeedbackRecord, FeedbackError> {
        let created_at = Utc::now();
        let row = sqlx::query(
            "INSERT INTO feedback (query, predicted_label, correct_label, created_at) \
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(query)
        .bind(predicted_label)
        .bind(correct_label)
        .bind(created_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        let id = row.get::<i64, _>("id");
        log::info!("Recorded feedback {id}: {predicted_label} should have been {correct_label}");

        Ok(FeedbackRecord {
            id,
            query: query.to_string(),
            predicted_label: predicted_label.to_string(),
            correct_label: correct_label.to_string(),
            created_at,
            consumed: false,
        })
    }

    /// Claims every unconsumed record in one statement. The flag update and
    /// the read are the same UPDATE .. RETURNING, so two concurrent drains
    /// partition the backlog instead of double-counting it.
    pub(crate) async fn drain_unconsumed(&self) -> Result<Vec<FeedbackRecord>, FeedbackError> {
        let rows = sqlx::query(
            "UPDATE feedback SET consumed = 1 WHERE consumed = 0 \
             RETURNING id, query, predicted_label, correct_label, created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let id = row.get::<i64, _>("id");
                let created_at = DateTime::from_timestamp_millis(row.get::<i64, _>("created_at"))
                    .ok_or(FeedbackError::CorruptRecord(id))?;
                Ok(FeedbackRecord {
                    id,
                    query: row.get::<String, _>("query"),
                    predicted_label: row.get::<String, _>("predicted_label"),
                    correct_label: row.get::<String, _>("correct_label"),
                    created_at,
                    consumed: true,
                })
            })
            .collect()
    }

    pub(crate) async fn count_unconsumed(&self) -> Result<i64, FeedbackError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM feedback WHERE consumed = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_data::memory_pool;
    use std::sync::Arc;

    #[tokio::test]
    async fn drain_marks_consumed_and_is_empty_after() {
        let store = FeedbackStore::new(memory_pool().await).await.unwrap();
        store
            .submit("Can I cancel it?", "declined_card_payment", "cancel_transfer")
            .await
            .unwrap();
        store
            .submit("Where is my card?", "card_arrival", "card_arrival")
            .await
            .unwrap();

        assert_eq!(store.count_unconsumed().await.unwrap(), 2);

        let drained = store.drain_unconsumed().await.unwrap();
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|r| r.consumed));
        assert_eq!(drained[0].correct_label, "cancel_transfer");

        assert_eq!(store.count_unconsumed().await.unwrap(), 0);
        assert!(store.drain_unconsumed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_drains_never_share_a_record() {
        let store = Arc::new(FeedbackStore::new(memory_pool().await).await.unwrap());
        for i in 0..20 {
            store
                .submit(&format!("query {i}"), "a", "b")
                .await
                .unwrap();
        }

        let mut handles = vec![];
        for _ in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.drain_unconsumed().await.unwrap()
            }));
        }

        let mut seen = std::collections::HashSet::new();
        let mut total = 0usize;
        for handle in handles {
            for record in handle.await.unwrap() {
                total += 1;
                assert!(seen.insert(record.id), "record {} drained twice", record.id);
            }
        }
        assert_eq!(total, 20);
    }
}
