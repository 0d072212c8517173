use std::sync::Arc;

use async_trait::async_trait;
use entity::{job_application, prelude::*};
use sea_orm::{
    sea_query::OnConflict, ActiveValue, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait,
};

use super::record::ExtractedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// A row with the same external id was already there and was left alone
    AlreadyPresent,
}

#[async_trait]
pub trait JobApplicationStore: Send + Sync {
    async fn upsert(&self, record: &ExtractedRecord) -> Result<UpsertOutcome, DbErr>;
}

pub struct JobApplicationCtrl;

impl JobApplicationCtrl {
    /// Single `INSERT .. ON CONFLICT (external_id) DO NOTHING`. The first
    /// write for an id wins; `processed_at` is assigned by the database.
    pub async fn insert_if_absent<C: ConnectionTrait>(
        conn: &C,
        record: &ExtractedRecord,
    ) -> Result<UpsertOutcome, DbErr> {
        let job_application = job_application::ActiveModel {
            id: ActiveValue::NotSet,
            external_id: ActiveValue::Set(record.external_id.clone()),
            sender: ActiveValue::Set(record.sender.clone()),
            subject: ActiveValue::Set(record.subject.clone()),
            extracted_type: ActiveValue::Set(record.kind.clone()),
            company: ActiveValue::Set(record.company.clone()),
            role: ActiveValue::Set(record.role.clone()),
            event_date: ActiveValue::Set(record.event_date),
            days_since: ActiveValue::Set(record.days_since),
            processed_at: ActiveValue::NotSet,
            raw_extraction: ActiveValue::Set(record.raw_extraction.clone()),
        };

        let rows_affected = JobApplication::insert(job_application)
            .on_conflict(
                OnConflict::column(job_application::Column::ExternalId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        Ok(match rows_affected {
            0 => UpsertOutcome::AlreadyPresent,
            _ => UpsertOutcome::Inserted,
        })
    }

    pub async fn count<C: ConnectionTrait>(conn: &C) -> Result<u64, DbErr> {
        JobApplication::find().count(conn).await
    }
}

/// Store backed by the `job_application` table
pub struct DbStore {
    conn: Arc<DatabaseConnection>,
}

impl DbStore {
    pub fn new(conn: Arc<DatabaseConnection>) -> Self {
        DbStore { conn }
    }
}

#[async_trait]
impl JobApplicationStore for DbStore {
    async fn upsert(&self, record: &ExtractedRecord) -> Result<UpsertOutcome, DbErr> {
        JobApplicationCtrl::insert_if_absent(self.conn.as_ref(), record).await
    }
}
