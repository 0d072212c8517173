use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JobApplication::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobApplication::Id)
                            .integer()
                            .not_null()
                            .primary_key()
                            .auto_increment(),
                    )
                    .col(ColumnDef::new(JobApplication::ExternalId).text().not_null())
                    .col(ColumnDef::new(JobApplication::Sender).text().not_null())
                    .col(ColumnDef::new(JobApplication::Subject).text().not_null())
                    .col(
                        ColumnDef::new(JobApplication::ExtractedType)
                            .text()
                            .not_null()
                            .default("other"),
                    )
                    .col(
                        ColumnDef::new(JobApplication::Company)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(JobApplication::Role)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(JobApplication::EventDate).date())
                    .col(
                        ColumnDef::new(JobApplication::DaysSince)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(JobApplication::ProcessedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(JobApplication::RawExtraction)
                            .json_binary()
                            .not_null(),
                    )
                    .clone(),
            )
            .await?;

        // The upsert's ON CONFLICT target
        manager
            .create_index(
                Index::create()
                    .name("idx_job_application_external_id")
                    .if_not_exists()
                    .table(JobApplication::Table)
                    .col(JobApplication::ExternalId)
                    .unique()
                    .clone(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JobApplication::Table).clone())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum JobApplication {
    Table,
    Id,
    ExternalId,
    Sender,
    Subject,
    ExtractedType,
    Company,
    Role,
    EventDate,
    DaysSince,
    ProcessedAt,
    RawExtraction,
}
