//! Create alarm_occurrence table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AlarmOccurrence::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AlarmOccurrence::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AlarmOccurrence::AlarmId).string().not_null())
                    .col(ColumnDef::new(AlarmOccurrence::Date).date().not_null())
                    .col(ColumnDef::new(AlarmOccurrence::Time).time().not_null())
                    .col(
                        ColumnDef::new(AlarmOccurrence::DeactivateType)
                            .string_len(16)
                            .not_null()
                            .default("NONE"),
                    )
                    .col(
                        ColumnDef::new(AlarmOccurrence::DeactivatedAt)
                            .timestamp()
                            .null(),
                    )
                    .col(ColumnDef::new(AlarmOccurrence::CheckedInAt).timestamp().null())
                    .col(
                        ColumnDef::new(AlarmOccurrence::IsRinging)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(AlarmOccurrence::RingCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AlarmOccurrence::PreAlertSentAt)
                            .timestamp()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AlarmOccurrence::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_alarm_occurrence_alarm")
                            .from(AlarmOccurrence::Table, AlarmOccurrence::AlarmId)
                            .to(Alarm::Table, Alarm::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one occurrence per (alarm, date); ON CONFLICT targets this index
        manager
            .create_index(
                Index::create()
                    .name("idx_alarm_occurrence_alarm_date")
                    .table(AlarmOccurrence::Table)
                    .col(AlarmOccurrence::AlarmId)
                    .col(AlarmOccurrence::Date)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Ringing check and pre-alert sweep scan one day at a time
        manager
            .create_index(
                Index::create()
                    .name("idx_alarm_occurrence_date_time")
                    .table(AlarmOccurrence::Table)
                    .col(AlarmOccurrence::Date)
                    .col(AlarmOccurrence::Time)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AlarmOccurrence::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum AlarmOccurrence {
    Table,
    Id,
    AlarmId,
    Date,
    Time,
    DeactivateType,
    DeactivatedAt,
    CheckedInAt,
    IsRinging,
    RingCount,
    PreAlertSentAt,
    CreatedAt,
}

#[derive(Iden)]
enum Alarm {
    Table,
    Id,
}
