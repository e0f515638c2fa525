//! Create alarm_off_log table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AlarmOffLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AlarmOffLog::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AlarmOffLog::AlarmId).string().not_null())
                    .col(ColumnDef::new(AlarmOffLog::MemberId).string().not_null())
                    .col(ColumnDef::new(AlarmOffLog::CreatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_alarm_off_log_alarm")
                            .from(AlarmOffLog::Table, AlarmOffLog::AlarmId)
                            .to(Alarm::Table, Alarm::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_alarm_off_log_member")
                            .from(AlarmOffLog::Table, AlarmOffLog::MemberId)
                            .to(Member::Table, Member::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Weekly quota counts by (alarm, member, created_at range)
        manager
            .create_index(
                Index::create()
                    .name("idx_alarm_off_log_alarm_member_created")
                    .table(AlarmOffLog::Table)
                    .col(AlarmOffLog::AlarmId)
                    .col(AlarmOffLog::MemberId)
                    .col(AlarmOffLog::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AlarmOffLog::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum AlarmOffLog {
    Table,
    Id,
    AlarmId,
    MemberId,
    CreatedAt,
}

#[derive(Iden)]
enum Alarm {
    Table,
    Id,
}

#[derive(Iden)]
enum Member {
    Table,
    Id,
}
