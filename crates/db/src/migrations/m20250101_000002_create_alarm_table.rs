//! Create alarm table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alarm::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Alarm::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Alarm::MemberId).string().not_null())
                    .col(ColumnDef::new(Alarm::Purpose).string().not_null())
                    .col(ColumnDef::new(Alarm::Time).time().not_null())
                    .col(ColumnDef::new(Alarm::RepeatDays).string_len(32).not_null())
                    .col(ColumnDef::new(Alarm::SoundType).string().not_null())
                    .col(ColumnDef::new(Alarm::Latitude).double().not_null())
                    .col(ColumnDef::new(Alarm::Longitude).double().not_null())
                    .col(ColumnDef::new(Alarm::Address).text().not_null())
                    .col(
                        ColumnDef::new(Alarm::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_alarm_member")
                            .from(Alarm::Table, Alarm::MemberId)
                            .to(Member::Table, Member::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_alarm_member_id")
                    .table(Alarm::Table)
                    .col(Alarm::MemberId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Alarm::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Alarm {
    Table,
    Id,
    MemberId,
    Purpose,
    Time,
    RepeatDays,
    SoundType,
    Latitude,
    Longitude,
    Address,
    CreatedAt,
}

#[derive(Iden)]
enum Member {
    Table,
    Id,
}
