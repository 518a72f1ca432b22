use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Movies::Table)
                    .if_not_exists()
                    .col(pk_auto(Movies::Id))
                    .col(string_len(Movies::Name, 255))
                    // ISO-8601 calendar date, e.g. 2010-07-16
                    .col(string_len(Movies::Date, 10))
                    .col(double(Movies::Score))
                    .col(text(Movies::Overview))
                    .col(string_len(Movies::Status, 32))
                    // exact decimal text, at most 15 digits with 2 after the point
                    .col(string_len(Movies::Budget, 20))
                    .col(double(Movies::Revenue))
                    .col(integer_null(Movies::CountryId))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_movies_country_id")
                            .from(Movies::Table, Movies::CountryId)
                            .to(Countries::Table, Countries::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movies_name_date_unique")
                    .table(Movies::Table)
                    .col(Movies::Name)
                    .col(Movies::Date)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movies_country_id")
                    .table(Movies::Table)
                    .col(Movies::CountryId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Movies::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Movies {
    Table,
    Id,
    Name,
    Date,
    Score,
    Overview,
    Status,
    Budget,
    Revenue,
    CountryId,
}

#[derive(DeriveIden)]
enum Countries {
    Table,
    Id,
}
