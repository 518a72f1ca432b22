use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "languages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::movie_language::Entity")]
    MovieLanguage,
}

impl Related<super::movie_language::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MovieLanguage.def()
    }
}

impl Related<super::movie::Entity> for Entity {
    fn to() -> RelationDef {
        super::movie_language::Relation::Movie.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::movie_language::Relation::Language.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
