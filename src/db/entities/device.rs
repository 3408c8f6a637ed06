use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    /// Hardware identifier printed on the sensor, e.g. `ET-9f3a-01`.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_group_id: i32,
    pub name: String,
    pub location: String,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user_group::Entity",
        from = "Column::UserGroupId",
        to = "super::user_group::Column::Id",
        on_delete = "Cascade",
        on_update = "Cascade"
    )]
    UserGroup,
    #[sea_orm(has_many = "super::water_usage::Entity")]
    WaterUsages,
}

impl Related<super::user_group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserGroup.def()
    }
}

impl Related<super::water_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WaterUsages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
