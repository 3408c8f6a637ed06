use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, Schema};
use tracing::info;

use crate::db::entities::{
    daily_usage, device, group_member, notification, user, user_group, water_usage,
};

/// Creates every table and index the service needs, skipping the ones that
/// already exist. Tables are created parents first so foreign keys resolve.
pub async fn sync_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    create_table(db, &schema, user::Entity).await?;
    create_table(db, &schema, user_group::Entity).await?;
    create_table(db, &schema, group_member::Entity).await?;
    create_table(db, &schema, device::Entity).await?;
    create_table(db, &schema, water_usage::Entity).await?;
    create_table(db, &schema, daily_usage::Entity).await?;
    create_table(db, &schema, notification::Entity).await?;

    for mut index in schema
        .create_index_from_entity(water_usage::Entity)
        .into_iter()
        .chain(schema.create_index_from_entity(notification::Entity))
    {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }

    // One snapshot per device per day; the sweep overwrites instead of duplicating.
    let snapshot_index = Index::create()
        .if_not_exists()
        .name("idx_daily_usages_device_date")
        .table(daily_usage::Entity)
        .col(daily_usage::Column::DeviceId)
        .col(daily_usage::Column::Date)
        .unique()
        .to_owned();
    db.execute(backend.build(&snapshot_index)).await?;

    info!("Database schema is up to date.");
    Ok(())
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}
