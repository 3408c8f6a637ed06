use std::str::FromStr;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::info;

use crate::db::entities::{group_member, user, user_group};
use crate::web::error::AppError;

/// Hard cap on memberships per group.
pub const MAX_GROUP_MEMBERS: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipAction {
    Remove,
    GrantAdmin,
    RevokeAdmin,
}

impl FromStr for MembershipAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REMOVE" => Ok(MembershipAction::Remove),
            "ADMIN_PERMS" => Ok(MembershipAction::GrantAdmin),
            "MEMBER_PERMS" => Ok(MembershipAction::RevokeAdmin),
            _ => Err(AppError::InvalidAction(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupWithRole {
    pub id: i32,
    pub name: String,
    pub locations: Vec<String>,
    pub is_admin: bool,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
    pub user_id: i32,
    pub email: String,
    pub display_name: String,
    pub is_admin: bool,
}

pub fn location_names(group: &user_group::Model) -> Vec<String> {
    serde_json::from_value(group.locations.clone()).unwrap_or_default()
}

pub async fn get_group<C: ConnectionTrait>(
    db: &C,
    group_id: i32,
) -> Result<user_group::Model, AppError> {
    user_group::Entity::find_by_id(group_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {group_id} not found")))
}

/// Creates a group and makes `creator_id` its first admin in the same
/// transaction.
pub async fn create_group(
    db: &DatabaseConnection,
    creator_id: i32,
    name: &str,
) -> Result<(user_group::Model, group_member::Model), AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidInput("Group name must not be empty".to_string()));
    }

    let txn = db.begin().await?;

    let taken = user_group::Entity::find()
        .filter(user_group::Column::Name.eq(name))
        .one(&txn)
        .await?;
    if taken.is_some() {
        return Err(AppError::Conflict(format!("Group name '{name}' is already taken")));
    }

    let now = Utc::now();
    let group = user_group::ActiveModel {
        name: Set(name.to_string()),
        locations: Set(serde_json::json!([])),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let membership = group_member::ActiveModel {
        user_id: Set(creator_id),
        user_group_id: Set(group.id),
        is_admin: Set(true),
        created_at: Set(now),
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    info!(group_id = group.id, creator_id, "Created user group.");
    Ok((group, membership))
}

/// Adds `user_id` to `group_id` as a regular member.
///
/// The group row is locked for the duration of the count-then-insert so two
/// concurrent joins cannot both observe a free slot.
pub async fn add_membership(
    db: &DatabaseConnection,
    user_id: i32,
    group_id: i32,
) -> Result<group_member::Model, AppError> {
    let txn = db.begin().await?;

    user_group::Entity::find_by_id(group_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {group_id} not found")))?;

    user::Entity::find_by_id(user_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;

    let already_member = group_member::Entity::find_by_id((user_id, group_id))
        .one(&txn)
        .await?;
    if already_member.is_some() {
        return Err(AppError::Conflict(format!(
            "User {user_id} is already a member of group {group_id}"
        )));
    }

    let member_count = group_member::Entity::find()
        .filter(group_member::Column::UserGroupId.eq(group_id))
        .count(&txn)
        .await?;
    if member_count >= MAX_GROUP_MEMBERS {
        return Err(AppError::GroupFull(format!(
            "Group {group_id} already has {MAX_GROUP_MEMBERS} members"
        )));
    }

    let membership = group_member::ActiveModel {
        user_id: Set(user_id),
        user_group_id: Set(group_id),
        is_admin: Set(false),
        created_at: Set(Utc::now()),
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    info!(group_id, user_id, "Added group member.");
    Ok(membership)
}

/// Applies an admin action to an existing membership. Returns `None` when the
/// membership was removed. The last admin of a group can be neither removed
/// nor demoted.
pub async fn edit_membership(
    db: &DatabaseConnection,
    group_id: i32,
    user_id: i32,
    action: MembershipAction,
) -> Result<Option<group_member::Model>, AppError> {
    let txn = db.begin().await?;

    user_group::Entity::find_by_id(group_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {group_id} not found")))?;

    let membership = group_member::Entity::find_by_id((user_id, group_id))
        .one(&txn)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("User {user_id} is not a member of group {group_id}"))
        })?;

    if membership.is_admin && action != MembershipAction::GrantAdmin {
        let admin_count = group_member::Entity::find()
            .filter(group_member::Column::UserGroupId.eq(group_id))
            .filter(group_member::Column::IsAdmin.eq(true))
            .count(&txn)
            .await?;
        if admin_count <= 1 {
            return Err(AppError::Conflict(format!(
                "Group {group_id} must keep at least one admin"
            )));
        }
    }

    let result = match action {
        MembershipAction::Remove => {
            group_member::Entity::delete_by_id((user_id, group_id))
                .exec(&txn)
                .await?;
            None
        }
        MembershipAction::GrantAdmin | MembershipAction::RevokeAdmin => {
            let mut active = membership.into_active_model();
            active.is_admin = Set(action == MembershipAction::GrantAdmin);
            Some(active.update(&txn).await?)
        }
    };

    txn.commit().await?;
    info!(group_id, user_id, ?action, "Edited group membership.");
    Ok(result)
}

/// Appends a location name to the group's list. Duplicate names are rejected.
pub async fn add_location(
    db: &DatabaseConnection,
    group_id: i32,
    location: &str,
) -> Result<Vec<String>, AppError> {
    let location = location.trim();
    if location.is_empty() {
        return Err(AppError::InvalidInput("Location must not be empty".to_string()));
    }

    let txn = db.begin().await?;

    let group = user_group::Entity::find_by_id(group_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {group_id} not found")))?;

    let mut locations = location_names(&group);
    if locations.iter().any(|l| l.eq_ignore_ascii_case(location)) {
        return Err(AppError::Conflict(format!("Location '{location}' already exists")));
    }
    locations.push(location.to_string());

    let mut active = group.into_active_model();
    active.locations = Set(serde_json::to_value(&locations)?);
    active.update(&txn).await?;

    txn.commit().await?;
    Ok(locations)
}

pub async fn group_ids_for_user<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
) -> Result<Vec<i32>, AppError> {
    Ok(group_member::Entity::find()
        .filter(group_member::Column::UserId.eq(user_id))
        .all(db)
        .await?
        .into_iter()
        .map(|m| m.user_group_id)
        .collect())
}

pub async fn groups_for_user(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<Vec<GroupWithRole>, AppError> {
    let rows = group_member::Entity::find()
        .filter(group_member::Column::UserId.eq(user_id))
        .find_also_related(user_group::Entity)
        .order_by_asc(group_member::Column::UserGroupId)
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(membership, group)| {
            group.map(|g| GroupWithRole {
                id: g.id,
                locations: location_names(&g),
                name: g.name,
                is_admin: membership.is_admin,
                created_at: g.created_at,
            })
        })
        .collect())
}

pub async fn members_of(
    db: &DatabaseConnection,
    group_id: i32,
) -> Result<Vec<MemberView>, AppError> {
    let rows = group_member::Entity::find()
        .filter(group_member::Column::UserGroupId.eq(group_id))
        .find_also_related(user::Entity)
        .order_by_asc(group_member::Column::CreatedAt)
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(membership, user)| {
            user.map(|u| MemberView {
                user_id: u.id,
                email: u.email,
                display_name: u.display_name,
                is_admin: membership.is_admin,
            })
        })
        .collect())
}

/// Fails with `Forbidden` unless `user_id` belongs to the group.
pub async fn ensure_member<C: ConnectionTrait>(
    db: &C,
    group_id: i32,
    user_id: i32,
) -> Result<group_member::Model, AppError> {
    get_group(db, group_id).await?;
    group_member::Entity::find_by_id((user_id, group_id))
        .one(db)
        .await?
        .ok_or_else(|| AppError::Forbidden(format!("Not a member of group {group_id}")))
}

/// Fails with `Forbidden` unless `user_id` is an admin of the group.
pub async fn ensure_admin<C: ConnectionTrait>(
    db: &C,
    group_id: i32,
    user_id: i32,
) -> Result<group_member::Model, AppError> {
    let membership = ensure_member(db, group_id, user_id).await?;
    if !membership.is_admin {
        return Err(AppError::Forbidden(format!(
            "Admin rights on group {group_id} are required"
        )));
    }
    Ok(membership)
}
