use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    QueryFilter, Set, TransactionTrait,
};
use tracing::info;

use crate::db::entities::user;
use crate::web::error::AppError;

/// Identity asserted by an external provider after its token was verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthIdentity {
    pub provider: String,
    pub provider_id: String,
    pub email: String,
    pub display_name: Option<String>,
}

pub async fn find_by_id<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
) -> Result<Option<user::Model>, AppError> {
    Ok(user::Entity::find_by_id(user_id).one(db).await?)
}

pub async fn find_by_email<C: ConnectionTrait>(
    db: &C,
    email: &str,
) -> Result<Option<user::Model>, AppError> {
    Ok(user::Entity::find()
        .filter(user::Column::Email.eq(normalize_email(email)))
        .one(db)
        .await?)
}

pub async fn get_by_id<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<user::Model, AppError> {
    find_by_id(db, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Creates an unverified account with a password.
pub async fn create_local_user<C: ConnectionTrait>(
    db: &C,
    email: &str,
    display_name: &str,
    password_hash: String,
    verify_token: String,
) -> Result<user::Model, AppError> {
    let email = normalize_email(email);
    if find_by_email(db, &email).await?.is_some() {
        return Err(AppError::Conflict(format!("Email {email} is already registered")));
    }

    let new_user = user::ActiveModel {
        email: Set(email),
        password_hash: Set(Some(password_hash)),
        display_name: Set(display_name.to_string()),
        verified: Set(false),
        verify_token: Set(Some(verify_token)),
        refresh_token: Set(None),
        reset_token: Set(None),
        provider: Set(None),
        provider_id: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    Ok(new_user.insert(db).await?)
}

pub async fn set_verify_token<C: ConnectionTrait>(
    db: &C,
    user: user::Model,
    token: Option<String>,
) -> Result<user::Model, AppError> {
    let mut active = user.into_active_model();
    active.verify_token = Set(token);
    Ok(active.update(db).await?)
}

pub async fn mark_verified(
    db: &DatabaseConnection,
    user: user::Model,
) -> Result<user::Model, AppError> {
    let mut active = user.into_active_model();
    active.verified = Set(true);
    active.verify_token = Set(None);
    Ok(active.update(db).await?)
}

/// Moves the account to a new address. The account must verify again and
/// existing sessions stop refreshing.
pub async fn update_email<C: ConnectionTrait>(
    db: &C,
    user: user::Model,
    email: &str,
    verify_token: String,
) -> Result<user::Model, AppError> {
    let mut active = user.into_active_model();
    active.email = Set(normalize_email(email));
    active.verified = Set(false);
    active.verify_token = Set(Some(verify_token));
    active.refresh_token = Set(None);
    Ok(active.update(db).await?)
}

pub async fn set_reset_token<C: ConnectionTrait>(
    db: &C,
    user: user::Model,
    token: Option<String>,
) -> Result<user::Model, AppError> {
    let mut active = user.into_active_model();
    active.reset_token = Set(token);
    Ok(active.update(db).await?)
}

/// Replaces the password hash, consuming the reset code and ending every
/// session.
pub async fn set_password(
    db: &DatabaseConnection,
    user: user::Model,
    password_hash: String,
) -> Result<user::Model, AppError> {
    let mut active = user.into_active_model();
    active.password_hash = Set(Some(password_hash));
    active.reset_token = Set(None);
    active.refresh_token = Set(None);
    Ok(active.update(db).await?)
}

pub async fn store_refresh_token(
    db: &DatabaseConnection,
    user_id: i32,
    refresh_token: Option<String>,
) -> Result<(), AppError> {
    let user = get_by_id(db, user_id).await?;
    let mut active = user.into_active_model();
    active.refresh_token = Set(refresh_token);
    active.update(db).await?;
    Ok(())
}

/// Resolves a provider identity to a local account, creating or linking as
/// needed.
///
/// Lookup goes by `(provider, provider_id)` first and falls back to the
/// email address. A brand new identity becomes a verified account without a
/// password. When the provider reports a different email than the one
/// stored, the new address must not belong to another account.
pub async fn link_oauth_identity(
    db: &DatabaseConnection,
    identity: OAuthIdentity,
) -> Result<user::Model, AppError> {
    let email = normalize_email(&identity.email);
    if email.is_empty() {
        return Err(AppError::InvalidInput("Identity provider returned no email".to_string()));
    }

    let txn = db.begin().await?;

    let by_provider = user::Entity::find()
        .filter(user::Column::Provider.eq(identity.provider.as_str()))
        .filter(user::Column::ProviderId.eq(identity.provider_id.as_str()))
        .one(&txn)
        .await?;

    let existing = match by_provider {
        Some(found) => Some(found),
        None => find_by_email(&txn, &email).await?,
    };

    let linked = match existing {
        None => {
            let display_name = identity
                .display_name
                .clone()
                .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
            let created = user::ActiveModel {
                email: Set(email.clone()),
                password_hash: Set(None),
                display_name: Set(display_name),
                verified: Set(true),
                verify_token: Set(None),
                refresh_token: Set(None),
                reset_token: Set(None),
                provider: Set(Some(identity.provider.clone())),
                provider_id: Set(Some(identity.provider_id.clone())),
                created_at: Set(Utc::now()),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            info!(user_id = created.id, provider = %identity.provider, "Created user from OAuth identity.");
            created
        }
        Some(found) => {
            if found.email != email {
                let owner = find_by_email(&txn, &email).await?;
                if owner.is_some_and(|other| other.id != found.id) {
                    return Err(AppError::EmailConflict(format!(
                        "Email {email} is already used by another account"
                    )));
                }
            }

            let relink = found.provider.as_deref() != Some(identity.provider.as_str())
                || found.provider_id.as_deref() != Some(identity.provider_id.as_str());
            let user_id = found.id;

            let mut active = found.into_active_model();
            active.email = Set(email.clone());
            active.provider = Set(Some(identity.provider.clone()));
            active.provider_id = Set(Some(identity.provider_id.clone()));
            active.verified = Set(true);
            let updated = active.update(&txn).await?;
            if relink {
                info!(user_id, provider = %identity.provider, "Linked OAuth identity to existing user.");
            }
            updated
        }
    };

    txn.commit().await?;
    Ok(linked)
}
