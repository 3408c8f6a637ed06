mod common;

use sea_orm::{EntityTrait, PaginatorTrait};

use common::*;
use ecotrack::db::entities::user;
use ecotrack::db::services::user_service::{self, OAuthIdentity};
use ecotrack::web::AppError;

fn google(sub: &str, email: &str) -> OAuthIdentity {
    OAuthIdentity {
        provider: "google".to_string(),
        provider_id: sub.to_string(),
        email: email.to_string(),
        display_name: Some("Gigi".to_string()),
    }
}

#[tokio::test]
async fn unknown_identity_creates_verified_user() {
    let db = setup_db().await;

    let created = user_service::link_oauth_identity(&db, google("g-1", "Gigi@Example.com"))
        .await
        .unwrap();
    assert_eq!(created.email, "gigi@example.com");
    assert!(created.verified);
    assert!(created.password_hash.is_none());
    assert_eq!(created.provider.as_deref(), Some("google"));
    assert_eq!(created.display_name, "Gigi");

    let again = user_service::link_oauth_identity(&db, google("g-1", "gigi@example.com"))
        .await
        .unwrap();
    assert_eq!(again.id, created.id);
    assert_eq!(user::Entity::find().count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn existing_email_is_linked_to_provider() {
    let db = setup_db().await;
    let local = create_user(&db, "ana@example.com", false).await;

    let linked = user_service::link_oauth_identity(&db, google("g-42", "ana@example.com"))
        .await
        .unwrap();
    assert_eq!(linked.id, local.id);
    assert_eq!(linked.provider_id.as_deref(), Some("g-42"));
    assert!(linked.verified);
    assert!(linked.password_hash.is_some());
}

#[tokio::test]
async fn changed_email_must_not_belong_to_someone_else() {
    let db = setup_db().await;
    create_user(&db, "taken@example.com", true).await;
    let first = user_service::link_oauth_identity(&db, google("g-7", "old@example.com"))
        .await
        .unwrap();

    let err = user_service::link_oauth_identity(&db, google("g-7", "taken@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EmailConflict(_)));

    let unchanged = user_service::find_by_id(&db, first.id).await.unwrap().unwrap();
    assert_eq!(unchanged.email, "old@example.com");

    let moved = user_service::link_oauth_identity(&db, google("g-7", "new@example.com"))
        .await
        .unwrap();
    assert_eq!(moved.id, first.id);
    assert_eq!(moved.email, "new@example.com");
}
