mod common;

use common::*;
use ecotrack::db::services::user_service;
use ecotrack::server::config::ServerConfig;
use ecotrack::services::auth_service;
use ecotrack::web::models::{
    ChangeEmailRequest, LoginRequest, RegisterRequest, ResetPasswordRequest,
};
use ecotrack::web::AppError;

fn config() -> ServerConfig {
    ServerConfig::for_testing("sqlite::memory:", JWT_SECRET)
}

fn login(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
    }
}

fn change_to(new_email: &str, password: &str) -> ChangeEmailRequest {
    ChangeEmailRequest {
        new_email: new_email.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn registration_leaves_no_account_when_mail_fails() {
    let db = setup_db().await;
    let request = || RegisterRequest {
        email: "ana@example.com".to_string(),
        password: "long-enough".to_string(),
        display_name: None,
    };

    let err = auth_service::register_user(&db, &FailingMailer, request(), &config())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(user_service::find_by_email(&db, "ana@example.com").await.unwrap().is_none());

    // Retrying once the relay is back succeeds.
    let mailer = RecordingMailer::default();
    let created = auth_service::register_user(&db, &mailer, request(), &config())
        .await
        .unwrap();
    assert_eq!(created.email, "ana@example.com");
    assert!(!created.verified);
    assert_eq!(mailer.messages().len(), 1);
}

#[tokio::test]
async fn change_email_rejects_taken_or_identical_addresses() {
    let db = setup_db().await;
    let ana = create_user(&db, "ana@example.com", true).await;
    create_user(&db, "bo@example.com", true).await;
    let mailer = RecordingMailer::default();

    let request = change_to("Bo@Example.com", PASSWORD);
    let err = auth_service::change_email(&db, &mailer, ana.id, request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EmailConflict(_)));

    let request = change_to("ana@example.com", PASSWORD);
    let err = auth_service::change_email(&db, &mailer, ana.id, request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let request = change_to("new@example.com", "wrong-pass");
    let err = auth_service::change_email(&db, &mailer, ana.id, request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidCredentials));

    let stored = user_service::get_by_id(&db, ana.id).await.unwrap();
    assert_eq!(stored.email, "ana@example.com");
    assert!(stored.verified);
    assert!(mailer.messages().is_empty());
}

#[tokio::test]
async fn changed_email_must_be_verified_again() {
    let db = setup_db().await;
    let ana = create_user(&db, "ana@example.com", true).await;
    let mailer = RecordingMailer::default();
    let session = auth_service::login_user(&db, login("ana@example.com", PASSWORD), &config())
        .await
        .unwrap();

    let request = change_to("ana@new.org", PASSWORD);
    let updated = auth_service::change_email(&db, &mailer, ana.id, request)
        .await
        .unwrap();
    assert_eq!(updated.email, "ana@new.org");
    assert!(!updated.verified);

    let mails = mailer.messages();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].to, "ana@new.org");
    let code = code_after(&mails[0].body, "verification code is ");

    // The old refresh token died with the address change.
    let err = auth_service::refresh_session(&db, &session.refresh_token, &config())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));

    let err = auth_service::login_user(&db, login("ana@new.org", PASSWORD), &config())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let verified = auth_service::verify_email(&db, "ana@new.org", &code).await.unwrap();
    assert!(verified.verified);
    assert!(auth_service::login_user(&db, login("ana@new.org", PASSWORD), &config())
        .await
        .is_ok());
}

#[tokio::test]
async fn change_email_is_undone_when_mail_fails() {
    let db = setup_db().await;
    let ana = create_user(&db, "ana@example.com", true).await;

    let request = change_to("ana@new.org", PASSWORD);
    let err = auth_service::change_email(&db, &FailingMailer, ana.id, request)
        .await
        .unwrap_err();
    assert!(err.is_transient());

    let stored = user_service::get_by_id(&db, ana.id).await.unwrap();
    assert_eq!(stored.email, "ana@example.com");
    assert!(stored.verified);
}

#[tokio::test]
async fn password_reset_needs_the_mailed_code() {
    let db = setup_db().await;
    let ana = create_user(&db, "ana@example.com", true).await;
    create_user(&db, "pending@example.com", false).await;
    let mailer = RecordingMailer::default();
    let session = auth_service::login_user(&db, login("ana@example.com", PASSWORD), &config())
        .await
        .unwrap();

    let err = auth_service::forgot_password(&db, &mailer, "pending@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    let err = auth_service::forgot_password(&db, &mailer, "nobody@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    auth_service::forgot_password(&db, &mailer, "ana@example.com").await.unwrap();
    let mails = mailer.messages();
    assert_eq!(mails.len(), 1);
    let code = code_after(&mails[0].body, "reset code is ");

    let reset = |code: &str, password: &str| ResetPasswordRequest {
        email: "ana@example.com".to_string(),
        code: code.to_string(),
        new_password: password.to_string(),
    };

    let wrong = if code == "000000" { "111111" } else { "000000" };
    let err = auth_service::reset_password(&db, reset(wrong, "brand-new-pass"), &config())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let err = auth_service::reset_password(&db, reset(&code, "short"), &config())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    auth_service::reset_password(&db, reset(&code, "brand-new-pass"), &config())
        .await
        .unwrap();

    let stored = user_service::get_by_id(&db, ana.id).await.unwrap();
    assert!(stored.reset_token.is_none());
    assert!(stored.refresh_token.is_none());
    assert!(auth_service::refresh_session(&db, &session.refresh_token, &config())
        .await
        .is_err());

    let err = auth_service::login_user(&db, login("ana@example.com", PASSWORD), &config())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidCredentials));
    assert!(auth_service::login_user(&db, login("ana@example.com", "brand-new-pass"), &config())
        .await
        .is_ok());

    // The code is single use.
    let err = auth_service::reset_password(&db, reset(&code, "another-pass"), &config())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}
