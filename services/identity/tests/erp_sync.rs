//! Session flows with the ERP bridge linked, missing or unreachable

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeErp, HangingErp, Harness, NEW_PASSWORD, PASSWORD, Sent};
use identity::{erp::IdentitySynchronizer, reset::ResetMode};

const EMAIL: &str = "skipper@harbor.test";

fn unreachable_erp() -> Harness {
    Harness::with_erp(IdentitySynchronizer::new(
        Arc::new(HangingErp),
        Duration::from_millis(50),
    ))
}

#[tokio::test]
async fn test_unreachable_erp_never_blocks_local_flows() {
    let harness = unreachable_erp();

    let signup = harness
        .service
        .signup("Skipper", EMAIL, PASSWORD)
        .await
        .unwrap();
    assert_eq!(signup.user.external_ref, None);

    let login = harness.service.login(EMAIL, PASSWORD).await.unwrap();
    assert!(login.external_user.is_none());
    assert_eq!(login.user.external_ref, None);

    harness
        .service
        .change_password(signup.user.id, PASSWORD, NEW_PASSWORD)
        .await
        .unwrap();

    harness
        .service
        .request_password_reset(EMAIL, ResetMode::Token)
        .await
        .unwrap();
    let token = harness.notifier.last_secret(Sent::Reset, EMAIL).unwrap();
    harness
        .service
        .reset_with_token(&token, PASSWORD)
        .await
        .unwrap();

    harness.service.login(EMAIL, PASSWORD).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_erp_with_linked_account() {
    let harness = unreachable_erp();
    let user = harness.signup("Skipper", EMAIL).await;
    harness
        .store
        .update_with(user.id, |u| u.external_ref = Some(EMAIL.to_string()))
        .await;

    harness
        .service
        .change_password(user.id, PASSWORD, NEW_PASSWORD)
        .await
        .unwrap();

    harness
        .service
        .request_password_reset(EMAIL, ResetMode::Otp)
        .await
        .unwrap();
    let code = harness.notifier.last_secret(Sent::Otp, EMAIL).unwrap();
    harness
        .service
        .reset_with_otp(EMAIL, &code, PASSWORD)
        .await
        .unwrap();

    let login = harness.service.login(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(login.user.external_ref.as_deref(), Some(EMAIL));
}

#[tokio::test]
async fn test_signup_creates_missing_remote_account() {
    let erp = Arc::new(FakeErp::default());
    let harness = Harness::with_erp_client(erp.clone());

    let user = harness.signup("Skipper", EMAIL).await;

    assert!(erp.has_account(EMAIL));
    assert_eq!(user.external_ref.as_deref(), Some(EMAIL));
    assert_eq!(erp.password_of(EMAIL).as_deref(), Some(PASSWORD));
}

#[tokio::test]
async fn test_existing_remote_account_links_on_proven_login() {
    let erp = Arc::new(FakeErp::with_account(EMAIL, "Erp-only-pass9!"));
    let harness = Harness::with_erp_client(erp.clone());

    let user = harness.signup("Skipper", EMAIL).await;
    assert_eq!(user.external_ref, None);

    // Local password differs from the ERP one: no link.
    let login = harness.service.login(EMAIL, PASSWORD).await.unwrap();
    assert!(login.external_user.is_none());
    assert_eq!(harness.reload(&user).await.external_ref, None);

    harness
        .service
        .change_password(user.id, PASSWORD, "Erp-only-pass9!")
        .await
        .unwrap();
    let login = harness
        .service
        .login(EMAIL, "Erp-only-pass9!")
        .await
        .unwrap();

    let remote = login.external_user.unwrap();
    assert_eq!(remote.remote_id, EMAIL);
    assert_eq!(login.user.external_ref.as_deref(), Some(EMAIL));
    assert_eq!(harness.reload(&user).await.external_ref.as_deref(), Some(EMAIL));
}

#[tokio::test]
async fn test_password_changes_reach_linked_remote_account() {
    let erp = Arc::new(FakeErp::default());
    let harness = Harness::with_erp_client(erp.clone());
    let user = harness.signup("Skipper", EMAIL).await;

    harness
        .service
        .change_password(user.id, PASSWORD, NEW_PASSWORD)
        .await
        .unwrap();
    assert_eq!(erp.password_of(EMAIL).as_deref(), Some(NEW_PASSWORD));

    harness
        .service
        .request_password_reset(EMAIL, ResetMode::Token)
        .await
        .unwrap();
    let token = harness.notifier.last_secret(Sent::Reset, EMAIL).unwrap();
    harness
        .service
        .reset_with_token(&token, PASSWORD)
        .await
        .unwrap();

    assert_eq!(
        erp.password_updates(),
        vec![
            (EMAIL.to_string(), NEW_PASSWORD.to_string()),
            (EMAIL.to_string(), PASSWORD.to_string()),
        ]
    );
}

#[tokio::test]
async fn test_unlinked_accounts_are_not_pushed() {
    let erp = Arc::new(FakeErp::with_account(EMAIL, "Erp-only-pass9!"));
    let harness = Harness::with_erp_client(erp.clone());
    let user = harness.signup("Skipper", EMAIL).await;

    harness
        .service
        .change_password(user.id, PASSWORD, NEW_PASSWORD)
        .await
        .unwrap();

    assert!(erp.password_updates().is_empty());
    assert_eq!(erp.password_of(EMAIL).as_deref(), Some("Erp-only-pass9!"));
}
