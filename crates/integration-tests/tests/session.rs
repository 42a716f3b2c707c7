//! Login, logout and session checks against the fake API.

use agrihcm_client::{Audience, EventBus, SessionError, SessionEvent, SessionService};
use agrihcm_core::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use agrihcm_integration_tests::{
    ADMIN_ID, ADMIN_PASSWORD, ADMIN_USERNAME, CUSTOMER_ID, CUSTOMER_PASSWORD, CUSTOMER_USERNAME,
    FakeApi,
};
use secrecy::SecretString;

fn password(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

#[tokio::test]
async fn test_login_persists_tokens_and_announces_user() {
    let api = FakeApi::start().await;
    let client = api.api_client();
    let gateway = api.anonymous(&client, Audience::Customer);
    let events = EventBus::new();
    let mut received = events.subscribe();
    let session = SessionService::new(gateway.clone(), events);

    let user = session
        .login(&format!(" {CUSTOMER_USERNAME} "), &password(CUSTOMER_PASSWORD))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(user.id, CUSTOMER_ID);
    let access = gateway.store().get(ACCESS_TOKEN_COOKIE).unwrap();
    let refresh = gateway.store().get(REFRESH_TOKEN_COOKIE).unwrap();
    assert!(api.accepts(&access));
    assert!(api.accepts_refresh(&refresh));
    assert_eq!(
        received.try_recv().unwrap(),
        SessionEvent::UserLoggedIn {
            user_id: CUSTOMER_ID
        }
    );
}

#[tokio::test]
async fn test_wrong_password_is_rejected_with_api_message() {
    let api = FakeApi::start().await;
    let client = api.api_client();
    let gateway = api.anonymous(&client, Audience::Customer);
    let session = SessionService::new(gateway.clone(), EventBus::new());

    let result = session
        .login(CUSTOMER_USERNAME, &password("wrong"))
        .await;

    match result {
        Err(SessionError::Rejected(message)) => {
            assert_eq!(message, "No active account found with the given credentials");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert!(!gateway.has_credential());
    // Login never goes through the refresh path
    assert_eq!(api.refresh_calls(), 0);
}

#[tokio::test]
async fn test_admin_login_refuses_customers() {
    let api = FakeApi::start().await;
    let client = api.api_client();
    let gateway = api.anonymous(&client, Audience::Admin);
    let session = SessionService::new(gateway.clone(), EventBus::new());

    let result = session
        .admin_login(CUSTOMER_USERNAME, &password(CUSTOMER_PASSWORD))
        .await;
    assert!(matches!(result, Err(SessionError::Rejected(_))));
    assert!(!gateway.has_credential());

    let admin = session
        .admin_login(ADMIN_USERNAME, &password(ADMIN_PASSWORD))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(admin.id, ADMIN_ID);
    assert!(gateway.has_credential());
}

#[tokio::test]
async fn test_check_session() {
    let api = FakeApi::start().await;
    let client = api.api_client();

    let anonymous = SessionService::new(api.anonymous(&client, Audience::Customer), EventBus::new());
    assert!(anonymous.check_session().await.unwrap().is_none());
    assert!(api.seen().is_empty());

    let events = EventBus::new();
    let mut received = events.subscribe();
    let signed_in = SessionService::new(
        api.sign_in(&client, CUSTOMER_ID, Audience::Customer),
        events,
    );
    let user = signed_in.check_session().await.unwrap().unwrap();
    assert_eq!(user.id, CUSTOMER_ID);
    assert_eq!(user.display_name(), "Lan Tran");
    assert!(matches!(
        received.try_recv().unwrap(),
        SessionEvent::UserLoggedIn { .. }
    ));
}

#[tokio::test]
async fn test_check_session_with_dead_tokens_is_none() {
    let api = FakeApi::start().await;
    let client = api.api_client();
    let session = SessionService::new(
        api.sign_in(&client, CUSTOMER_ID, Audience::Customer),
        EventBus::new(),
    );
    api.expire_access_tokens();
    api.revoke_refresh_tokens();

    assert!(session.check_session().await.unwrap().is_none());
}

#[tokio::test]
async fn test_logout_clears_everything() {
    let api = FakeApi::start().await;
    let client = api.api_client();
    let gateway = api.sign_in(&client, CUSTOMER_ID, Audience::Customer);
    let refresh = gateway.store().get(REFRESH_TOKEN_COOKIE).unwrap();
    let events = EventBus::new();
    let mut received = events.subscribe();
    let session = SessionService::new(gateway.clone(), events);

    session.logout().await;

    assert!(!gateway.has_credential());
    assert_eq!(gateway.store().get(ACCESS_TOKEN_COOKIE), None);
    assert_eq!(api.requests("POST", "/api/logout/"), 1);
    assert!(!api.accepts_refresh(&refresh));
    assert_eq!(received.try_recv().unwrap(), SessionEvent::LoggedOut);
}

#[tokio::test]
async fn test_logout_without_session_still_announces() {
    let api = FakeApi::start().await;
    let client = api.api_client();
    let events = EventBus::new();
    let mut received = events.subscribe();
    let session = SessionService::new(api.anonymous(&client, Audience::Customer), events);

    session.logout().await;

    assert!(api.seen().is_empty());
    assert_eq!(received.try_recv().unwrap(), SessionEvent::LoggedOut);
}
