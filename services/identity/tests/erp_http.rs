//! HTTP ERP client against a local server that keeps cookie sessions
//!
//! The server answers `get_logged_user` from whatever session cookie the
//! request carries, so any session shared between concurrent logins shows up
//! as one user receiving another's identity.

mod common;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{
        HeaderMap, StatusCode,
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use common::{Harness, PASSWORD};
use identity::{
    credentials::LockoutConfig,
    erp::{ErpConfig, ErpIdentityClient, ErpProfile, HttpErpClient, IdentitySynchronizer},
    error::AuthError,
};

const API_TOKEN: &str = "token key:secret";

#[derive(Default)]
struct ErpServer {
    accounts: Mutex<HashMap<String, String>>,
    sessions: Mutex<HashMap<String, String>>,
    next_sid: AtomicU64,
    delay: Duration,
}

type Shared = Arc<ErpServer>;

#[derive(Deserialize)]
struct LoginBody {
    usr: String,
    pwd: String,
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|pair| pair.trim().strip_prefix("sid="))
        .map(str::to_string)
}

fn has_api_token(headers: &HeaderMap) -> bool {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some(API_TOKEN)
}

async fn login(State(erp): State<Shared>, Json(body): Json<LoginBody>) -> Response {
    let accepted = erp.accounts.lock().unwrap().get(&body.usr) == Some(&body.pwd);
    tokio::time::sleep(erp.delay).await;

    if !accepted {
        return (
            StatusCode::UNAUTHORIZED,
            [(SET_COOKIE, "sid=Guest; Path=/".to_string())],
            Json(json!({ "message": "Invalid login credentials" })),
        )
            .into_response();
    }

    let sid = format!("sid-{}", erp.next_sid.fetch_add(1, Ordering::SeqCst));
    erp.sessions
        .lock()
        .unwrap()
        .insert(sid.clone(), body.usr.clone());

    (
        StatusCode::OK,
        [(SET_COOKIE, format!("sid={}; Path=/; HttpOnly", sid))],
        Json(json!({ "message": "Logged In", "full_name": body.usr })),
    )
        .into_response()
}

async fn logged_user(State(erp): State<Shared>, headers: HeaderMap) -> Response {
    tokio::time::sleep(erp.delay).await;
    let user = session_id(&headers).and_then(|sid| erp.sessions.lock().unwrap().get(&sid).cloned());
    match user {
        Some(email) => Json(json!({ "message": email })).into_response(),
        None => StatusCode::FORBIDDEN.into_response(),
    }
}

async fn logout(State(erp): State<Shared>, headers: HeaderMap) -> Response {
    if let Some(sid) = session_id(&headers) {
        erp.sessions.lock().unwrap().remove(&sid);
    }
    Json(json!({})).into_response()
}

async fn find_user(
    State(erp): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !has_api_token(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if erp.accounts.lock().unwrap().contains_key(&name) {
        Json(json!({ "data": { "name": name, "email": name, "full_name": "Known" } }))
            .into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn create_user(
    State(erp): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !has_api_token(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let (Some(email), Some(password)) = (body["email"].as_str(), body["new_password"].as_str())
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    erp.accounts
        .lock()
        .unwrap()
        .insert(email.to_string(), password.to_string());
    Json(json!({ "data": { "name": email } })).into_response()
}

async fn update_user(
    State(erp): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !has_api_token(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let Some(password) = body["new_password"].as_str() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match erp.accounts.lock().unwrap().get_mut(&name) {
        Some(current) => {
            *current = password.to_string();
            Json(json!({ "data": { "name": name } })).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_erp(delay: Duration) -> (Shared, HttpErpClient) {
    let erp = Arc::new(ErpServer {
        delay,
        ..Default::default()
    });

    let app = Router::new()
        .route("/api/method/login", post(login))
        .route("/api/method/frappe.auth.get_logged_user", get(logged_user))
        .route("/api/method/logout", get(logout))
        .route("/api/resource/User", post(create_user))
        .route("/api/resource/User/:name", get(find_user).put(update_user))
        .with_state(erp.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let client = HttpErpClient::new(&ErpConfig {
        base_url: format!("http://{}", addr),
        api_key: "key".into(),
        api_secret: "secret".into(),
        timeout_seconds: 5,
    })
    .unwrap();

    (erp, client)
}

fn harness_for(client: HttpErpClient) -> Harness {
    Harness::with_erp(IdentitySynchronizer::new(
        Arc::new(client),
        Duration::from_secs(5),
    ))
}

#[tokio::test]
async fn test_http_client_round_trip() {
    let (erp, client) = spawn_erp(Duration::ZERO).await;

    assert_eq!(client.find_user("deck@harbor.test").await.unwrap(), None);

    let remote_id = client
        .create_user(&ErpProfile {
            name: "Deck".into(),
            email: "deck@harbor.test".into(),
            password: PASSWORD.into(),
        })
        .await
        .unwrap();
    assert_eq!(remote_id, "deck@harbor.test");

    let found = client.find_user("deck@harbor.test").await.unwrap().unwrap();
    assert_eq!(found.remote_id, remote_id);
    assert_eq!(found.full_name.as_deref(), Some("Known"));

    let identity = client
        .authenticate("deck@harbor.test", PASSWORD)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(identity.remote_id, remote_id);
    assert!(client
        .authenticate("deck@harbor.test", "Wrong-pass1!")
        .await
        .unwrap()
        .is_none());

    client.update_password(&remote_id, "Changed-pass2!").await.unwrap();
    assert!(client
        .authenticate("deck@harbor.test", "Changed-pass2!")
        .await
        .unwrap()
        .is_some());

    // Every login session was closed again.
    assert!(erp.sessions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_http_client_reports_status_errors() {
    let (_erp, client) = spawn_erp(Duration::ZERO).await;

    let err = client
        .update_password("ghost@harbor.test", PASSWORD)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"), "{}", err);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logins_keep_identities_apart() {
    let (erp, client) = spawn_erp(Duration::from_millis(20)).await;
    let harness = harness_for(client);

    let emails = ["alice@harbor.test", "bob@harbor.test"];
    for email in emails {
        let user = harness.signup("Crew", email).await;
        assert_eq!(user.external_ref.as_deref(), Some(email));
    }

    let mut handles = Vec::new();
    for i in 0..20 {
        let service = harness.service.clone();
        let email = emails[i % 2];
        handles.push(tokio::spawn(async move {
            (email, service.login(email, PASSWORD).await)
        }));
    }

    for handle in handles {
        let (email, result) = handle.await.unwrap();
        let outcome = result.unwrap();
        assert_eq!(outcome.user.email, email);
        let remote = outcome.external_user.expect("ERP accepted the login");
        assert_eq!(remote.email, email);
        assert_eq!(remote.remote_id, email);
        assert_eq!(outcome.user.external_ref.as_deref(), Some(email));
    }

    assert!(erp.sessions.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logins_on_just_unlocked_identity() {
    let (_erp, client) = spawn_erp(Duration::from_millis(10)).await;
    let harness = harness_for(client);
    let email = "carol@harbor.test";
    let user = harness.signup("Carol", email).await;

    for _ in 0..5 {
        assert!(harness.service.login(email, "Wrong-pass1!").await.is_err());
    }
    assert!(matches!(
        harness.service.login(email, PASSWORD).await.unwrap_err(),
        AuthError::AccountLocked
    ));

    harness
        .clock
        .advance(LockoutConfig::default().lock_duration().unwrap());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = harness.service.clone();
        handles.push(tokio::spawn(async move { service.login(email, PASSWORD).await }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.user.id, user.id);
    }

    let stored = harness.reload(&user).await;
    assert_eq!(stored.failed_login_attempts, 0);
    assert_eq!(stored.locked_until, None);
}
