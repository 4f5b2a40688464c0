use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use nl_auth::{
    Account, AccountStore, AuthConfig, AuthError, AuthTokens, Authenticator, LoginMethod,
    LoginPrompt, LoginState, MemoryAccountStore, ProfileSummary, Stage,
};
use serde_json::json;
use wiremock::matchers::{any, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_PATH: &str = "/consumers/oauth2/v2.0/token";

fn authenticator(server: &MockServer, store: Arc<MemoryAccountStore>) -> Authenticator {
    let mut config = AuthConfig::default().with_base_url(&server.uri());
    config.callback_addr = SocketAddr::from(([127, 0, 0, 1], 0));
    Authenticator::new(config, store).unwrap()
}

async fn mount_device_code(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/consumers/oauth2/v2.0/devicecode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "device-123",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://www.microsoft.com/link",
            "expires_in": 900,
            "interval": 1
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("device_code=device-123"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "authorization_pending",
            "error_description": "waiting for user"
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("device_code=device-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ms-access",
            "refresh_token": "ms-refresh",
            "expires_in": 3600,
            "token_type": "bearer"
        })))
        .mount(server)
        .await;
}

async fn mount_delegation(server: &MockServer, xsts_claims: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/user/authenticate"))
        .and(body_string_contains("\"RpsTicket\":\"d=ms-"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Token": "xbl-token",
            "DisplayClaims": { "xui": [ { "uhs": "hash-1" } ] }
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/xsts/authorize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Token": "xsts-token",
            "DisplayClaims": { "xui": xsts_claims }
        })))
        .mount(server)
        .await;
}

async fn mount_game_auth(server: &MockServer, access_token: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/authentication/login_with_xbox"))
        .and(body_string_contains("XBL3.0 x=hash-2;xsts-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "username": "00000000-0000-0000-0000-000000000000",
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 86400
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_entitlements(server: &MockServer, items: serde_json::Value, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/entitlements/mcstore"))
        .and(header("Authorization", "Bearer mc-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": items })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_profile(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/minecraft/profile"))
        .and(header("Authorization", "Bearer mc-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "069a79f444e94726a5befca90e38aaf5",
            "name": "Notch",
            "skins": [],
            "capes": []
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn stored_account() -> Account {
    let long_ago = Utc::now() - TimeDelta::days(2);
    Account {
        tokens: AuthTokens {
            ms_access_token: "ms-old".to_string(),
            ms_refresh_token: "refresh-old".to_string(),
            ms_expiry: long_ago,
            mc_access_token: "mc-old".to_string(),
            mc_expiry: long_ago,
        },
        profile: ProfileSummary {
            id: "069a79f444e94726a5befca90e38aaf5".to_string(),
            name: "Notch".to_string(),
        },
    }
}

#[tokio::test]
async fn device_login_runs_whole_chain_and_persists() {
    let server = MockServer::start().await;
    mount_device_code(&server).await;
    mount_delegation(&server, json!([{ "uhs": "hash-2" }])).await;
    mount_game_auth(&server, "mc-token", 1).await;
    mount_entitlements(&server, json!([{ "name": "product_minecraft" }]), 1).await;
    mount_profile(&server, 1).await;

    let store = Arc::new(MemoryAccountStore::new());
    let auth = authenticator(&server, store.clone());

    let login = auth.begin(LoginMethod::DeviceCode).await.unwrap();
    assert_eq!(
        login.prompt(),
        LoginPrompt::EnterCode {
            user_code: "ABCD-EFGH".to_string(),
            verification_url: "https://www.microsoft.com/link".to_string(),
        }
    );
    let state = login.state();

    let before = Utc::now();
    let account = login.wait_for_login(std::future::pending()).await.unwrap();
    let after = Utc::now();

    assert_eq!(account.profile.name, "Notch");
    assert_eq!(account.tokens.ms_access_token, "ms-access");
    assert_eq!(account.tokens.ms_refresh_token, "ms-refresh");
    assert_eq!(account.tokens.mc_access_token, "mc-token");
    assert!(account.tokens.ms_expiry >= before + TimeDelta::seconds(3600));
    assert!(account.tokens.ms_expiry <= after + TimeDelta::seconds(3600));
    assert!(account.tokens.mc_expiry >= before + TimeDelta::seconds(86400));
    assert!(account.tokens.mc_expiry <= after + TimeDelta::seconds(86400));

    assert_eq!(*state.borrow(), LoginState::Persisted);
    assert_eq!(store.load().await.unwrap(), Some(account));
}

#[tokio::test]
async fn missing_ownership_stops_before_profile() {
    let server = MockServer::start().await;
    mount_device_code(&server).await;
    mount_delegation(&server, json!([{ "uhs": "hash-2" }])).await;
    mount_game_auth(&server, "mc-token", 1).await;
    mount_entitlements(&server, json!([{ "name": "product_dungeons" }]), 1).await;
    mount_profile(&server, 0).await;

    let store = Arc::new(MemoryAccountStore::new());
    let auth = authenticator(&server, store.clone());

    let login = auth.start_device_login().await.unwrap();
    let err = login
        .wait_for_login(std::future::pending())
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Ownership);
    assert!(err.is_ownership_denied());
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn empty_xsts_claims_never_reach_game_auth() {
    let server = MockServer::start().await;
    mount_device_code(&server).await;
    mount_delegation(&server, json!([])).await;
    mount_game_auth(&server, "mc-token", 0).await;

    let store = Arc::new(MemoryAccountStore::new());
    let auth = authenticator(&server, store.clone());

    let login = auth.start_device_login().await.unwrap();
    let state = login.state();
    let err = login
        .wait_for_login(std::future::pending())
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Xsts);
    assert!(matches!(err.source, AuthError::EmptyClaims));
    assert_eq!(*state.borrow(), LoginState::Failed(Stage::Xsts));
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn refresh_replaces_tokens_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-old"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ms-new",
            "refresh_token": "refresh-new",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_delegation(&server, json!([{ "uhs": "hash-2" }])).await;
    mount_game_auth(&server, "mc-new", 1).await;
    mount_entitlements(&server, json!([]), 0).await;
    mount_profile(&server, 0).await;

    let old = stored_account();
    let store = Arc::new(MemoryAccountStore::with_account(old.clone()));
    let auth = authenticator(&server, store.clone());

    let refreshed = auth.refresh_login(&old).await.unwrap();

    assert_eq!(refreshed.profile, old.profile);
    assert_eq!(refreshed.tokens.ms_access_token, "ms-new");
    assert_eq!(refreshed.tokens.ms_refresh_token, "refresh-new");
    assert_eq!(refreshed.tokens.mc_access_token, "mc-new");
    assert!(!refreshed.needs_refresh());
    assert_eq!(store.load().await.unwrap(), Some(refreshed));
}

#[tokio::test]
async fn refresh_failure_is_tagged_and_leaves_store_alone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token expired"
        })))
        .mount(&server)
        .await;

    let old = stored_account();
    let store = Arc::new(MemoryAccountStore::with_account(old.clone()));
    let auth = authenticator(&server, store.clone());

    let err = auth.refresh_login(&old).await.unwrap_err();

    assert_eq!(err.stage, Stage::FirstParty);
    assert!(err.to_string().contains("invalid_grant"), "{err}");
    assert_eq!(store.load().await.unwrap(), Some(old));
}

#[tokio::test]
async fn redirect_login_exchanges_captured_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=browser-code"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ms-access",
            "refresh_token": "ms-refresh",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_delegation(&server, json!([{ "uhs": "hash-2" }])).await;
    mount_game_auth(&server, "mc-token", 1).await;
    mount_entitlements(&server, json!([{ "name": "game_minecraft" }]), 1).await;
    mount_profile(&server, 1).await;

    let store = Arc::new(MemoryAccountStore::new());
    let auth = authenticator(&server, store.clone());

    let nl_auth::PendingLogin::Redirect(login) = auth.begin(LoginMethod::Redirect).await.unwrap()
    else {
        panic!("Expected a redirect login");
    };
    let authorize = login.authorize_url().clone();
    assert!(authorize.as_str().contains("code_challenge_method=S256"));

    let callback = login.callback_url().unwrap();
    let wait = tokio::spawn(login.wait_for_login(std::future::pending()));

    let page = reqwest::get(format!("{callback}?code=browser-code"))
        .await
        .unwrap();
    assert!(page.status().is_success());

    let account = wait.await.unwrap().unwrap();
    assert_eq!(account.profile.name, "Notch");
    assert_eq!(store.load().await.unwrap(), Some(account));
}

#[tokio::test]
async fn cancelled_redirect_login_is_first_party_failure() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryAccountStore::new());
    let auth = authenticator(&server, store);

    let login = auth.start_redirect_login().await.unwrap();
    let err = login.wait_for_login(async {}).await.unwrap_err();

    assert_eq!(err.stage, Stage::FirstParty);
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn restore_falls_back_to_login_when_refresh_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let expired = stored_account();
    assert!(expired.needs_refresh());
    let store = Arc::new(MemoryAccountStore::with_account(expired.clone()));
    let auth = authenticator(&server, store.clone());

    assert_eq!(auth.restore_account().await, None);
    assert_eq!(store.load().await.unwrap(), Some(expired));
}

#[tokio::test]
async fn restore_returns_live_account_without_network() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let in_a_day = Utc::now() + TimeDelta::days(1);
    let mut live = stored_account();
    live.tokens.ms_expiry = in_a_day;
    live.tokens.mc_expiry = in_a_day;
    let store = Arc::new(MemoryAccountStore::with_account(live.clone()));
    let auth = authenticator(&server, store);

    assert_eq!(auth.restore_account().await, Some(live));
}

#[tokio::test]
async fn restore_without_saved_account_requires_login() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let auth = authenticator(&server, Arc::new(MemoryAccountStore::new()));

    assert_eq!(auth.restore_account().await, None);
}
