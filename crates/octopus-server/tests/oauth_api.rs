//! OAuth2 authorization-code + PKCE flow, including the abuse cases.

mod common;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use common::TestApp;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use url::Url;

const REDIRECT_URI: &str = "https://app.example/callback";

async fn register_app(app: &TestApp, client_type: &str) -> Value {
    let workspace = app.create_workspace("W").await;
    let workspace_id = workspace["id"].as_str().unwrap();
    let response = app
        .post_json(
            &format!("/api/v1/workspaces/{workspace_id}/apps"),
            json!({
                "name": "Viewer App",
                "client_type": client_type,
                "redirect_uris": [REDIRECT_URI],
            }),
            None,
        )
        .await;
    assert_eq!(response.status(), 201, "register app");
    response.json().await.unwrap()
}

fn pkce_pair() -> (String, String) {
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string();
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

/// Drive /oauth/authorize and pull the code out of the redirect.
async fn obtain_code(app: &TestApp, client_id: &str, challenge: &str) -> String {
    let response = app
        .get(
            &format!(
                "/oauth/authorize?response_type=code&client_id={client_id}\
                 &redirect_uri={REDIRECT_URI}&state=xyz\
                 &code_challenge={challenge}&code_challenge_method=S256"
            ),
            None,
        )
        .await;
    assert_eq!(response.status(), 302);
    let location = Url::parse(response.headers()["location"].to_str().unwrap()).unwrap();
    assert!(location.as_str().starts_with(REDIRECT_URI));
    let mut code = None;
    let mut state = None;
    for (key, value) in location.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }
    assert_eq!(state.as_deref(), Some("xyz"));
    code.expect("authorize redirect carries a code")
}

#[tokio::test]
async fn public_client_pkce_flow_issues_a_usable_token() {
    let app = TestApp::spawn().await;
    let registered = register_app(&app, "public").await;
    let client_id = registered["client_id"].as_str().unwrap();
    let (verifier, challenge) = pkce_pair();

    let code = obtain_code(&app, client_id, &challenge).await;

    let response = app
        .client
        .post(app.url("/oauth/token"))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", client_id),
            ("code_verifier", &verifier),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let token: Value = response.json().await.unwrap();
    assert_eq!(token["token_type"], "Bearer");
    assert_eq!(token["expires_in"], 3600);
    assert_eq!(token["scope"], "read write");

    // The issued token authenticates API requests.
    let access_token = token["access_token"].as_str().unwrap();
    let me = app.get("/api/v1/users/me", Some(access_token)).await;
    assert_eq!(me.status(), 200);
    let me: Value = me.json().await.unwrap();
    assert_eq!(me["subject"], "dev-user");
}

#[tokio::test]
async fn replayed_code_yields_invalid_grant() {
    // S2: the second exchange of the same code must fail.
    let app = TestApp::spawn().await;
    let registered = register_app(&app, "public").await;
    let client_id = registered["client_id"].as_str().unwrap();
    let (verifier, challenge) = pkce_pair();
    let code = obtain_code(&app, client_id, &challenge).await;

    let form = [
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", REDIRECT_URI),
        ("client_id", client_id),
        ("code_verifier", verifier.as_str()),
    ];
    let first = app
        .client
        .post(app.url("/oauth/token"))
        .form(&form)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);

    let replay = app
        .client
        .post(app.url("/oauth/token"))
        .form(&form)
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status(), 400);
    let body: Value = replay.json().await.unwrap();
    assert_eq!(body["error"], "invalid_grant");
    assert!(body["error_description"]
        .as_str()
        .unwrap()
        .contains("already been used"));
}

#[tokio::test]
async fn unregistered_redirect_uri_never_redirects() {
    // S3: open-redirect attempt gets a plain 400 with no Location header.
    let app = TestApp::spawn().await;
    let registered = register_app(&app, "public").await;
    let client_id = registered["client_id"].as_str().unwrap();
    let (_, challenge) = pkce_pair();

    let response = app
        .get(
            &format!(
                "/oauth/authorize?response_type=code&client_id={client_id}\
                 &redirect_uri=https://attacker.example/cb\
                 &code_challenge={challenge}&code_challenge_method=S256"
            ),
            None,
        )
        .await;
    assert_eq!(response.status(), 400);
    assert!(response.headers().get("location").is_none());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn public_client_without_pkce_redirects_with_error() {
    // S4: the registered redirect URI receives error=invalid_request and a
    // description naming code_challenge.
    let app = TestApp::spawn().await;
    let registered = register_app(&app, "public").await;
    let client_id = registered["client_id"].as_str().unwrap();

    let response = app
        .get(
            &format!(
                "/oauth/authorize?response_type=code&client_id={client_id}\
                 &redirect_uri={REDIRECT_URI}&state=s4"
            ),
            None,
        )
        .await;
    assert_eq!(response.status(), 302);
    let location = Url::parse(response.headers()["location"].to_str().unwrap()).unwrap();
    assert!(location.as_str().starts_with(REDIRECT_URI));

    let pairs: Vec<(String, String)> = location
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    assert!(pairs.contains(&("error".into(), "invalid_request".into())));
    let description = pairs
        .iter()
        .find(|(k, _)| k == "error_description")
        .map(|(_, v)| v.as_str())
        .unwrap();
    assert!(description.contains("code_challenge"));
}

#[tokio::test]
async fn wrong_verifier_is_refused() {
    let app = TestApp::spawn().await;
    let registered = register_app(&app, "public").await;
    let client_id = registered["client_id"].as_str().unwrap();
    let (_, challenge) = pkce_pair();
    let code = obtain_code(&app, client_id, &challenge).await;

    let response = app
        .client
        .post(app.url("/oauth/token"))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", client_id),
            ("code_verifier", "completely-wrong-verifier-value-aaaaaaaa"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn expired_code_is_refused() {
    let app = TestApp::spawn_with(|config| config.auth.code_ttl_secs = 0).await;
    let registered = register_app(&app, "public").await;
    let client_id = registered["client_id"].as_str().unwrap();
    let (verifier, challenge) = pkce_pair();
    let code = obtain_code(&app, client_id, &challenge).await;

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let response = app
        .client
        .post(app.url("/oauth/token"))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", client_id),
            ("code_verifier", verifier.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_grant");
    assert!(body["error_description"].as_str().unwrap().contains("expired"));
}

#[tokio::test]
async fn confidential_client_requires_its_secret() {
    let app = TestApp::spawn().await;
    let registered = register_app(&app, "confidential").await;
    let client_id = registered["client_id"].as_str().unwrap().to_string();
    let client_secret = registered["client_secret"].as_str().unwrap().to_string();
    let (verifier, challenge) = pkce_pair();
    let code = obtain_code(&app, &client_id, &challenge).await;

    // Missing secret -> 401 invalid_client.
    let response = app
        .client
        .post(app.url("/oauth/token"))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", client_id.as_str()),
            ("code_verifier", verifier.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_client");

    // With the secret the same code still works: client auth failures must
    // not burn the code.
    let response = app
        .client
        .post(app.url("/oauth/token"))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("code_verifier", verifier.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn unknown_scope_redirects_with_invalid_scope() {
    let app = TestApp::spawn().await;
    let registered = register_app(&app, "public").await;
    let client_id = registered["client_id"].as_str().unwrap();
    let (_, challenge) = pkce_pair();

    let response = app
        .get(
            &format!(
                "/oauth/authorize?response_type=code&client_id={client_id}\
                 &redirect_uri={REDIRECT_URI}&scope=read%20admin\
                 &code_challenge={challenge}&code_challenge_method=S256"
            ),
            None,
        )
        .await;
    assert_eq!(response.status(), 302);
    let location = Url::parse(response.headers()["location"].to_str().unwrap()).unwrap();
    assert!(location
        .query_pairs()
        .any(|(k, v)| k == "error" && v == "invalid_scope"));
}

#[tokio::test]
async fn bad_grant_type_is_unsupported() {
    let app = TestApp::spawn().await;
    let response = app
        .client
        .post(app.url("/oauth/token"))
        .form(&[("grant_type", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unsupported_grant_type");
}
