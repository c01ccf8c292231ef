//! Login against the Auth0-fronted portal.
//!
//! The portal has no documented token API for third parties; login is the
//! same redirect walk a browser performs: `/authorize` with PKCE parameters,
//! the identifier and password form posts, then the callback redirect that
//! carries the authorization code. Redirects are never followed by the HTTP
//! client, each `Location` header is inspected here instead.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

use crate::constants::{
    AUTHORIZE_ENDPOINT, BACKEND_BASE_URL, CALLBACK_ENDPOINT, CLIENT_ID, CODE_CHALLENGE_METHOD,
    LOGIN_BASE_URL, LOGIN_IDENTIFIER_ENDPOINT, LOGIN_PASSWORD_ENDPOINT, OAUTH_TOKEN_ENDPOINT,
    WEBSITE_BASE_URL,
};
use crate::error::{Result, VeoliaError};

const AUTH0_CLIENT_JSON: &[u8] = br#"{"name": "auth0-react", "version": "1.11.0"}"#;

fn base64_url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64_url_encode(&bytes)
}

/// PKCE verifier/challenge pair plus the state and nonce for one login.
#[derive(Debug, Clone)]
pub(crate) struct PkceMaterial {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
    pub nonce: String,
}

impl PkceMaterial {
    pub fn generate() -> Self {
        let verifier = random_token();
        let challenge = base64_url_encode(&sha256(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
            state: random_token(),
            nonce: random_token(),
        }
    }
}

fn redirect_uri() -> String {
    format!("{WEBSITE_BASE_URL}{CALLBACK_ENDPOINT}")
}

/// Resolve a `Location` header against the login portal base.
fn parse_location(location: &str) -> Result<Url> {
    let base = Url::parse(LOGIN_BASE_URL)?;
    Ok(base.join(location)?)
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Outcome of the walk: the authorization code plus the verifier that must
/// accompany it in the token exchange.
#[derive(Debug)]
pub(crate) struct AuthorizationCode {
    pub code: String,
    pub verifier: String,
}

/// What one login-walk response tells us to do next.
#[derive(Debug)]
enum WalkStep {
    /// Follow the redirect to this target.
    Redirect(Url),
    /// The callback was reached, authorization code in hand.
    Code(String),
}

/// Map one response of the walk to the next step. A 400 on the password
/// form means rejected credentials; a 400 anywhere else (and any other
/// status) is an upstream failure.
fn walk_step(
    status: StatusCode,
    location: Option<&str>,
    at_password_step: bool,
) -> Result<WalkStep> {
    match status {
        StatusCode::FOUND => {
            let location = location
                .ok_or_else(|| VeoliaError::payload("redirect without Location header"))?;
            let target = parse_location(location)?;

            if target.path() == CALLBACK_ENDPOINT {
                let code = query_param(&target, "code").ok_or_else(|| {
                    VeoliaError::payload("authorization code not found in callback")
                })?;
                Ok(WalkStep::Code(code))
            } else {
                Ok(WalkStep::Redirect(target))
            }
        }
        StatusCode::BAD_REQUEST if at_password_step => Err(VeoliaError::InvalidCredentials),
        _ => Err(VeoliaError::UnexpectedStatus {
            context: "login walk",
            status,
        }),
    }
}

pub(crate) struct LoginFlow<'a> {
    http: &'a Client,
    username: &'a str,
    password: &'a str,
}

impl<'a> LoginFlow<'a> {
    pub fn new(http: &'a Client, username: &'a str, password: &'a str) -> Self {
        Self { http, username, password }
    }

    /// Walk authorize → identifier → password → callback and return the code.
    pub async fn run(&self) -> Result<AuthorizationCode> {
        let pkce = PkceMaterial::generate();
        info!("starting portal login walk");

        let mut response = self.authorize(&pkce).await?;
        let mut state = pkce.state.clone();
        let mut at_password_step = false;

        loop {
            let status = response.status();
            debug!(%status, "login walk response");
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);

            match walk_step(status, location.as_deref(), at_password_step)? {
                WalkStep::Code(code) => {
                    info!("authorization code received");
                    return Ok(AuthorizationCode {
                        code,
                        verifier: pkce.verifier.clone(),
                    });
                }
                WalkStep::Redirect(target) => {
                    if let Some(new_state) = query_param(&target, "state") {
                        state = new_state;
                    }
                    at_password_step = target.path() == LOGIN_PASSWORD_ENDPOINT;
                    response = self.follow(&target, &state).await?;
                }
            }
        }
    }

    async fn authorize(&self, pkce: &PkceMaterial) -> Result<reqwest::Response> {
        let url = format!("{LOGIN_BASE_URL}{AUTHORIZE_ENDPOINT}");
        debug!(%url, "GET authorize");
        let response = self
            .http
            .get(&url)
            .query(&[
                ("audience", BACKEND_BASE_URL),
                ("redirect_uri", &redirect_uri()),
                ("client_id", CLIENT_ID),
                ("scope", "openid profile email offline_access"),
                ("response_type", "code"),
                ("state", &pkce.state),
                ("nonce", &pkce.nonce),
                ("response_mode", "query"),
                ("code_challenge", &pkce.challenge),
                ("code_challenge_method", CODE_CHALLENGE_METHOD),
                ("auth0Client", &base64_url_encode(AUTH0_CLIENT_JSON)),
            ])
            .send()
            .await?;
        Ok(response)
    }

    /// Issue the request for one redirect target. The two login form posts
    /// carry the credentials; anything else is a plain GET.
    async fn follow(&self, target: &Url, state: &str) -> Result<reqwest::Response> {
        let url = target.as_str();

        match target.path() {
            LOGIN_IDENTIFIER_ENDPOINT => {
                debug!(%url, "POST login identifier");
                let form = [
                    ("state", state),
                    ("username", self.username),
                    ("js-available", "true"),
                    ("webauthn-available", "false"),
                    ("is-brave", "false"),
                    ("webauthn-platform-available", "false"),
                    ("action", "default"),
                ];
                Ok(self
                    .http
                    .post(url)
                    .header(reqwest::header::CACHE_CONTROL, "no-cache")
                    .form(&form)
                    .send()
                    .await?)
            }
            LOGIN_PASSWORD_ENDPOINT => {
                // The password itself is never logged.
                debug!(%url, "POST login password");
                let form = [
                    ("state", state),
                    ("username", self.username),
                    ("password", self.password),
                    ("action", "default"),
                ];
                Ok(self
                    .http
                    .post(url)
                    .header(reqwest::header::CACHE_CONTROL, "no-cache")
                    .form(&form)
                    .send()
                    .await?)
            }
            _ => {
                debug!(%url, "GET login walk step");
                Ok(self.http.get(url).send().await?)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: i64,
}

/// Bearer token with its expiry instant.
#[derive(Debug, Clone)]
pub(crate) struct AccessToken {
    pub token: String,
    pub expiration: DateTime<Utc>,
}

/// Exchange the authorization code for a bearer token (PKCE grant).
pub(crate) async fn exchange_code(http: &Client, auth: &AuthorizationCode) -> Result<AccessToken> {
    let url = format!("{LOGIN_BASE_URL}{OAUTH_TOKEN_ENDPOINT}");
    info!("requesting access token");

    let response = http
        .post(&url)
        .json(&serde_json::json!({
            "client_id": CLIENT_ID,
            "grant_type": "authorization_code",
            "code_verifier": auth.verifier,
            "code": auth.code,
            "redirect_uri": redirect_uri(),
        }))
        .send()
        .await?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(VeoliaError::UnexpectedStatus {
            context: "token exchange",
            status,
        });
    }

    let parsed: TokenResponse = serde_json::from_str(&response.text().await?)?;
    let token = parsed
        .access_token
        .ok_or_else(|| VeoliaError::payload("access token not found in token response"))?;

    info!("access token received");
    Ok(AccessToken {
        token,
        expiration: Utc::now() + Duration::seconds(parsed.expires_in),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_base64url_sha256_of_verifier() {
        // SHA-256("test"), base64url without padding.
        let challenge = base64_url_encode(&sha256(b"test"));
        assert_eq!(challenge, "n4bQgYhMfWWaL-qgxVrQFaO_TxsrC4Is0V1sFbDwCgg");
    }

    #[test]
    fn generated_material_is_consistent() {
        let pkce = PkceMaterial::generate();
        assert_eq!(pkce.challenge, base64_url_encode(&sha256(pkce.verifier.as_bytes())));
        // 32 random bytes -> 43 chars of unpadded base64url.
        assert_eq!(pkce.verifier.len(), 43);
        assert_ne!(pkce.state, pkce.nonce);
    }

    #[test]
    fn material_is_unique_per_login() {
        let a = PkceMaterial::generate();
        let b = PkceMaterial::generate();
        assert_ne!(a.verifier, b.verifier);
    }

    #[test]
    fn relative_location_resolves_against_portal() {
        let url = parse_location("/u/login/identifier?state=abc123").unwrap();
        assert_eq!(url.path(), LOGIN_IDENTIFIER_ENDPOINT);
        assert_eq!(query_param(&url, "state").as_deref(), Some("abc123"));
        assert!(url.as_str().starts_with(LOGIN_BASE_URL));
    }

    #[test]
    fn absolute_location_is_kept() {
        let url = parse_location("https://www.eau.veolia.fr/callback?code=xyz&state=s").unwrap();
        assert_eq!(url.path(), CALLBACK_ENDPOINT);
        assert_eq!(query_param(&url, "code").as_deref(), Some("xyz"));
    }

    #[test]
    fn missing_query_param_is_none() {
        let url = parse_location("/callback").unwrap();
        assert_eq!(query_param(&url, "code"), None);
    }

    #[test]
    fn rejected_password_maps_to_invalid_credentials() {
        let err = walk_step(StatusCode::BAD_REQUEST, None, true).unwrap_err();
        assert!(matches!(err, VeoliaError::InvalidCredentials));
    }

    #[test]
    fn bad_request_outside_password_step_is_an_upstream_failure() {
        let err = walk_step(StatusCode::BAD_REQUEST, None, false).unwrap_err();
        assert!(matches!(
            err,
            VeoliaError::UnexpectedStatus { status: StatusCode::BAD_REQUEST, .. }
        ));
    }

    #[test]
    fn unexpected_status_fails_the_walk() {
        let err = walk_step(StatusCode::OK, None, false).unwrap_err();
        assert!(matches!(err, VeoliaError::UnexpectedStatus { .. }));
    }

    #[test]
    fn callback_redirect_yields_the_code() {
        let step = walk_step(
            StatusCode::FOUND,
            Some("https://www.eau.veolia.fr/callback?code=xyz&state=s"),
            true,
        )
        .unwrap();
        assert!(matches!(step, WalkStep::Code(code) if code == "xyz"));
    }

    #[test]
    fn intermediate_redirect_is_followed() {
        let step =
            walk_step(StatusCode::FOUND, Some("/u/login/password?state=abc"), false).unwrap();
        match step {
            WalkStep::Redirect(target) => assert_eq!(target.path(), LOGIN_PASSWORD_ENDPOINT),
            other => panic!("expected a redirect, got {other:?}"),
        }
    }

    #[test]
    fn redirect_without_location_is_a_payload_error() {
        let err = walk_step(StatusCode::FOUND, None, false).unwrap_err();
        assert!(matches!(err, VeoliaError::UnexpectedPayload(_)));
    }

    #[test]
    fn callback_without_code_is_a_payload_error() {
        let err = walk_step(
            StatusCode::FOUND,
            Some("https://www.eau.veolia.fr/callback?state=s"),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, VeoliaError::UnexpectedPayload(_)));
    }
}
