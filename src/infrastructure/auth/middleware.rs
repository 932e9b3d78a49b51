//! Axum middleware enforcing the master's auth policy: allow-listed source
//! IPs pass straight through, everyone else must present valid Digest
//! credentials.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{ConnectInfo, State};
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::bypass::BypassList;
use super::digest::{Challenge, DigestCredentials};

pub struct AuthState {
    pub accounts: HashMap<String, String>,
    pub bypass: BypassList,
    pub realm: String,
    /// Nonces issued but not yet consumed. A real deployment would also
    /// expire these; this process-lifetime map matches the scale of a
    /// single master instance.
    pending_nonces: Mutex<Vec<String>>,
}

impl AuthState {
    pub fn new(accounts: HashMap<String, String>, bypass: BypassList, realm: impl Into<String>) -> Self {
        Self {
            accounts,
            bypass,
            realm: realm.into(),
            pending_nonces: Mutex::new(Vec::new()),
        }
    }

    fn issue_challenge(&self) -> Challenge {
        let challenge = Challenge::new(&self.realm);
        self.pending_nonces.lock().unwrap().push(challenge.nonce.clone());
        challenge
    }

    fn known_nonce(&self, nonce: &str) -> bool {
        self.pending_nonces.lock().unwrap().iter().any(|n| n == nonce)
    }
}

pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if state.bypass.allows(addr.ip()) {
        return next.run(request).await;
    }

    let method = request.method().as_str().to_string();
    let Some(header_value) = request.headers().get(header::AUTHORIZATION) else {
        return challenge_response(&state);
    };
    let Ok(header_str) = header_value.to_str() else {
        return challenge_response(&state);
    };
    let Some(creds) = DigestCredentials::parse(header_str) else {
        return challenge_response(&state);
    };

    if !state.known_nonce(&creds.nonce) {
        return challenge_response(&state);
    }

    let Some(password) = state.accounts.get(&creds.username) else {
        return challenge_response(&state);
    };

    if creds.verify(password, &method, &creds.nonce) {
        next.run(request).await
    } else {
        challenge_response(&state)
    }
}

fn challenge_response(state: &AuthState) -> Response {
    let challenge = state.issue_challenge();
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge.header_value())],
        "authentication required",
    )
        .into_response()
}
