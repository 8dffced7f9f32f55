// Copyright 2022 Paolo Galeone <nessuno@nerdz.eu>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! OAuth2 "installed application" flow for the Drive remote.
//!
//! A cached token is used while it is valid, refreshed when it expires and,
//! when nothing usable is cached, the operator is asked to grant access in the
//! browser. The authorization code comes back either on a loopback listener or
//! pasted on stdin.

use std::fmt;
use std::future::IntoFuture;
use std::io;
use std::path::{Path, PathBuf};

use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use url::Url;

use log::{debug, info, warn};

use crate::config::DriveConfig;

pub const SCOPE: &str = "https://www.googleapis.com/auth/drive";
const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug)]
pub enum Error {
    MissingClientCredentials,
    Io(io::Error),
    Http(reqwest::Error),
    Cache(serde_json::Error),
    Rejected(String),
    Denied(String),
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Http(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Cache(error)
    }
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingClientCredentials => write!(
                f,
                "Missing OAuth client id/secret. Set KATAPULT_CLIENT_ID and \
                KATAPULT_CLIENT_SECRET or the [drive] section of the configuration"
            ),
            Error::Io(error) => write!(f, "Error while reading/writing: {}", error),
            Error::Http(error) => write!(f, "Token request failed: {}", error),
            Error::Cache(error) => write!(f, "Invalid credentials cache: {}", error),
            Error::Rejected(msg) => write!(f, "Token endpoint rejected the request: {}", msg),
            Error::Denied(msg) => write!(f, "Authorization denied: {}", msg),
        }
    }
}

/// Token as persisted in the credentials cache.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// A token is considered expired one minute before its actual expiry.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(60) > now
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

/// How the authorization code reaches us during the interactive flow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Flow {
    LocalWebserver { port: u16 },
    Paste { port: u16 },
}

impl Flow {
    fn redirect_uri(&self) -> String {
        match self {
            Flow::LocalWebserver { port } | Flow::Paste { port } => {
                format!("http://localhost:{}/", port)
            }
        }
    }
}

#[derive(Clone)]
struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
}

impl OAuthClient {
    async fn request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, Error> {
        let response = self.http.post(TOKEN_URL).form(params).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Rejected(format!("{} {}", status, body)));
        }
        Ok(response.json::<TokenResponse>().await?)
    }

    async fn exchange(&self, code: &str, redirect_uri: &str) -> Result<Token, Error> {
        let response = self
            .request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ])
            .await?;
        Ok(Token {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: Utc::now() + Duration::seconds(response.expires_in),
        })
    }

    async fn refresh(&self, token: &Token) -> Result<Token, Error> {
        let refresh_token = match &token.refresh_token {
            Some(refresh_token) => refresh_token,
            None => return Err(Error::Denied(String::from("no refresh token cached"))),
        };
        let response = self
            .request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ])
            .await?;
        // Google does not send the refresh token back on refresh.
        Ok(Token {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or_else(|| token.refresh_token.clone()),
            expires_at: Utc::now() + Duration::seconds(response.expires_in),
        })
    }

    fn consent_url(&self, redirect_uri: &str) -> Url {
        // AUTH_URL is a constant, parsing can't fail.
        Url::parse_with_params(
            AUTH_URL,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", SCOPE),
                ("response_type", "code"),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .unwrap()
    }
}

pub struct Authenticator {
    oauth: OAuthClient,
    cache: PathBuf,
    flow: Flow,
}

impl Authenticator {
    pub fn new(config: &DriveConfig, flow: Flow) -> Result<Authenticator, Error> {
        let client_id = std::env::var("KATAPULT_CLIENT_ID")
            .ok()
            .or_else(|| config.client_id.clone());
        let client_secret = std::env::var("KATAPULT_CLIENT_SECRET")
            .ok()
            .or_else(|| config.client_secret.clone());
        let (client_id, client_secret) = match (client_id, client_secret) {
            (Some(id), Some(secret)) => (id, secret),
            _ => return Err(Error::MissingClientCredentials),
        };

        Ok(Authenticator {
            oauth: OAuthClient {
                http: reqwest::Client::new(),
                client_id,
                client_secret,
            },
            cache: PathBuf::from(shellexpand::tilde(&config.credentials).to_string()),
            flow,
        })
    }

    /// Returns an authenticated session, running the interactive flow only
    /// when the cache holds nothing usable.
    pub async fn session(self) -> Result<Session, Error> {
        let token = match load_cache(&self.cache).await? {
            Some(token) if token.is_fresh(Utc::now()) => {
                debug!("Using cached credentials from {}", self.cache.display());
                token
            }
            Some(token) => match self.oauth.refresh(&token).await {
                Ok(token) => token,
                Err(error) => {
                    warn!("Unable to refresh cached credentials: {}", error);
                    self.interactive().await?
                }
            },
            None => self.interactive().await?,
        };
        store_cache(&self.cache, &token).await?;

        Ok(Session {
            oauth: self.oauth,
            cache: self.cache,
            token: Mutex::new(token),
        })
    }

    async fn interactive(&self) -> Result<Token, Error> {
        let redirect_uri = self.flow.redirect_uri();
        let url = self.oauth.consent_url(&redirect_uri);
        println!("Go to the following link in your browser:\n\n    {}\n", url);

        let code = match self.flow {
            Flow::LocalWebserver { port } => receive_code(port).await?,
            Flow::Paste { .. } => {
                println!("Enter the verification code (or the whole redirected URL):");
                let mut line = String::new();
                BufReader::new(tokio::io::stdin())
                    .read_line(&mut line)
                    .await?;
                code_from_input(&line)?
            }
        };
        let token = self.oauth.exchange(&code, &redirect_uri).await?;
        println!("Storing credentials to {}", self.cache.display());
        Ok(token)
    }
}

/// Authenticated session handle shared by every remote request.
pub struct Session {
    oauth: OAuthClient,
    cache: PathBuf,
    token: Mutex<Token>,
}

impl Session {
    #[cfg(test)]
    pub fn fixed(access_token: &str) -> Session {
        Session {
            oauth: OAuthClient {
                http: reqwest::Client::new(),
                client_id: String::new(),
                client_secret: String::new(),
            },
            cache: PathBuf::new(),
            token: Mutex::new(Token {
                access_token: String::from(access_token),
                refresh_token: None,
                expires_at: Utc::now() + Duration::hours(1),
            }),
        }
    }

    /// Current access token, refreshed first when it is about to expire.
    pub async fn bearer(&self) -> Result<String, Error> {
        let mut token = self.token.lock().await;
        if !token.is_fresh(Utc::now()) {
            info!("Access token expired, refreshing");
            *token = self.oauth.refresh(&token).await?;
            store_cache(&self.cache, &token).await?;
        }
        Ok(token.access_token.clone())
    }
}

async fn load_cache(path: &Path) -> Result<Option<Token>, Error> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = fs::read_to_string(path).await?;
    match serde_json::from_str(&txt) {
        Ok(token) => Ok(Some(token)),
        Err(error) => {
            warn!("Ignoring credentials cache {}: {}", path.display(), error);
            Ok(None)
        }
    }
}

async fn store_cache(path: &Path, token: &Token) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }
    fs::write(path, serde_json::to_vec(token)?).await?;
    Ok(())
}

/// Serves the loopback redirect URI until the browser lands on it, then
/// returns the authorization code from its query string.
async fn receive_code(port: u16) -> Result<String, Error> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Waiting for the authorization redirect on port {}", port);

    let (sender, mut receiver) = mpsc::channel(1);
    let (stop, stopped) = oneshot::channel::<()>();
    let app = Router::new().route("/", get(redirected)).with_state(sender);
    let server = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = stopped.await;
        })
        .into_future();
    let redirect = async move {
        let result = receiver.recv().await;
        let _ = stop.send(());
        result
    };

    let (served, result) = tokio::join!(server, redirect);
    served?;
    match result {
        Some(result) => result,
        None => Err(Error::Denied(String::from("no authorization redirect received"))),
    }
}

async fn redirected(
    State(sender): State<mpsc::Sender<Result<String, Error>>>,
    Query(params): Query<Vec<(String, String)>>,
) -> &'static str {
    let result = code_from_pairs(params);
    let body = match result {
        Ok(_) => "The authentication flow has completed. You may close this window.",
        Err(_) => "Authentication failed. Check the terminal for details.",
    };
    let _ = sender.send(result).await;
    body
}

fn code_from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Result<String, Error> {
    let mut code = None;
    for (key, value) in pairs {
        match key.as_str() {
            "code" => code = Some(value),
            "error" => return Err(Error::Denied(value)),
            _ => {}
        }
    }
    code.ok_or_else(|| Error::Denied(String::from("no authorization code in redirect")))
}

fn code_from_input(input: &str) -> Result<String, Error> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::Denied(String::from("no verification code entered")));
    }
    match Url::parse(input) {
        Ok(url) => code_from_pairs(url.query_pairs().into_owned()),
        Err(_) => Ok(String::from(input)),
    }
}
