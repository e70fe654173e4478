use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::client::{Credential, JiraClient};
use crate::config::{AuthMode, ConnectionConfig};
use crate::error::{Error, Result};
use crate::token_store::{FileTokenStore, PersistedRefreshToken, TokenStore};

/// トークンエンドポイントのレスポンス
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
}

/// 有効期限付きでキャッシュされたアクセストークン
#[derive(Debug, Clone)]
struct CachedAccessToken {
    token: String,
    expires_at: DateTime<Utc>,
    client: JiraClient,
}

impl CachedAccessToken {
    fn is_live(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// リフレッシュフローの可変状態
///
/// ローテーション済みリフレッシュトークンはここにのみ保持され、
/// `refresh_lock` を取得した1タスクだけが更新する。
#[derive(Debug, Default)]
struct RefreshState {
    rotated_refresh_token: Option<String>,
}

/// 接続ごとの資格情報ライフサイクル管理
///
/// - Basic / Personal Access Token: 不変なのでクライアントを一度だけ構築してキャッシュする
/// - OAuth2.0(3LO): アクセストークンをTTL付きでキャッシュし、期限切れ時に
///   リフレッシュトークンフローで再取得する
///
/// リフレッシュトークンは使い捨て（使用のたびにローテーション）のため、
/// 同時リクエストが各自でトークンエンドポイントを叩くと互いの結果を
/// 無効化してしまう。リフレッシュは `refresh_lock` で直列化し、ロック取得後に
/// キャッシュを再確認することで1回のフローに合流させる。
pub struct CredentialManager {
    config: ConnectionConfig,
    token_store: Arc<dyn TokenStore>,
    static_client: RwLock<Option<JiraClient>>,
    cached_token: RwLock<Option<CachedAccessToken>>,
    refresh_lock: Mutex<RefreshState>,
    http: reqwest::Client,
}

impl CredentialManager {
    /// 設定を検証してマネージャを作成
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let token_store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(&config.token_file));
        Ok(Self {
            config,
            token_store,
            static_client: RwLock::new(None),
            cached_token: RwLock::new(None),
            refresh_lock: Mutex::new(RefreshState::default()),
            http: reqwest::Client::new(),
        })
    }

    /// トークンストアを差し替え
    pub fn with_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = store;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// 認証済みクライアントを取得
    ///
    /// 静的な資格情報ではプロセス存続中キャッシュされた同一クライアントを返し、
    /// OAuthモードでは必要に応じてアクセストークンを再取得する。
    pub async fn client(&self) -> Result<JiraClient> {
        match self.config.auth_mode() {
            AuthMode::Basic | AuthMode::PersonalToken => self.static_client().await,
            AuthMode::OAuthRefresh => self.oauth_client().await,
        }
    }

    /// 現在キャッシュされているアクセストークン（テスト・診断用）
    pub async fn cached_access_token(&self) -> Option<String> {
        self.cached_token
            .read()
            .await
            .as_ref()
            .filter(|t| t.is_live())
            .map(|t| t.token.clone())
    }

    async fn static_client(&self) -> Result<JiraClient> {
        if let Some(client) = self.static_client.read().await.as_ref() {
            return Ok(client.clone());
        }

        let mut slot = self.static_client.write().await;
        // 書き込みロック待ちの間に他タスクが構築済みの場合がある
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let missing = |name: &str| {
            Error::ConfigurationMissing(format!(
                "'{}' must be set in the connection configuration",
                name
            ))
        };
        let credential = match self.config.auth_mode() {
            AuthMode::PersonalToken => Credential::Bearer {
                token: self
                    .config
                    .personal_access_token
                    .clone()
                    .ok_or_else(|| missing("personal_access_token"))?,
            },
            _ => Credential::Basic {
                username: self.config.username.clone().ok_or_else(|| missing("username"))?,
                secret: self.config.token.clone().ok_or_else(|| missing("token"))?,
            },
        };

        let client = JiraClient::new(&self.config.base_url, &credential)?;
        *slot = Some(client.clone());
        Ok(client)
    }

    async fn oauth_client(&self) -> Result<JiraClient> {
        if let Some(cached) = self.cached_token.read().await.as_ref() {
            if cached.is_live() {
                debug!("using cached access token");
                return Ok(cached.client.clone());
            }
        }

        // シングルフライト: 同時に期限切れを観測したタスクはここで直列化される
        let mut state = self.refresh_lock.lock().await;

        if let Some(cached) = self.cached_token.read().await.as_ref() {
            if cached.is_live() {
                debug!("access token refreshed by concurrent task");
                return Ok(cached.client.clone());
            }
        }

        debug!("access token not cached or expired, running refresh token flow");
        let refresh_token = self.current_refresh_token(&state).await;

        let response = match self.token_endpoint_request(&refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                // 設定のフォールバックトークンで一度だけ再試行
                info!(error = %e, "retrying with refresh token from connection configuration");
                let fallback = self.configured_refresh_token()?;
                if fallback == refresh_token {
                    return Err(Error::AuthenticationFailed(format!(
                        "token endpoint rejected the configured refresh token: {}",
                        e
                    )));
                }
                self.token_endpoint_request(&fallback).await.map_err(|e| {
                    error!(error = %e, "token refresh failed after fallback retry");
                    Error::AuthenticationFailed(format!(
                        "could not obtain an access token with an expired or invalid refresh token: {}",
                        e
                    ))
                })?
            }
        };

        let ttl_secs = response.expires_in.unwrap_or(3000);
        // 期限ぎりぎりのトークンで後続リクエストが失敗しないよう60秒のマージンを取る
        let ttl_secs = if ttl_secs > 60 { ttl_secs - 60 } else { ttl_secs };
        let expires_at = Utc::now() + Duration::seconds(ttl_secs as i64);

        let client = JiraClient::new(
            &self.config.base_url,
            &Credential::Bearer {
                token: response.access_token.clone(),
            },
        )?;

        debug!(ttl_seconds = ttl_secs, "caching new access token");
        *self.cached_token.write().await = Some(CachedAccessToken {
            token: response.access_token,
            expires_at,
            client: client.clone(),
        });

        if let Some(rotated) = response.refresh_token {
            state.rotated_refresh_token = Some(rotated.clone());
            self.token_store
                .save(&PersistedRefreshToken {
                    refresh_token: rotated,
                })
                .await?;
        }

        Ok(client)
    }

    /// リフレッシュトークンを優先順位（メモリ → 永続ストア → 設定）で解決
    async fn current_refresh_token(&self, state: &RefreshState) -> String {
        if let Some(token) = &state.rotated_refresh_token {
            debug!("using rotated refresh token from memory");
            return token.clone();
        }
        if let Some(stored) = self.token_store.load().await {
            debug!("using refresh token from durable store");
            return stored.refresh_token;
        }
        debug!("using refresh token from connection configuration");
        self.config.refresh_token.clone().unwrap_or_default()
    }

    fn configured_refresh_token(&self) -> Result<String> {
        self.config.refresh_token.clone().ok_or_else(|| {
            Error::ConfigurationMissing(
                "'refresh_token' must be set in the connection configuration for the OAuth2.0(3LO) flow"
                    .to_string(),
            )
        })
    }

    async fn token_endpoint_request(&self, refresh_token: &str) -> Result<TokenResponse> {
        let url = format!("{}/oauth/token", self.config.auth_base_url);
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_deref().unwrap_or_default()),
            (
                "client_secret",
                self.config.client_secret.as_deref().unwrap_or_default(),
            ),
            ("refresh_token", refresh_token),
            (
                "redirect_uri",
                self.config.redirect_uri.as_deref().unwrap_or_default(),
            ),
        ];

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::ApiError { status, message });
        }

        Ok(response.json::<TokenResponse>().await?)
    }
}
