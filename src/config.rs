use std::env;
use std::path::PathBuf;

use url::Url;

use crate::error::{Error, Result};

/// 認証モード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// ユーザー名 + APIトークンによるBasic認証
    Basic,
    /// Personal Access TokenによるBearer認証
    PersonalToken,
    /// OAuth2.0(3LO) リフレッシュトークンフロー
    OAuthRefresh,
}

/// 大文字小文字の扱い（JQL文字列比較はサーバー側で解釈される）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseSensitivity {
    #[default]
    Insensitive,
    Sensitive,
}

/// 接続設定
///
/// 接続ごとに1つ作成し、`CredentialManager` に渡して使用する。
/// `validate()` はネットワークアクセス前に設定不備を検出する。
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// JiraテナントのベースURL
    pub base_url: String,
    /// Basic認証のユーザー名
    pub username: Option<String>,
    /// Basic認証のAPIトークン
    pub token: Option<String>,
    /// Personal Access Token
    pub personal_access_token: Option<String>,
    /// OAuth2.0フローの初期リフレッシュトークン（フォールバックにも使用）
    pub refresh_token: Option<String>,
    /// OAuth2.0クライアントID
    pub client_id: Option<String>,
    /// OAuth2.0クライアントシークレット
    pub client_secret: Option<String>,
    /// OAuth2.0リダイレクトURI
    pub redirect_uri: Option<String>,
    /// トークンエンドポイントのホスト
    pub auth_base_url: String,
    /// リフレッシュトークンの永続化ファイル
    pub token_file: PathBuf,
    /// 1ページあたりの取得件数（1〜100）
    pub page_size: u32,
    /// Issue検索の安全上限（ハードリミット）
    pub issue_limit: u32,
    /// 上限超過時にエラーを返すか（falseなら打ち切ってログのみ）
    pub row_limit_error: bool,
    /// 文字列比較の大文字小文字の扱い
    pub case_sensitivity: CaseSensitivity,
}

impl ConnectionConfig {
    /// ベースURLだけを指定して設定を作成（残りはデフォルト値）
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: None,
            token: None,
            personal_access_token: None,
            refresh_token: None,
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            auth_base_url: "https://auth.atlassian.com".to_string(),
            token_file: default_token_file(),
            page_size: 50,
            issue_limit: 500,
            row_limit_error: true,
            case_sensitivity: CaseSensitivity::Insensitive,
        }
    }

    /// 環境変数から設定を作成
    pub fn from_env() -> Result<Self> {
        let base_url = env::var("JIRA_URL").map_err(|_| {
            Error::ConfigurationMissing("JIRA_URL not found in environment".to_string())
        })?;

        let mut config = Self::new(base_url);
        config.username = env::var("JIRA_USER").ok();
        config.token = env::var("JIRA_TOKEN").ok();
        config.personal_access_token = env::var("JIRA_PERSONAL_ACCESS_TOKEN").ok();
        config.refresh_token = env::var("JIRA_REFRESH_TOKEN").ok();
        config.client_id = env::var("JIRA_CLIENT_ID").ok();
        config.client_secret = env::var("JIRA_CLIENT_SECRET").ok();
        config.redirect_uri = env::var("OAUTH_REDIRECT_URI").ok();
        config.validate()?;
        Ok(config)
    }

    /// ユーザー名を設定
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// APIトークンを設定
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Personal Access Tokenを設定
    pub fn personal_access_token(mut self, token: impl Into<String>) -> Self {
        self.personal_access_token = Some(token.into());
        self
    }

    /// リフレッシュトークンを設定
    pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// OAuthクライアント情報を設定
    pub fn oauth_client(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    /// リダイレクトURIを設定
    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// トークンエンドポイントのホストを設定
    pub fn auth_base_url(mut self, url: impl Into<String>) -> Self {
        self.auth_base_url = url.into();
        self
    }

    /// リフレッシュトークンの永続化先を設定
    pub fn token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = path.into();
        self
    }

    /// ページサイズを設定
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Issue検索の安全上限を設定
    pub fn issue_limit(mut self, limit: u32) -> Self {
        self.issue_limit = limit;
        self
    }

    /// 上限超過時の動作を設定
    pub fn row_limit_error(mut self, raise: bool) -> Self {
        self.row_limit_error = raise;
        self
    }

    /// 大文字小文字の扱いを設定
    pub fn case_sensitivity(mut self, mode: CaseSensitivity) -> Self {
        self.case_sensitivity = mode;
        self
    }

    /// 設定されている認証モードを判定
    ///
    /// refresh_tokenが設定されている場合はOAuthフローを優先し、
    /// personal_access_tokenがあればBearer、それ以外はBasicとなる。
    pub fn auth_mode(&self) -> AuthMode {
        if self.refresh_token.is_some() {
            AuthMode::OAuthRefresh
        } else if self.personal_access_token.is_some() {
            AuthMode::PersonalToken
        } else {
            AuthMode::Basic
        }
    }

    /// 設定の事前検証
    ///
    /// ネットワークアクセスの前に、欠落・矛盾した設定を検出して
    /// 設定名入りのエラーを返す。
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::ConfigurationMissing(
                "'base_url' must be set in the connection configuration".to_string(),
            ));
        }
        Url::parse(&self.base_url).map_err(|_| {
            Error::InvalidConfiguration(format!("'base_url' is not a valid URL: {}", self.base_url))
        })?;

        if self.page_size < 1 || self.page_size > 100 {
            return Err(Error::InvalidConfiguration(
                "'page_size' must be set to 1 to 100 in the connection configuration".to_string(),
            ));
        }
        if self.issue_limit < 1 {
            return Err(Error::InvalidConfiguration(
                "'issue_limit' must be greater than 0".to_string(),
            ));
        }

        match self.auth_mode() {
            AuthMode::OAuthRefresh => {
                if self.client_id.is_none() || self.client_secret.is_none() {
                    return Err(Error::ConfigurationMissing(
                        "'client_id' and 'client_secret' must be set for the OAuth2.0(3LO) flow"
                            .to_string(),
                    ));
                }
            }
            _ => {
                if self.token.is_some() && self.username.is_none() {
                    return Err(Error::ConfigurationMissing(
                        "'token' is set but 'username' is not set in the connection configuration"
                            .to_string(),
                    ));
                }
                if self.token.is_some() && self.personal_access_token.is_some() {
                    return Err(Error::InvalidConfiguration(
                        "'token' and 'personal_access_token' are both set, please use only one auth method"
                            .to_string(),
                    ));
                }
                if self.token.is_none() && self.personal_access_token.is_none() {
                    return Err(Error::ConfigurationMissing(
                        "'token' or 'personal_access_token' or 'refresh_token' must be set in the connection configuration"
                            .to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

fn default_token_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("jira-connector")
        .join("refresh_token.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_config() -> ConnectionConfig {
        ConnectionConfig::new("https://example.atlassian.net")
            .username("test@example.com")
            .token("api_token")
    }

    #[test]
    fn test_validate_basic_auth() {
        // Given: Basic認証の完全な設定
        let config = basic_config();

        // Then: 検証が成功し、Basicモードと判定される
        assert!(config.validate().is_ok());
        assert_eq!(config.auth_mode(), AuthMode::Basic);
    }

    #[test]
    fn test_validate_rejects_empty_base_url() {
        let config = ConnectionConfig::new("").token("t");

        let err = config.validate().unwrap_err();
        match err {
            Error::ConfigurationMissing(msg) => assert!(msg.contains("base_url")),
            _ => panic!("Expected ConfigurationMissing"),
        }
    }

    #[test]
    fn test_validate_rejects_invalid_base_url() {
        let config = ConnectionConfig::new("not a valid url")
            .username("u")
            .token("t");

        let err = config.validate().unwrap_err();
        match err {
            Error::InvalidConfiguration(msg) => assert!(msg.contains("base_url")),
            _ => panic!("Expected InvalidConfiguration"),
        }
    }

    #[test]
    fn test_validate_rejects_token_without_username() {
        // Given: tokenのみでusernameが無い設定
        let config = ConnectionConfig::new("https://example.atlassian.net").token("t");

        // Then: 設定名入りのエラーとなる
        let err = config.validate().unwrap_err();
        match err {
            Error::ConfigurationMissing(msg) => {
                assert!(msg.contains("'token'"));
                assert!(msg.contains("'username'"));
            }
            _ => panic!("Expected ConfigurationMissing"),
        }
    }

    #[test]
    fn test_validate_rejects_conflicting_auth_methods() {
        // Given: tokenとpersonal_access_tokenを両方設定
        let config = basic_config().personal_access_token("pat");

        // Then: 競合エラーとなる
        let err = config.validate().unwrap_err();
        match err {
            Error::InvalidConfiguration(msg) => {
                assert!(msg.contains("only one auth method"));
            }
            _ => panic!("Expected InvalidConfiguration"),
        }
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let config = ConnectionConfig::new("https://example.atlassian.net");

        let err = config.validate().unwrap_err();
        match err {
            Error::ConfigurationMissing(msg) => {
                assert!(msg.contains("'token' or 'personal_access_token' or 'refresh_token'"));
            }
            _ => panic!("Expected ConfigurationMissing"),
        }
    }

    #[test]
    fn test_validate_oauth_requires_client_credentials() {
        // Given: refresh_tokenのみでclient_id/client_secretが無い設定
        let config = ConnectionConfig::new("https://example.atlassian.net").refresh_token("rt");
        assert_eq!(config.auth_mode(), AuthMode::OAuthRefresh);

        // Then: クライアント情報の欠落エラーとなる
        let err = config.validate().unwrap_err();
        match err {
            Error::ConfigurationMissing(msg) => {
                assert!(msg.contains("client_id"));
            }
            _ => panic!("Expected ConfigurationMissing"),
        }
    }

    #[test]
    fn test_validate_page_size_bounds() {
        assert!(basic_config().page_size(1).validate().is_ok());
        assert!(basic_config().page_size(100).validate().is_ok());
        assert!(basic_config().page_size(0).validate().is_err());
        assert!(basic_config().page_size(101).validate().is_err());
    }

    #[test]
    fn test_personal_token_mode() {
        let config =
            ConnectionConfig::new("https://example.atlassian.net").personal_access_token("pat");

        assert!(config.validate().is_ok());
        assert_eq!(config.auth_mode(), AuthMode::PersonalToken);
    }
}
