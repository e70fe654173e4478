use std::sync::Arc;

use base64::Engine;
use reqwest::{Client, header};

use crate::error::{Error, Result};
use crate::models::{Priority, Project};

/// 接続ごとに1つ有効になる認証情報
#[derive(Debug, Clone)]
pub enum Credential {
    Basic { username: String, secret: String },
    Bearer { token: String },
}

/// 認証済みHTTPクライアント
///
/// 認証ヘッダーはデフォルトヘッダーとして焼き込まれるため、
/// 1つのインスタンスは1つの資格情報に対応する。資格情報の更新は
/// `CredentialManager` が新しいインスタンスを構築することで行う。
#[derive(Debug, Clone)]
pub struct JiraClient {
    client: Client,
    base_url: Arc<String>,
}

impl JiraClient {
    pub fn new(base_url: impl Into<String>, credential: &Credential) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let auth_value = match credential {
            Credential::Basic { username, secret } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, secret).as_bytes());
                format!("Basic {}", encoded)
            }
            Credential::Bearer { token } => format!("Bearer {}", token),
        };
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&auth_value).map_err(|_| {
                Error::InvalidConfiguration("credential contains invalid header characters".to_string())
            })?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Unexpected(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: Arc::new(base_url.into()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) async fn get<T>(&self, endpoint: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.get_with_query(endpoint, &[]).await
    }

    pub(crate) async fn get_with_query<T>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);

        let response = self.client.get(&url).query(query).send().await?;

        Self::decode(response).await
    }

    pub(crate) async fn post<T, B>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let url = format!("{}{}", self.base_url, endpoint);

        let response = self.client.post(&url).json(body).send().await?;

        Self::decode(response).await
    }

    async fn decode<T>(response: reqwest::Response) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::ApiError { status, message });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// JQLでIssueを検索
    pub async fn search_issues(
        &self,
        jql: &str,
        params: crate::models::SearchParams,
    ) -> Result<crate::models::SearchResult> {
        let mut body = serde_json::json!({
            "jql": jql
        });

        if let Some(start_at) = params.start_at {
            body["startAt"] = start_at.into();
        }
        if let Some(max_results) = params.max_results {
            body["maxResults"] = max_results.into();
        }
        if let Some(fields) = params.fields {
            body["fields"] = fields.into();
        }
        if let Some(expand) = params.expand {
            body["expand"] = expand.into();
        }

        self.post("/rest/api/3/search", &body).await
    }

    /// 単一Issueを取得
    ///
    /// 呼び出し側は404/400を `retry::not_found_as_none` で「行なし」に
    /// 変換できる。
    pub async fn get_issue(&self, id_or_key: &str) -> Result<crate::models::Issue> {
        let endpoint = format!(
            "/rest/api/3/issue/{}?expand=names,changelog&fields=*all",
            urlencoding::encode(id_or_key)
        );
        self.get(&endpoint).await
    }

    /// プロジェクト一覧を取得
    pub async fn get_projects(&self) -> Result<Vec<Project>> {
        self.get("/rest/api/3/project").await
    }

    /// 優先度一覧を取得
    pub async fn get_priorities(&self) -> Result<Vec<Priority>> {
        self.get("/rest/api/3/priority").await
    }

    /// フィールドメタデータ一覧を取得
    pub async fn get_fields(&self) -> Result<Vec<crate::models::Field>> {
        self.get("/rest/api/3/field").await
    }
}
