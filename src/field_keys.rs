use std::collections::HashMap;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::client::JiraClient;
use crate::error::Result;
use crate::models::Issue;

/// 論理フィールド名とテナント既定の表示名の対応
///
/// テナントごとに実体のフィールドID（customfield_XXXXX）は異なるが、
/// 表示名は共通なので、表示名を経由してIDを解決する。
pub(crate) const LOGICAL_FIELD_NAMES: &[(&str, &str)] =
    &[("epic", "Epic Link"), ("sprint", "Sprint")];

/// 論理フィールド名からテナント固有のフィールドIDを解決する
///
/// 初回の解決時に1回だけメタデータ付き検索（expand=names）を行い、
/// レスポンスに含まれる全フィールドをまとめてキャッシュする。
/// 2回目以降はキャッシュヒットとなり、プロセス再起動までリクエストは発生しない。
pub struct FieldKeyResolver {
    /// 表示名（小文字化） → フィールドID
    cache: RwLock<Option<HashMap<String, String>>>,
    /// キャッシュ未構築時の population を直列化するロック
    populate_lock: Mutex<()>,
}

impl FieldKeyResolver {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(None),
            populate_lock: Mutex::new(()),
        }
    }

    /// 検索レスポンスのnames展開からキャッシュを構築
    ///
    /// 検索実行側が既にnames付きレスポンスを持っている場合、
    /// 追加のメタデータリクエストを省略できる。
    pub async fn seed_from_names(&self, names: &HashMap<String, String>) {
        let mut cache = self.cache.write().await;
        if cache.is_none() {
            *cache = Some(Self::reverse_names(names));
            debug!(fields = names.len(), "field key cache seeded from search response");
        }
    }

    /// 論理フィールド名をテナント固有のフィールドIDに解決
    ///
    /// メタデータに存在しない名前はNoneとなる。呼び出し側はNoneを
    /// 「このテナントにそのフィールドは無い」として扱い、エラーにしない。
    pub async fn resolve(&self, client: &JiraClient, logical_name: &str) -> Result<Option<String>> {
        let display_name = Self::display_name(logical_name);

        if let Some(cache) = self.cache.read().await.as_ref() {
            return Ok(cache.get(&display_name.to_lowercase()).cloned());
        }

        // キャッシュミスが複数タスクで競合しても、メタデータ取得は1回に抑える
        let _guard = self.populate_lock.lock().await;
        if self.cache.read().await.is_none() {
            let names = self.fetch_names(client).await?;
            *self.cache.write().await = Some(Self::reverse_names(&names));
        }

        Ok(self
            .cache
            .read()
            .await
            .as_ref()
            .and_then(|cache| cache.get(&display_name.to_lowercase()).cloned()))
    }

    /// Issueの生フィールドから解決済みの型付き値を抽出
    pub async fn resolved_fields(&self, client: &JiraClient, issue: &Issue) -> Result<ResolvedFields> {
        let epic_field = self.resolve(client, "epic").await?;
        let sprint_field = self.resolve(client, "sprint").await?;
        Ok(ResolvedFields::extract(issue, epic_field.as_deref(), sprint_field.as_deref()))
    }

    fn display_name(logical_name: &str) -> &str {
        LOGICAL_FIELD_NAMES
            .iter()
            .find(|(logical, _)| *logical == logical_name)
            .map(|(_, display)| *display)
            .unwrap_or(logical_name)
    }

    fn reverse_names(names: &HashMap<String, String>) -> HashMap<String, String> {
        names
            .iter()
            .map(|(id, display)| (display.to_lowercase(), id.clone()))
            .collect()
    }

    async fn fetch_names(&self, client: &JiraClient) -> Result<HashMap<String, String>> {
        debug!("fetching field name metadata");
        let result: crate::models::SearchResult = client
            .get_with_query(
                "/rest/api/3/search",
                &[("jql", ""), ("maxResults", "1"), ("expand", "names")],
            )
            .await?;
        Ok(result.names.unwrap_or_default())
    }
}

impl Default for FieldKeyResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// 解決済みカスタムフィールドの型付きビュー
///
/// フィールドIDをキーにした生のJSONマップを都度掘るのではなく、
/// 解決結果を一度だけ抽出して保持する。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedFields {
    pub epic_key: Option<String>,
    pub sprint_ids: Vec<i64>,
    pub sprint_names: Vec<String>,
}

impl ResolvedFields {
    fn extract(issue: &Issue, epic_field: Option<&str>, sprint_field: Option<&str>) -> Self {
        // エピックは親Issueがエピックであれば親キーを優先し、
        // 無ければカスタムフィールドの値にフォールバックする
        let epic_key = issue
            .epic_parent_key()
            .map(str::to_string)
            .or_else(|| {
                epic_field
                    .and_then(|key| issue.custom_field(key))
                    .and_then(|value| value.as_str().map(str::to_string))
            });

        let mut sprint_ids = Vec::new();
        let mut sprint_names = Vec::new();
        if let Some(sprints) = sprint_field
            .and_then(|key| issue.custom_field(key))
            .and_then(|value| value.as_array())
        {
            for sprint in sprints {
                if let Some(id) = sprint.get("id").and_then(|v| v.as_i64()) {
                    sprint_ids.push(id);
                }
                if let Some(name) = sprint.get("name").and_then(|v| v.as_str()) {
                    sprint_names.push(name.to_string());
                }
            }
        }

        Self {
            epic_key,
            sprint_ids,
            sprint_names,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Credential;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn metadata_response() -> serde_json::Value {
        json!({
            "startAt": 0,
            "maxResults": 1,
            "total": 1,
            "issues": [],
            "names": {
                "customfield_10300": "Epic Link",
                "customfield_10007": "Sprint",
                "summary": "Summary"
            }
        })
    }

    async fn mock_metadata_server(expected_requests: u64) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/search"))
            .and(query_param("expand", "names"))
            .respond_with(ResponseTemplate::new(200).set_body_json(metadata_response()))
            .expect(expected_requests)
            .mount(&mock_server)
            .await;
        mock_server
    }

    fn test_client(base_url: &str) -> JiraClient {
        JiraClient::new(
            base_url,
            &Credential::Bearer {
                token: "t".to_string(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_resolve_populates_whole_cache_with_one_request() {
        // Given: names展開を返すモックサーバー（リクエスト1回を期待）
        let mock_server = mock_metadata_server(1).await;
        let client = test_client(&mock_server.uri());
        let resolver = FieldKeyResolver::new();

        // When: 別の論理名を続けて解決
        let epic = resolver.resolve(&client, "epic").await.unwrap();
        let sprint = resolver.resolve(&client, "sprint").await.unwrap();

        // Then: どちらも1回のメタデータリクエストから解決される
        assert_eq!(epic, Some("customfield_10300".to_string()));
        assert_eq!(sprint, Some("customfield_10007".to_string()));
    }

    #[tokio::test]
    async fn test_repeated_resolve_never_refetches() {
        let mock_server = mock_metadata_server(1).await;
        let client = test_client(&mock_server.uri());
        let resolver = FieldKeyResolver::new();

        for _ in 0..5 {
            let key = resolver.resolve(&client, "epic").await.unwrap();
            assert_eq!(key, Some("customfield_10300".to_string()));
        }
    }

    #[tokio::test]
    async fn test_unknown_name_resolves_to_none() {
        // Given: メタデータに存在しない論理名
        let mock_server = mock_metadata_server(1).await;
        let client = test_client(&mock_server.uri());
        let resolver = FieldKeyResolver::new();

        // Then: エラーではなくNone（フィールド不在）となる
        let key = resolver.resolve(&client, "nonexistent").await.unwrap();
        assert_eq!(key, None);
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_fetch_once() {
        // Given: 同時に10タスクが初回解決を行う
        let mock_server = mock_metadata_server(1).await;
        let client = test_client(&mock_server.uri());
        let resolver = Arc::new(FieldKeyResolver::new());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let resolver = Arc::clone(&resolver);
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                resolver.resolve(&client, "epic").await
            }));
        }

        // Then: 全タスクが解決に成功し、メタデータ取得は1回だけ
        for handle in handles {
            assert_eq!(
                handle.await.unwrap().unwrap(),
                Some("customfield_10300".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_seed_from_names_skips_metadata_request() {
        // Given: 検索レスポンス由来のnamesでシード済みのリゾルバ（リクエスト0回を期待）
        let mock_server = mock_metadata_server(0).await;
        let client = test_client(&mock_server.uri());
        let resolver = FieldKeyResolver::new();

        let mut names = HashMap::new();
        names.insert("customfield_10300".to_string(), "Epic Link".to_string());
        resolver.seed_from_names(&names).await;

        // Then: リクエストなしで解決できる
        let key = resolver.resolve(&client, "epic").await.unwrap();
        assert_eq!(key, Some("customfield_10300".to_string()));
    }

    #[tokio::test]
    async fn test_resolved_fields_extraction() {
        let mock_server = mock_metadata_server(1).await;
        let client = test_client(&mock_server.uri());
        let resolver = FieldKeyResolver::new();

        // Given: スプリントとエピックのカスタムフィールドを持つIssue
        let issue: Issue = serde_json::from_value(json!({
            "id": "10000",
            "key": "OPS-1",
            "fields": {
                "summary": "Test",
                "customfield_10300": "OPS-100",
                "customfield_10007": [
                    { "id": 7, "name": "Sprint 7", "state": "active" },
                    { "id": 8, "name": "Sprint 8", "state": "future" }
                ]
            }
        }))
        .unwrap();

        // When: 型付きビューに抽出
        let resolved = resolver.resolved_fields(&client, &issue).await.unwrap();

        // Then: エピックキーとスプリントの一覧が取り出せる
        assert_eq!(resolved.epic_key, Some("OPS-100".to_string()));
        assert_eq!(resolved.sprint_ids, vec![7, 8]);
        assert_eq!(resolved.sprint_names, vec!["Sprint 7", "Sprint 8"]);
    }

    #[tokio::test]
    async fn test_resolved_fields_prefers_epic_parent() {
        let mock_server = mock_metadata_server(1).await;
        let client = test_client(&mock_server.uri());
        let resolver = FieldKeyResolver::new();

        // Given: Epic親とカスタムフィールドの両方を持つIssue
        let issue: Issue = serde_json::from_value(json!({
            "id": "10001",
            "key": "OPS-2",
            "fields": {
                "parent": {
                    "id": "1",
                    "key": "OPS-200",
                    "fields": { "issuetype": { "id": "10000", "name": "Epic" } }
                },
                "customfield_10300": "OPS-100"
            }
        }))
        .unwrap();

        let resolved = resolver.resolved_fields(&client, &issue).await.unwrap();

        // Then: 親Issue由来のキーが優先される
        assert_eq!(resolved.epic_key, Some("OPS-200".to_string()));
    }
}
