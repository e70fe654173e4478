/// 資格情報ライフサイクルの統合テスト
///
/// OAuth2.0(3LO)リフレッシュフローを検索パイプラインと組み合わせて
/// 検証します：
/// 1. コールドスタート（キャッシュ・ストアとも空）からの初回認証
/// 2. 取得したアクセストークンによる検索リクエストの認証
/// 3. 並行リスト操作下でのリフレッシュの直列化
/// 4. ローテーション済みトークンの永続化
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use jira_connector::{
    ConnectionConfig, CredentialManager, PagedSearchExecutor, RowSearchStrategy, SearchLimits,
    StreamControl,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn oauth_config(base_url: &str, auth_url: &str, temp_dir: &TempDir) -> ConnectionConfig {
    ConnectionConfig::new(base_url)
        .refresh_token("initial-refresh-token")
        .oauth_client("client-id", "client-secret")
        .redirect_uri("https://localhost/callback")
        .auth_base_url(auth_url)
        .token_file(temp_dir.path().join("refresh_token.json"))
}

fn search_page_body(count: u32) -> serde_json::Value {
    let issues: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            json!({
                "id": format!("{}", 10000 + i),
                "key": format!("OPS-{}", i + 1),
                "fields": { "summary": format!("Issue {}", i + 1) }
            })
        })
        .collect();
    json!({
        "startAt": 0,
        "maxResults": count,
        "total": count,
        "issues": issues
    })
}

fn default_limits() -> SearchLimits {
    SearchLimits {
        page_size: 50,
        soft_limit: None,
        hard_ceiling: 500,
        raise_on_overflow: true,
    }
}

#[tokio::test]
async fn test_cold_start_oauth_flow_authenticates_search() {
    // Given: トークンエンドポイントと、Bearerトークンを検証する検索エンドポイント
    let auth_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-token-1",
            "expires_in": 3600,
            "refresh_token": "rotated-token-1"
        })))
        .expect(1)
        .mount(&auth_server)
        .await;

    let api_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/3/search"))
        .and(header("Authorization", "Bearer access-token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_page_body(3)))
        .expect(1)
        .mount(&api_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let manager = CredentialManager::new(oauth_config(
        &api_server.uri(),
        &auth_server.uri(),
        &temp_dir,
    ))
    .unwrap();

    // When: コールドスタートから検索を実行
    let executor = PagedSearchExecutor::new(Box::new(RowSearchStrategy::new()), default_limits());
    let stats = executor
        .run(&manager, "project=OPS", |_| StreamControl::Continue)
        .await
        .unwrap();

    // Then: 1回のリフレッシュで取得したトークンが検索を認証し、
    // ローテーション済みのリフレッシュトークンが永続化される
    assert_eq!(stats.rows_emitted, 3);
    let stored: serde_json::Value = serde_json::from_str(
        &tokio::fs::read_to_string(temp_dir.path().join("refresh_token.json"))
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(stored["refresh_token"], "rotated-token-1");
}

#[tokio::test]
async fn test_concurrent_list_operations_share_one_refresh() {
    // Given: 呼び出し回数を数えるトークンエンドポイント
    let auth_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "access_token": "access-token-1",
                    "expires_in": 3600,
                    "refresh_token": "rotated-token-1"
                }))
                .set_delay(std::time::Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&auth_server)
        .await;

    let api_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/api/3/search"))
        .and(header("Authorization", "Bearer access-token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_page_body(2)))
        .mount(&api_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let manager = Arc::new(
        CredentialManager::new(oauth_config(&api_server.uri(), &auth_server.uri(), &temp_dir))
            .unwrap(),
    );

    // When: 4つのリスト操作を同時に実行
    let total_rows = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();
    for _ in 0..4 {
        let manager = Arc::clone(&manager);
        let total_rows = Arc::clone(&total_rows);
        handles.push(tokio::spawn(async move {
            let executor =
                PagedSearchExecutor::new(Box::new(RowSearchStrategy::new()), default_limits());
            let total_rows = Arc::clone(&total_rows);
            executor
                .run(&manager, "project=OPS", move |_| {
                    total_rows.fetch_add(1, Ordering::SeqCst);
                    StreamControl::Continue
                })
                .await
        }));
    }

    // Then: 全操作が成功し、リフレッシュは1回に直列化される（expect(1)で検証）
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(total_rows.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn test_auth_failure_surfaces_actionable_error() {
    // Given: すべてのリフレッシュを拒否するトークンエンドポイント
    let auth_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(403).set_body_string("invalid_grant"))
        .mount(&auth_server)
        .await;

    let api_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let manager = CredentialManager::new(oauth_config(
        &api_server.uri(),
        &auth_server.uri(),
        &temp_dir,
    ))
    .unwrap();

    // When: 検索を実行
    let executor = PagedSearchExecutor::new(Box::new(RowSearchStrategy::new()), default_limits());
    let result = executor
        .run(&manager, "project=OPS", |_| StreamControl::Continue)
        .await;

    // Then: 認証エラーとして失敗し、黙って握りつぶされない
    assert!(matches!(
        result,
        Err(jira_connector::Error::AuthenticationFailed(_))
    ));
}
