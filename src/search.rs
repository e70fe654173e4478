use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::client::JiraClient;
use crate::config::ConnectionConfig;
use crate::credentials::CredentialManager;
use crate::error::{Error, Result};
use crate::field_keys::FieldKeyResolver;
use crate::models::{EvalRequest, EvalResult, SearchParams};
use crate::retry::{is_bad_request, is_not_found};

/// ページングループの位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchCursor {
    pub start_at: u32,
    pub page_size: u32,
}

/// 1ページ分の取得結果
///
/// `next` がNoneであれば最終ページ。行は戦略ごとに形が異なるため
/// 生のJSON値として運び、型付けは呼び出し側で行う。
#[derive(Debug)]
pub struct SearchPage {
    pub rows: Vec<serde_json::Value>,
    /// expand=names指定時のフィールドID→表示名マップ
    pub names: Option<HashMap<String, String>>,
    /// バックエンドが総件数を報告する戦略ではその値
    pub total: Option<u32>,
    pub next: Option<SearchCursor>,
}

/// 検索戦略の共通契約
///
/// 実装はページの取得だけを担い、終了判定・上限・キャンセルは
/// `PagedSearchExecutor` の駆動ループが一元管理する。
#[async_trait]
pub trait SearchStrategy: Send + Sync {
    /// ログ用の戦略名
    fn name(&self) -> &'static str;

    /// メインループ開始前の準備。実効ページサイズを返す。
    ///
    /// 既定では要求されたページサイズをそのまま使う。
    async fn prepare(
        &self,
        _client: &JiraClient,
        _jql: &str,
        requested_page_size: u32,
    ) -> Result<u32> {
        Ok(requested_page_size)
    }

    async fn fetch_page(
        &self,
        client: &JiraClient,
        jql: &str,
        cursor: SearchCursor,
    ) -> Result<SearchPage>;
}

/// 行指向の検索エンドポイントを使う戦略
///
/// レスポンスが総件数を報告するため、offset + 取得件数 >= total で
/// 最終ページと判定する。
pub struct RowSearchStrategy {
    expand: String,
}

impl RowSearchStrategy {
    pub fn new() -> Self {
        Self {
            expand: "names,changelog".to_string(),
        }
    }

    pub fn expand(mut self, expand: impl Into<String>) -> Self {
        self.expand = expand.into();
        self
    }
}

impl Default for RowSearchStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchStrategy for RowSearchStrategy {
    fn name(&self) -> &'static str {
        "row-search"
    }

    async fn fetch_page(
        &self,
        client: &JiraClient,
        jql: &str,
        cursor: SearchCursor,
    ) -> Result<SearchPage> {
        let params = SearchParams::new()
            .start_at(cursor.start_at)
            .max_results(cursor.page_size)
            .fields(vec!["*all".to_string()])
            .expand(self.expand.clone());

        let result = client.search_issues(jql, params).await?;

        let fetched = result.issues.len() as u32;
        // 空ページはtotalと矛盾していても終端として扱う（無限ループ防止）
        let done = fetched == 0 || result.start_at + fetched >= result.total;
        let next = if done {
            None
        } else {
            Some(SearchCursor {
                start_at: result.start_at + fetched,
                page_size: cursor.page_size,
            })
        };

        let mut rows = Vec::with_capacity(result.issues.len());
        for issue in result.issues {
            rows.push(serde_json::to_value(issue)?);
        }

        Ok(SearchPage {
            rows,
            names: result.names,
            total: Some(result.total),
            next,
        })
    }
}

/// 式評価エンドポイントを使う戦略
///
/// 呼び出しごとに複雑度クォータが課されるため、メインループの前に
/// 小さなプローブ呼び出しで1件あたりの消費量を見積もり、安全な
/// ページサイズを決める。サーバーが要求より小さい実効maxResultsを
/// 報告した場合はさらに引き下げる。
pub struct ExpressionStrategy {
    projection: String,
}

impl ExpressionStrategy {
    pub fn new(projection: impl Into<String>) -> Self {
        Self {
            projection: projection.into(),
        }
    }

    async fn eval(
        &self,
        client: &JiraClient,
        jql: &str,
        start_at: u32,
        max_results: u32,
    ) -> Result<EvalResult> {
        let request = EvalRequest::for_jql(jql, start_at, max_results, &self.projection);
        client
            .post("/rest/api/3/expression/eval?expand=meta.complexity", &request)
            .await
    }
}

#[async_trait]
impl SearchStrategy for ExpressionStrategy {
    fn name(&self) -> &'static str {
        "expression"
    }

    async fn prepare(
        &self,
        client: &JiraClient,
        jql: &str,
        requested_page_size: u32,
    ) -> Result<u32> {
        let probe = self.eval(client, jql, 0, 1).await?;

        let mut effective = requested_page_size;
        if let Some(quota) = probe
            .meta
            .as_ref()
            .and_then(|m| m.complexity.as_ref())
            .and_then(|c| c.tightest())
        {
            // プローブは1件評価なので value がそのまま1件あたりの消費量
            let per_item = quota.value.max(1);
            let safe = (quota.limit / per_item).max(1) as u32;
            effective = effective.min(safe);
        }

        debug!(
            requested = requested_page_size,
            effective, "probed expression complexity budget"
        );
        Ok(effective)
    }

    async fn fetch_page(
        &self,
        client: &JiraClient,
        jql: &str,
        cursor: SearchCursor,
    ) -> Result<SearchPage> {
        let result = self
            .eval(client, jql, cursor.start_at, cursor.page_size)
            .await?;

        let fetched = result.value.len() as u32;
        let jql_meta = result.meta.as_ref().and_then(|m| m.issues.as_ref()).map(|i| &i.jql);

        let (is_last, total) = match jql_meta {
            Some(meta) => (cursor.start_at + fetched >= meta.total_count, Some(meta.total_count)),
            // メタ情報が無い場合はページが満たされなかったことで最終と判定
            None => (fetched < cursor.page_size, None),
        };

        let next = if is_last || fetched == 0 {
            None
        } else {
            // サーバーが実効maxResultsを下げて返した場合は以後それに従う
            let mut page_size = cursor.page_size;
            if let Some(meta) = jql_meta {
                if meta.max_results > 0 && meta.max_results < page_size {
                    debug!(
                        requested = page_size,
                        effective = meta.max_results,
                        "server lowered effective page size"
                    );
                    page_size = meta.max_results;
                }
            }
            Some(SearchCursor {
                start_at: cursor.start_at + fetched,
                page_size,
            })
        };

        Ok(SearchPage {
            rows: result.value,
            names: None,
            total,
            next,
        })
    }
}

/// 要求カラムから式評価の射影式を構築
///
/// 呼び出し側が実際に要求したカラムだけを射影することで、
/// 複雑度クォータの消費を抑える（カラムプルーニング）。
pub fn expression_projection(columns: &[&str]) -> String {
    let mut fields = vec![
        "id: issue.id".to_string(),
        "key: issue.key".to_string(),
    ];
    for column in columns {
        if matches!(*column, "id" | "key") {
            continue;
        }
        if let Some(fragment) = projection_fragment(column) {
            fields.push(format!("{}: {}", column, fragment));
        }
    }
    format!("issues.map(issue => {{ {} }})", fields.join(", "))
}

/// 式評価で射影可能なカラムとその式
fn projection_fragment(column: &str) -> Option<&'static str> {
    match column {
        "id" => Some("issue.id"),
        "key" => Some("issue.key"),
        "self" => Some("issue.self"),
        "summary" => Some("issue.summary"),
        "status" => Some("issue.status.name"),
        "status_category" => Some("issue.status.category.name"),
        "type" => Some("issue.issueType.name"),
        "priority" => Some("issue.priority?.name"),
        "created" => Some("issue.created"),
        "updated" => Some("issue.updated"),
        "duedate" => Some("issue.dueDate"),
        "resolution_date" => Some("issue.resolutionDate"),
        "project_id" => Some("issue.project.id"),
        "project_key" => Some("issue.project.key"),
        "project_name" => Some("issue.project.name"),
        "assignee_account_id" => Some("issue.assignee?.accountId"),
        "assignee_display_name" => Some("issue.assignee?.displayName"),
        "reporter_account_id" => Some("issue.reporter?.accountId"),
        "reporter_display_name" => Some("issue.reporter?.displayName"),
        "creator_account_id" => Some("issue.creator?.accountId"),
        "creator_display_name" => Some("issue.creator?.displayName"),
        _ => None,
    }
}

/// 検索戦略の選択
///
/// 要求カラムがすべて式評価で射影可能なら式評価戦略を使い、
/// 1つでも射影できないカラム（tags, components, sprint系,
/// カスタムフィールドなど）があれば行検索に落とす。
pub fn select_strategy(requested_columns: &[&str]) -> Box<dyn SearchStrategy> {
    let all_projectable = !requested_columns.is_empty()
        && requested_columns
            .iter()
            .all(|c| projection_fragment(c).is_some());

    if all_projectable {
        debug!(columns = requested_columns.len(), "using expression strategy");
        Box::new(ExpressionStrategy::new(expression_projection(requested_columns)))
    } else {
        debug!(columns = requested_columns.len(), "using row search strategy");
        Box::new(RowSearchStrategy::new())
    }
}

/// 行数制限の設定
#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    /// 1ページあたりの取得件数
    pub page_size: u32,
    /// 呼び出し側が要求した上限
    pub soft_limit: Option<u32>,
    /// 接続設定による安全上限
    pub hard_ceiling: u32,
    /// 安全上限超過時にエラーを返すか（falseなら打ち切りログのみ）
    pub raise_on_overflow: bool,
}

impl SearchLimits {
    pub fn from_config(config: &ConnectionConfig, soft_limit: Option<u32>) -> Self {
        Self {
            page_size: config.page_size,
            soft_limit,
            hard_ceiling: config.issue_limit,
            raise_on_overflow: config.row_limit_error,
        }
    }

    fn effective_limit(&self) -> u32 {
        self.soft_limit
            .map(|soft| soft.min(self.hard_ceiling))
            .unwrap_or(self.hard_ceiling)
    }
}

/// 駆動ループの実行結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub rows_emitted: u32,
    pub requests_made: u32,
    pub truncated: bool,
}

/// 行の受け手がループ継続を制御するシグナル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    Continue,
    Stop,
}

/// ページング検索の駆動ループ
///
/// 1つの論理的なリスト操作につき1インスタンス。ページ取得は直列で、
/// 同時に発行するリクエストは常に1つ。行を1件流すごとに受け手の
/// シグナルを確認し、協調的にキャンセルする。
pub struct PagedSearchExecutor {
    strategy: Box<dyn SearchStrategy>,
    limits: SearchLimits,
    field_keys: Option<Arc<FieldKeyResolver>>,
}

impl PagedSearchExecutor {
    pub fn new(strategy: Box<dyn SearchStrategy>, limits: SearchLimits) -> Self {
        Self {
            strategy,
            limits,
            field_keys: None,
        }
    }

    /// 最初のページのnames展開でフィールドキーキャッシュをシードする
    pub fn with_field_resolver(mut self, resolver: Arc<FieldKeyResolver>) -> Self {
        self.field_keys = Some(resolver);
        self
    }

    /// 検索を実行し、行を受け手に流す
    ///
    /// 終了条件は次のいずれか:
    /// - 戦略が最終ページを報告
    /// - 実効上限（呼び出し側上限と安全上限の小さい方）に到達
    /// - 受け手が `StreamControl::Stop` を返す
    ///
    /// 最初のページの404/400は「該当リソースなし」のシグナルとして
    /// 空の結果に回復する。2ページ目以降のエラーはそのまま伝播する。
    pub async fn run<F>(
        &self,
        credentials: &CredentialManager,
        jql: &str,
        mut sink: F,
    ) -> Result<SearchStats>
    where
        F: FnMut(serde_json::Value) -> StreamControl + Send,
    {
        let mut stats = SearchStats::default();
        let effective_limit = self.limits.effective_limit();

        let client = credentials.client().await?;
        let requested_page_size = self.limits.page_size.min(effective_limit).max(1);
        let page_size = match self
            .strategy
            .prepare(&client, jql, requested_page_size)
            .await
        {
            Ok(size) => size.clamp(1, requested_page_size),
            Err(e) if is_not_found(&e) || is_bad_request(&e) => {
                debug!(strategy = self.strategy.name(), "probe reported no matching resource");
                return Ok(stats);
            }
            Err(e) => return Err(e),
        };

        let mut cursor = SearchCursor {
            start_at: 0,
            page_size,
        };
        let mut ceiling_warned = false;

        loop {
            // トークン失効をまたぐ長いページングに備え、ページごとに取得する
            let client = credentials.client().await?;

            let page = match self.strategy.fetch_page(&client, jql, cursor).await {
                Ok(page) => page,
                Err(e)
                    if stats.requests_made == 0 && (is_not_found(&e) || is_bad_request(&e)) =>
                {
                    debug!(
                        strategy = self.strategy.name(),
                        "first page reported no matching resource, returning empty result"
                    );
                    return Ok(stats);
                }
                Err(e) => return Err(e),
            };
            stats.requests_made += 1;

            if let (Some(resolver), Some(names)) = (&self.field_keys, &page.names) {
                resolver.seed_from_names(names).await;
            }

            if let Some(total) = page.total {
                if total > self.limits.hard_ceiling {
                    if self.limits.raise_on_overflow {
                        return Err(Error::RowLimitExceeded {
                            entity: "issue".to_string(),
                            limit: self.limits.hard_ceiling,
                        });
                    }
                    if !ceiling_warned {
                        warn!(
                            total,
                            limit = self.limits.hard_ceiling,
                            "result set exceeds configured row limit, truncating"
                        );
                        ceiling_warned = true;
                        stats.truncated = true;
                    }
                }
            }

            let page_had_next = page.next.is_some();
            let mut rows = page.rows.into_iter();
            while let Some(row) = rows.next() {
                let control = sink(row);
                stats.rows_emitted += 1;

                if control == StreamControl::Stop {
                    debug!(rows = stats.rows_emitted, "caller stopped the stream");
                    return Ok(stats);
                }

                if stats.rows_emitted >= effective_limit {
                    let more_available = rows.len() > 0 || page_had_next;
                    if more_available && effective_limit == self.limits.hard_ceiling {
                        if self.limits.raise_on_overflow {
                            return Err(Error::RowLimitExceeded {
                                entity: "issue".to_string(),
                                limit: self.limits.hard_ceiling,
                            });
                        }
                        if !ceiling_warned {
                            warn!(
                                limit = self.limits.hard_ceiling,
                                "row limit reached with rows remaining, truncating"
                            );
                        }
                        stats.truncated = true;
                    }
                    debug!(rows = stats.rows_emitted, "row limit reached");
                    return Ok(stats);
                }
            }

            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }

        debug!(
            rows = stats.rows_emitted,
            requests = stats.requests_made,
            strategy = self.strategy.name(),
            "search complete"
        );
        Ok(stats)
    }
}
