use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::Issue;

/// 行検索エンドポイントのリクエストパラメータ
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchParams {
    #[serde(rename = "startAt")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_at: Option<u32>,

    #[serde(rename = "maxResults")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expand: Option<String>,
}

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_at(mut self, start_at: u32) -> Self {
        self.start_at = Some(start_at);
        self
    }

    pub fn max_results(mut self, max_results: u32) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn expand(mut self, expand: impl Into<String>) -> Self {
        self.expand = Some(expand.into());
        self
    }
}

/// 行検索エンドポイントのレスポンス
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "startAt")]
    pub start_at: u32,

    #[serde(rename = "maxResults")]
    pub max_results: u32,

    pub total: u32,

    pub issues: Vec<Issue>,

    /// expand=names指定時のフィールドID→表示名マップ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<HashMap<String, String>>,
}

/// 式評価エンドポイントのリクエスト
#[derive(Debug, Clone, Serialize)]
pub struct EvalRequest {
    pub context: EvalContext,
    pub expression: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalContext {
    pub issues: EvalIssuesContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalIssuesContext {
    pub jql: EvalJqlContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalJqlContext {
    pub query: String,
    #[serde(rename = "startAt")]
    pub start_at: u32,
    #[serde(rename = "maxResults")]
    pub max_results: u32,
}

impl EvalRequest {
    /// JQLコンテキスト付きの評価リクエストを作成
    pub fn for_jql(query: impl Into<String>, start_at: u32, max_results: u32, expression: impl Into<String>) -> Self {
        Self {
            context: EvalContext {
                issues: EvalIssuesContext {
                    jql: EvalJqlContext {
                        query: query.into(),
                        start_at,
                        max_results,
                    },
                },
            },
            expression: expression.into(),
        }
    }
}

/// 式評価エンドポイントのレスポンス
#[derive(Debug, Clone, Deserialize)]
pub struct EvalResult {
    #[serde(default)]
    pub value: Vec<serde_json::Value>,
    pub meta: Option<EvalMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvalMeta {
    pub complexity: Option<ComplexityBudget>,
    pub issues: Option<EvalIssuesMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvalIssuesMeta {
    pub jql: EvalJqlMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvalJqlMeta {
    #[serde(rename = "startAt")]
    pub start_at: u32,
    #[serde(rename = "maxResults")]
    pub max_results: u32,
    #[serde(rename = "totalCount")]
    pub total_count: u32,
}

/// 式評価1回あたりのリソース消費量レポート
#[derive(Debug, Clone, Deserialize)]
pub struct ComplexityBudget {
    pub steps: Option<QuotaUsage>,
    #[serde(rename = "expensiveOperations")]
    pub expensive_operations: Option<QuotaUsage>,
    pub beans: Option<QuotaUsage>,
    #[serde(rename = "primitiveValues")]
    pub primitive_values: Option<QuotaUsage>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuotaUsage {
    pub value: u64,
    pub limit: u64,
}

impl ComplexityBudget {
    /// 最も逼迫しているクォータの (消費量, 上限) を返す
    ///
    /// ページサイズの見積もりには消費率が最大の軸を使う。
    pub fn tightest(&self) -> Option<QuotaUsage> {
        [
            self.steps,
            self.expensive_operations,
            self.beans,
            self.primitive_values,
        ]
        .into_iter()
        .flatten()
        .filter(|q| q.limit > 0)
        .max_by(|a, b| {
            let ra = a.value as f64 / a.limit as f64;
            let rb = b.value as f64 / b.limit as f64;
            ra.total_cmp(&rb)
        })
    }
}
