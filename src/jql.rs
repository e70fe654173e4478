use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{Error, Result};

/// カラム述語の比較演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl QualOperator {
    /// JQL上の演算子表現
    pub fn jql(&self) -> &'static str {
        match self {
            QualOperator::Eq => "=",
            QualOperator::Ne => "!=",
            QualOperator::Gt => ">",
            QualOperator::Ge => ">=",
            QualOperator::Lt => "<",
            QualOperator::Le => "<=",
            QualOperator::Contains => "~",
        }
    }

    fn from_jql(op: &str) -> Option<Self> {
        match op {
            "=" => Some(QualOperator::Eq),
            "!=" => Some(QualOperator::Ne),
            ">" => Some(QualOperator::Gt),
            ">=" => Some(QualOperator::Ge),
            "<" => Some(QualOperator::Lt),
            "<=" => Some(QualOperator::Le),
            "~" => Some(QualOperator::Contains),
            _ => None,
        }
    }
}

/// 述語の型付き値
#[derive(Debug, Clone, PartialEq)]
pub enum QualValue {
    String(String),
    Timestamp(DateTime<Utc>),
    Int(i64),
}

/// 呼び出し側が指定した1カラム分のフィルタ条件
#[derive(Debug, Clone, PartialEq)]
pub struct Qual {
    pub column: String,
    pub operator: QualOperator,
    pub value: QualValue,
}

impl Qual {
    pub fn string(column: impl Into<String>, operator: QualOperator, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: QualValue::String(value.into()),
        }
    }

    pub fn timestamp(column: impl Into<String>, operator: QualOperator, value: DateTime<Utc>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: QualValue::Timestamp(value),
        }
    }

    pub fn int(column: impl Into<String>, operator: QualOperator, value: i64) -> Self {
        Self {
            column: column.into(),
            operator,
            value: QualValue::Int(value),
        }
    }
}

/// 宣言されたカラムの値型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    String,
    Timestamp,
    Int,
}

/// フィルタ可能として宣言されたカラム
///
/// 宣言順がJQL句の出力順を決める。
#[derive(Debug, Clone)]
pub struct FilterColumn {
    pub name: String,
    pub kind: ColumnKind,
    pub operators: Vec<QualOperator>,
}

impl FilterColumn {
    /// 等値・非等値を受け付ける文字列カラム
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::String,
            operators: vec![QualOperator::Eq, QualOperator::Ne],
        }
    }

    /// 比較演算を受け付けるタイムスタンプカラム
    pub fn timestamp(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Timestamp,
            operators: vec![
                QualOperator::Eq,
                QualOperator::Gt,
                QualOperator::Ge,
                QualOperator::Le,
                QualOperator::Lt,
            ],
        }
    }

    /// 部分一致も受け付ける文字列カラム
    pub fn searchable_string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::String,
            operators: vec![QualOperator::Eq, QualOperator::Ne, QualOperator::Contains],
        }
    }

    /// 等値・比較を受け付ける整数カラム
    pub fn int(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Int,
            operators: vec![
                QualOperator::Eq,
                QualOperator::Ne,
                QualOperator::Gt,
                QualOperator::Ge,
                QualOperator::Le,
                QualOperator::Lt,
            ],
        }
    }
}

/// Issueテーブルのフィルタ可能カラム一覧
///
/// 宣言順は固定で、生成されるJQLの句順を決定する。
pub fn issue_filter_columns() -> Vec<FilterColumn> {
    vec![
        FilterColumn::string("assignee_account_id"),
        FilterColumn::string("assignee_display_name"),
        FilterColumn::timestamp("created"),
        FilterColumn::string("creator_account_id"),
        FilterColumn::string("creator_display_name"),
        FilterColumn::timestamp("duedate"),
        FilterColumn::string("epic_key"),
        FilterColumn::string("priority"),
        FilterColumn::string("project_id"),
        FilterColumn::string("project_key"),
        FilterColumn::string("project_name"),
        FilterColumn::string("reporter_account_id"),
        FilterColumn::string("reporter_display_name"),
        FilterColumn::timestamp("resolution_date"),
        FilterColumn::string("status"),
        FilterColumn::string("status_category"),
        FilterColumn::string("type"),
        FilterColumn::timestamp("updated"),
    ]
}

/// カラム名からJQLのフィールドキーを導出
///
/// 1. 固定の対応表（APIのカラム名とJQLフィールド名のずれを吸収）
/// 2. カスタムフィールドの論理名 → テナント既定の表示名
/// 3. どちらにも無ければカラム名の最初のアンダースコア区切りトークン
///
/// 3は粗いヒューリスティックだが、既存テナントとの互換のため保持する。
/// 導出に頼ったカラムは警告ログで可視化する。
pub fn jql_field_key(column_name: &str) -> String {
    const FIXED_KEYS: &[(&str, &str)] = &[
        ("resolution_date", "resolutionDate"),
        ("status_category", "statusCategory"),
        ("parent_key", "parent"),
        ("parent_status", "parentStatus"),
        ("parent_status_category", "parentStatusCategory"),
        ("parent_issue_type", "parentIssueType"),
    ];

    if let Some((_, key)) = FIXED_KEYS.iter().find(|(name, _)| *name == column_name) {
        return (*key).to_string();
    }

    if let Some((_, display)) = crate::field_keys::LOGICAL_FIELD_NAMES
        .iter()
        .find(|(logical, _)| *logical == column_name)
    {
        return (*display).to_string();
    }

    let derived = column_name
        .split('_')
        .next()
        .unwrap_or(column_name)
        .to_lowercase();
    warn!(column = %column_name, key = %derived, "deriving JQL field key from column name");
    derived
}

/// 宣言カラムと述語の集合からJQLフィルタ文字列を構築
///
/// 句はANDで結合される。述語が1つも該当しない場合は空文字列を返す。
/// OR・括弧は生成しない（連言フィルタ専用）。
pub fn build_jql_from_quals(columns: &[FilterColumn], quals: &[Qual]) -> Result<String> {
    let mut filters = Vec::new();

    for column in columns {
        for qual in quals.iter().filter(|q| q.column == column.name) {
            if !column.operators.contains(&qual.operator) {
                return Err(Error::UnsupportedOperator {
                    column: column.name.clone(),
                    operator: qual.operator.jql().to_string(),
                });
            }

            let key = jql_field_key(&column.name);
            let clause = match (&column.kind, &qual.value) {
                (ColumnKind::String, QualValue::String(value)) => {
                    format!("\"{}\" {} \"{}\"", key, qual.operator.jql(), value)
                }
                (ColumnKind::Timestamp, QualValue::Timestamp(value)) => {
                    // JQLのタイムスタンプ比較は分精度まで
                    format!(
                        "\"{}\" {} \"{}\"",
                        key,
                        qual.operator.jql(),
                        value.format("%Y-%m-%d %H:%M")
                    )
                }
                (ColumnKind::Int, QualValue::Int(value)) => {
                    format!("\"{}\" {} {}", key, qual.operator.jql(), value)
                }
                _ => {
                    return Err(Error::InvalidConfiguration(format!(
                        "qual value type does not match declared column type for '{}'",
                        column.name
                    )));
                }
            };
            filters.push(clause);
        }
    }

    Ok(filters.join(" AND "))
}

/// 結果を親プロジェクトに必ず係留したJQLを構築
///
/// 述語が無くても project= 句を出力し、テナント全体を走査する
/// 無制限クエリになることを防ぐ。
pub fn anchored_jql(project_key: &str, qual_jql: &str) -> String {
    if qual_jql.is_empty() {
        format!("project={}", project_key)
    } else {
        format!("project={} AND {}", project_key, qual_jql)
    }
}

/// 生成したJQLを (キー, 演算子, 値) の組に分解
///
/// 本クレートが生成する固定文法の句のみを対象とする。
/// 任意のJQLのパースは行わない。
pub fn parse_clauses(jql: &str) -> Vec<(String, QualOperator, String)> {
    let mut clauses = Vec::new();

    for clause in jql.split(" AND ") {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }

        let Some(rest) = clause.strip_prefix('"') else {
            continue;
        };
        let Some(key_end) = rest.find('"') else {
            continue;
        };
        let key = &rest[..key_end];
        let rest = rest[key_end + 1..].trim_start();

        let Some(op_end) = rest.find(' ') else {
            continue;
        };
        let Some(operator) = QualOperator::from_jql(&rest[..op_end]) else {
            continue;
        };

        let value = rest[op_end + 1..].trim().trim_matches('"');
        clauses.push((key.to_string(), operator, value.to_string()));
    }

    clauses
}
