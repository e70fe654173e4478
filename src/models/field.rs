use serde::{Deserialize, Serialize};

/// フィールドメタデータ（`/rest/api/3/field` および検索レスポンスのnames展開に対応）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub searchable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<FieldSchema>,
    #[serde(rename = "clauseNames")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clause_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,
    #[serde(rename = "customId")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<u64>,
}

impl Field {
    /// カスタムフィールドかどうか（idの接頭辞でも判定できるようにしておく）
    pub fn is_custom(&self) -> bool {
        self.custom.unwrap_or_else(|| self.id.starts_with("customfield_"))
    }
}
