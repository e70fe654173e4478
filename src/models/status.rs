use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    pub name: String,
    #[serde(rename = "self")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "statusCategory")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_category: Option<StatusCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCategory {
    pub id: u32,
    pub key: String,
    pub name: String,
    #[serde(rename = "colorName")]
    pub color_name: String,
}

impl Status {
    /// ステータスカテゴリ名（Open / In Progress / Done）を取得
    pub fn category_name(&self) -> Option<&str> {
        self.status_category.as_ref().map(|c| c.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_deserialization() {
        let json_data = json!({
            "id": "1",
            "name": "To Do",
            "self": "https://example.atlassian.net/rest/api/3/status/1",
            "statusCategory": {
                "id": 2,
                "key": "new",
                "name": "To Do",
                "colorName": "blue-gray"
            }
        });

        let status: Status = serde_json::from_value(json_data).unwrap();

        assert_eq!(status.id, "1");
        assert_eq!(status.name, "To Do");
        assert_eq!(status.category_name(), Some("To Do"));
    }

    #[test]
    fn test_status_without_category() {
        let json_data = json!({ "id": "5", "name": "Resolved" });

        let status: Status = serde_json::from_value(json_data).unwrap();
        assert!(status.category_name().is_none());
    }
}
