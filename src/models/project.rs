use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(rename = "self")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "projectTypeKey")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_type_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simplified: Option<bool>,
    #[serde(rename = "avatarUrls")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_urls: Option<HashMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_deserialization() {
        let json_data = json!({
            "id": "10000",
            "key": "OPS",
            "name": "Operations",
            "self": "https://example.atlassian.net/rest/api/3/project/10000",
            "projectTypeKey": "software",
            "simplified": false
        });

        let project: Project = serde_json::from_value(json_data).unwrap();

        assert_eq!(project.id, "10000");
        assert_eq!(project.key, "OPS");
        assert_eq!(project.project_type_key, Some("software".to_string()));
    }
}
