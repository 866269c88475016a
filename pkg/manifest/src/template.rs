//! `{{key}}` placeholder substitution over parsed manifest trees.

use pkg_types::{CoreError, CoreResult};
use serde_json::Value;
use std::collections::BTreeMap;

/// Values spliced into a manifest at instantiation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceValues {
    pub username: String,
    pub original_username: String,
    pub safe_username: String,
    pub namespace: String,
    pub nfs_server: String,
    pub user_storage_namespace: String,
    pub project_id: u64,
}

impl InstanceValues {
    /// Placeholder name to value.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("username".to_string(), self.username.clone()),
            ("originalUsername".to_string(), self.original_username.clone()),
            ("safeUsername".to_string(), self.safe_username.clone()),
            ("namespace".to_string(), self.namespace.clone()),
            ("nfsServer".to_string(), self.nfs_server.clone()),
            (
                "userStorageNamespace".to_string(),
                self.user_storage_namespace.clone(),
            ),
            ("projectId".to_string(), self.project_id.to_string()),
        ])
    }
}

/// Parse `json_text`, replace `{{key}}` in every string leaf and re-serialise.
/// Unknown placeholders stay verbatim. Object keys are never rewritten.
pub fn substitute(json_text: &str, values: &BTreeMap<String, String>) -> CoreResult<String> {
    let mut tree: Value = serde_json::from_str(json_text)
        .map_err(|e| CoreError::InvalidInput(format!("malformed manifest body: {}", e)))?;
    substitute_value(&mut tree, values);
    Ok(serde_json::to_string(&tree).map_err(anyhow::Error::from)?)
}

/// In-place variant of [`substitute`] for an already parsed tree.
pub fn substitute_value(value: &mut Value, values: &BTreeMap<String, String>) {
    match value {
        Value::String(s) => {
            if s.contains("{{") {
                *s = replace_placeholders(s, values);
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_value(item, values);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                substitute_value(v, values);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn replace_placeholders(input: &str, values: &BTreeMap<String, String>) -> String {
    let mut out = input.to_string();
    for (key, replacement) in values {
        let token = format!("{{{{{}}}}}", key);
        if out.contains(&token) {
            out = out.replace(&token, replacement);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values() -> InstanceValues {
        InstanceValues {
            username: "Alice".into(),
            original_username: "Alice".into(),
            safe_username: "alice".into(),
            namespace: "proj-3-alice".into(),
            nfs_server: "10.0.0.5".into(),
            user_storage_namespace: "user-alice-storage".into(),
            project_id: 3,
        }
    }

    #[test]
    fn substitutes_string_leaves() {
        let body = json!({
            "metadata": {"name": "web-{{safeUsername}}", "namespace": "{{namespace}}"},
            "spec": {
                "volumes": [{"nfs": {"server": "{{nfsServer}}", "path": "/"}}],
                "replicas": 2,
                "paused": false
            }
        })
        .to_string();
        let out: Value = serde_json::from_str(&substitute(&body, &values().to_map()).unwrap()).unwrap();
        assert_eq!(out["metadata"]["name"], "web-alice");
        assert_eq!(out["metadata"]["namespace"], "proj-3-alice");
        assert_eq!(out["spec"]["volumes"][0]["nfs"]["server"], "10.0.0.5");
        assert_eq!(out["spec"]["replicas"], 2);
        assert_eq!(out["spec"]["paused"], false);
    }

    #[test]
    fn leaves_unknown_tokens_and_keys_alone() {
        let body = json!({"{{namespace}}": "{{unknown}} in {{projectId}}"}).to_string();
        let out = substitute(&body, &values().to_map()).unwrap();
        assert_eq!(out, r#"{"{{namespace}}":"{{unknown}} in 3"}"#);
    }

    #[test]
    fn values_with_braces_do_not_break_json() {
        let mut map = values().to_map();
        map.insert("username".into(), "\"quoted\" {x}".into());
        let body = json!({"a": "{{username}}"}).to_string();
        let out: Value = serde_json::from_str(&substitute(&body, &map).unwrap()).unwrap();
        assert_eq!(out["a"], "\"quoted\" {x}");
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            substitute("not json", &BTreeMap::new()),
            Err(CoreError::InvalidInput(_))
        ));
    }
}
