//! Multi-document bundle codec.
//!
//! A bundle is YAML text with documents separated by `---` lines. Each
//! document is converted to compact JSON (key order preserved) and checked
//! for `apiVersion`, `kind` and `metadata.name`.

use pkg_types::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// Empty for the core API group.
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    /// Split an `apiVersion` such as `apps/v1` or `v1`.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        Self {
            group,
            version,
            kind: kind.to_string(),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl std::fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// One validated document of a bundle, ready to persist as a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub kind: String,
    pub name: String,
    pub canonical: String,
}

/// Split a bundle on `---` separator lines, dropping blank documents.
pub fn split(raw_text: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();
    for line in raw_text.lines() {
        let trimmed = line.trim();
        if trimmed == "---" || trimmed.starts_with("--- ") {
            push_doc(&mut docs, &current);
            current.clear();
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    push_doc(&mut docs, &current);
    docs
}

fn push_doc(docs: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

/// Parse one YAML document into compact JSON.
pub fn to_canonical(doc_text: &str) -> CoreResult<String> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(doc_text)
        .map_err(|e| CoreError::InvalidInput(format!("malformed manifest: {}", e)))?;
    let json = yaml_to_json(yaml)?;
    Ok(serde_json::to_string(&json).map_err(anyhow::Error::from)?)
}

fn yaml_to_json(value: serde_yaml::Value) -> CoreResult<Value> {
    use serde_yaml::Value as Y;
    Ok(match value {
        Y::Null => Value::Null,
        Y::Bool(b) => Value::Bool(b),
        Y::Number(n) => yaml_number(&n)?,
        Y::String(s) => Value::String(s),
        Y::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<CoreResult<Vec<_>>>()?,
        ),
        Y::Mapping(mapping) => {
            let mut map = Map::with_capacity(mapping.len());
            for (k, v) in mapping {
                let key = match k {
                    Y::String(s) => s,
                    other => {
                        return Err(CoreError::InvalidInput(format!(
                            "malformed manifest: mapping key {:?} is not a string",
                            other
                        )));
                    }
                };
                map.insert(key, yaml_to_json(v)?);
            }
            Value::Object(map)
        }
        Y::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn yaml_number(n: &serde_yaml::Number) -> CoreResult<Value> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::Number(i.into()));
    }
    if let Some(u) = n.as_u64() {
        return Ok(Value::Number(u.into()));
    }
    n.as_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| CoreError::InvalidInput(format!("malformed manifest: bad number {}", n)))
}

/// Check a canonical document and return its GVK and `metadata.name`.
pub fn validate(canonical_json: &str) -> CoreResult<(GroupVersionKind, String)> {
    let value: Value = serde_json::from_str(canonical_json)
        .map_err(|e| CoreError::InvalidInput(format!("malformed manifest: {}", e)))?;
    validate_value(&value)
}

/// [`validate`] on an already parsed tree.
pub fn validate_value(value: &Value) -> CoreResult<(GroupVersionKind, String)> {
    let obj = value
        .as_object()
        .ok_or_else(|| CoreError::InvalidInput("manifest must be a mapping".into()))?;
    let api_version = non_empty_str(obj.get("apiVersion"))
        .ok_or_else(|| CoreError::InvalidInput("manifest is missing apiVersion".into()))?;
    let kind = non_empty_str(obj.get("kind"))
        .ok_or_else(|| CoreError::InvalidInput("manifest is missing kind".into()))?;
    let name = non_empty_str(obj.get("metadata").and_then(|m| m.get("name")))
        .ok_or_else(|| CoreError::InvalidInput("manifest is missing metadata.name".into()))?;
    Ok((
        GroupVersionKind::from_api_version(api_version, kind),
        name.to_string(),
    ))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

/// Canonical spelling of well-known kinds; anything else is title-cased.
pub fn normalise_kind(kind: &str) -> String {
    let known = match kind.to_ascii_lowercase().as_str() {
        "pod" => Some("Pod"),
        "service" => Some("Service"),
        "deployment" => Some("Deployment"),
        "configmap" => Some("ConfigMap"),
        "ingress" => Some("Ingress"),
        "job" => Some("Job"),
        "cronjob" => Some("CronJob"),
        "statefulset" => Some("StatefulSet"),
        "daemonset" => Some("DaemonSet"),
        "secret" => Some("Secret"),
        "persistentvolumeclaim" => Some("PersistentVolumeClaim"),
        _ => None,
    };
    if let Some(k) = known {
        return k.to_string();
    }
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Split, convert and validate a whole bundle. Fails on the first bad
/// document or when the bundle holds no documents at all.
pub fn parse_bundle(raw_text: &str) -> CoreResult<Vec<ParsedDocument>> {
    let docs = split(raw_text);
    if docs.is_empty() {
        return Err(CoreError::InvalidInput("no valid YAML documents found".into()));
    }
    let mut parsed = Vec::with_capacity(docs.len());
    for (idx, doc) in docs.iter().enumerate() {
        let canonical = to_canonical(doc).map_err(|e| prefix_doc(idx, e))?;
        let (gvk, name) = validate(&canonical).map_err(|e| prefix_doc(idx, e))?;
        if parsed.iter().any(|p: &ParsedDocument| p.name == name) {
            return Err(CoreError::InvalidInput(format!(
                "document {}: duplicate metadata.name '{}'",
                idx + 1,
                name
            )));
        }
        parsed.push(ParsedDocument {
            kind: normalise_kind(&gvk.kind),
            name,
            canonical,
        });
    }
    Ok(parsed)
}

fn prefix_doc(idx: usize, err: CoreError) -> CoreError {
    match err {
        CoreError::InvalidInput(msg) => CoreError::InvalidInput(format!("document {}: {}", idx + 1, msg)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const BUNDLE: &str = "\
apiVersion: v1
kind: Pod
metadata:
  name: web
spec:
  containers:
    - name: c
      image: nginx
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
data:
  mode: dev
";

    #[test]
    fn split_keeps_order_and_skips_blank_documents() {
        let docs = split("---\n\n---\na: 1\n---   \nb: 2\n--- # tail\nc: 3\n---\n   \n");
        assert_eq!(docs, vec!["a: 1", "b: 2", "c: 3"]);
        assert!(split("").is_empty());
        assert!(split("---\n---\n").is_empty());
    }

    #[test]
    fn split_only_breaks_on_separator_lines() {
        let docs = split("a: \"x---y\"\nb: ---c\n");
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn canonical_preserves_key_order() {
        let out = to_canonical("kind: Pod\napiVersion: v1\nmetadata:\n  name: a\n").unwrap();
        assert_eq!(out, r#"{"kind":"Pod","apiVersion":"v1","metadata":{"name":"a"}}"#);
    }

    #[test]
    fn canonical_rejects_non_string_keys() {
        let err = to_canonical("1: one\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
        let err = to_canonical("? [a, b]\n: x\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn validate_requires_fields() {
        let (gvk, name) =
            validate(r#"{"apiVersion":"apps/v1","kind":"Deployment","metadata":{"name":"d"}}"#)
                .unwrap();
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Deployment");
        assert_eq!(gvk.api_version(), "apps/v1");
        assert_eq!(name, "d");

        assert!(validate(r#"{"kind":"Pod","metadata":{"name":"p"}}"#).is_err());
        assert!(validate(r#"{"apiVersion":"v1","metadata":{"name":"p"}}"#).is_err());
        assert!(validate(r#"{"apiVersion":"v1","kind":"Pod","metadata":{}}"#).is_err());
        assert!(validate(r#"{"apiVersion":"v1","kind":"Pod","metadata":{"name":""}}"#).is_err());
        assert!(validate(r#"["not", "a", "map"]"#).is_err());
    }

    #[test]
    fn kind_normalisation() {
        assert_eq!(normalise_kind("configmap"), "ConfigMap");
        assert_eq!(normalise_kind("POD"), "Pod");
        assert_eq!(normalise_kind("PersistentVolumeClaim"), "PersistentVolumeClaim");
        assert_eq!(normalise_kind("cronjob"), "CronJob");
        assert_eq!(normalise_kind("networkPOLICY"), "Networkpolicy");
        assert_eq!(normalise_kind(""), "");
    }

    #[test]
    fn parse_bundle_stages_documents() {
        let docs = parse_bundle(BUNDLE).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!((docs[0].kind.as_str(), docs[0].name.as_str()), ("Pod", "web"));
        assert_eq!((docs[1].kind.as_str(), docs[1].name.as_str()), ("ConfigMap", "settings"));
        let body: Value = serde_json::from_str(&docs[1].canonical).unwrap();
        assert_eq!(body["data"]["mode"], "dev");
    }

    #[test]
    fn parse_bundle_errors() {
        assert!(matches!(parse_bundle("  \n---\n"), Err(CoreError::InvalidInput(m)) if m.contains("no valid")));
        let missing = "apiVersion: v1\nkind: Pod\nmetadata:\n  name: a\n---\nkind: Pod\n";
        assert!(matches!(parse_bundle(missing), Err(CoreError::InvalidInput(m)) if m.starts_with("document 2")));
        let dup = "apiVersion: v1\nkind: Pod\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: Service\nmetadata:\n  name: a\n";
        assert!(parse_bundle(dup).is_err());
    }

    fn label() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,20}[a-z0-9]"
    }

    proptest! {
        #[test]
        fn validate_round_trips_through_yaml(
            group in prop::option::of(label()),
            version in "v[1-9][a-z0-9]{0,5}",
            kind in "[A-Z][A-Za-z]{0,15}",
            name in label(),
            extra in prop::collection::btree_map(label(), "[a-zA-Z0-9 ._-]{0,20}", 0..4),
        ) {
            let api_version = match &group {
                Some(g) => format!("{}/{}", g, version),
                None => version.clone(),
            };
            let input = json!({
                "apiVersion": api_version,
                "kind": kind,
                "metadata": {"name": name, "labels": extra},
            });
            let yaml = serde_yaml::to_string(&input).unwrap();
            let (gvk, got_name) = validate(&to_canonical(&yaml).unwrap()).unwrap();
            prop_assert_eq!(gvk, GroupVersionKind::from_api_version(&api_version, &kind));
            prop_assert_eq!(got_name, name);
        }
    }
}
