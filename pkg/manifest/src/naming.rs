//! Deterministic cluster-safe names.
//!
//! Cluster names are at most 63 chars of `[a-z0-9-]` and never begin or end
//! with `-`.

use pkg_constants::naming::*;
use sha2::{Digest, Sha256};

/// Lowercase `name`, replace every run of invalid chars with a single `-`,
/// trim `-` from both ends and truncate to 63 chars.
/// Returns `unnamed` when nothing valid is left.
pub fn sanitise(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    truncate_name(&mut out, MAX_NAME_LEN);
    if out.is_empty() {
        return UNNAMED.to_string();
    }
    out
}

/// Cut to `max` chars and strip any trailing `-` the cut exposed.
fn truncate_name(name: &mut String, max: usize) {
    if name.len() > max {
        name.truncate(max);
    }
    while name.ends_with('-') {
        name.pop();
    }
}

/// First six hex chars of the SHA-256 of `input`.
pub fn hash6(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(HASH_SUFFIX_LEN);
    hex
}

/// `sanitise(prefix-raw_name)` followed by `-<hash6("project-<id>")>`,
/// with the base shortened so the whole name fits in 63 chars.
pub fn derive(prefix: &str, raw_name: &str, stable_id: u64) -> String {
    let suffix = format!("-{}", hash6(&format!("project-{}", stable_id)));
    let mut base = sanitise(&format!("{}-{}", prefix, raw_name));
    truncate_name(&mut base, MAX_NAME_LEN - suffix.len());
    if base.is_empty() {
        base = UNNAMED.to_string();
    }
    format!("{}{}", base, suffix)
}

/// Per-(project, user) namespace: `proj-<project_id>-<safe_username>`.
pub fn format_namespace(project_id: u64, safe_username: &str) -> String {
    format!("{}-{}-{}", PROJECT_NAMESPACE_PREFIX, project_id, safe_username)
}

/// Per-user hub namespace: `user-<safe_username>-storage`.
pub fn format_storage_namespace(safe_username: &str) -> String {
    format!(
        "{}-{}-{}",
        USER_NAMESPACE_PREFIX, safe_username, STORAGE_NAMESPACE_SUFFIX
    )
}

/// Per-user hub claim: `user-<safe_username>-disk`.
pub fn format_hub_claim(safe_username: &str) -> String {
    format!("{}-{}-{}", USER_NAMESPACE_PREFIX, safe_username, HUB_CLAIM_SUFFIX)
}

/// Prefix shared by every per-user namespace of one project.
pub fn project_namespace_prefix(project_id: u64) -> String {
    format!("{}-{}-", PROJECT_NAMESPACE_PREFIX, project_id)
}

/// Project id encoded in a `proj-<id>-<user>` namespace.
pub fn parse_project_namespace(namespace: &str) -> Option<u64> {
    let rest = namespace.strip_prefix(PROJECT_NAMESPACE_PREFIX)?.strip_prefix('-')?;
    let (id, user) = rest.split_once('-')?;
    if user.is_empty() {
        return None;
    }
    id.parse().ok()
}

/// Admin-provisioned project namespace: `project-<sanitised>-<hash6>`.
pub fn project_storage_namespace(project_name: &str, project_id: u64) -> String {
    derive(PROJECT_STORAGE_PREFIX, project_name, project_id)
}

/// Project-shared claim: `pvc-<project_namespace>`.
pub fn project_claim(project_namespace: &str) -> String {
    format!("{}-{}", PROJECT_CLAIM_PREFIX, project_namespace)
}

/// In-cluster DNS name of a service.
pub fn service_dns(service: &str, namespace: &str) -> String {
    format!("{}.{}.{}", service, namespace, CLUSTER_DNS_SUFFIX)
}

/// File browser deployment name for a claim.
pub fn browser_name(claim: &str) -> String {
    format!("{}-{}", FILEBROWSER_PREFIX, claim)
}

/// File browser service name for a claim.
pub fn browser_service_name(claim: &str) -> String {
    format!("{}-{}-{}", FILEBROWSER_PREFIX, claim, SERVICE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::validate::validate_name;
    use proptest::prelude::*;

    #[test]
    fn sanitise_basics() {
        assert_eq!(sanitise("Alice"), "alice");
        assert_eq!(sanitise("john.doe@example.com"), "john-doe-example-com");
        assert_eq!(sanitise("--weird__name--"), "weird-name");
        assert_eq!(sanitise("a   b"), "a-b");
        assert_eq!(sanitise("!!!"), "unnamed");
        assert_eq!(sanitise(""), "unnamed");
    }

    #[test]
    fn sanitise_truncates_without_trailing_dash() {
        let raw = format!("{}-{}", "a".repeat(62), "bbbb");
        let safe = sanitise(&raw);
        assert_eq!(safe, "a".repeat(62));
        assert!(safe.len() <= 63);
    }

    #[test]
    fn derive_is_stable_and_bounded() {
        let a = derive("project", "My Cool Project", 42);
        let b = derive("project", "My Cool Project", 42);
        assert_eq!(a, b);
        assert!(a.starts_with("project-my-cool-project-"));
        assert_eq!(a.len(), "project-my-cool-project-".len() + 6);
        assert_ne!(a, derive("project", "My Cool Project", 43));

        let long = derive("project", &"x".repeat(200), 1);
        assert_eq!(long.len(), 63);
        validate_name(&long).unwrap();
    }

    #[test]
    fn naming_conventions() {
        assert_eq!(format_namespace(7, "alice"), "proj-7-alice");
        assert_eq!(format_storage_namespace("alice"), "user-alice-storage");
        assert_eq!(format_hub_claim("alice"), "user-alice-disk");
        assert_eq!(project_claim("project-x-abc123"), "pvc-project-x-abc123");
        assert_eq!(
            service_dns("storage-svc", "user-alice-storage"),
            "storage-svc.user-alice-storage.svc.cluster.local"
        );
        assert_eq!(browser_name("pvc-a"), "filebrowser-pvc-a");
        assert_eq!(browser_service_name("pvc-a"), "filebrowser-pvc-a-svc");
    }

    #[test]
    fn project_namespace_parsing() {
        assert_eq!(parse_project_namespace("proj-12-alice"), Some(12));
        assert_eq!(parse_project_namespace("proj-12-al-ice"), Some(12));
        assert_eq!(parse_project_namespace("proj-12-"), None);
        assert_eq!(parse_project_namespace("user-alice-storage"), None);
        assert_eq!(parse_project_namespace("proj-x-alice"), None);
        assert!(format_namespace(3, "bob").starts_with(&project_namespace_prefix(3)));
        assert!(!format_namespace(31, "bob").starts_with(&project_namespace_prefix(3)));
    }

    proptest! {
        #[test]
        fn derived_names_are_valid(prefix in ".{0,20}", name in ".{0,120}", id in any::<u64>()) {
            let derived = derive(&prefix, &name, id);
            prop_assert!(derived.len() <= 63);
            prop_assert!(validate_name(&derived).is_ok(), "invalid name {}", derived);
            prop_assert_eq!(derived.clone(), derive(&prefix, &name, id));
        }

        #[test]
        fn sanitised_names_are_valid(name in ".{0,200}") {
            let safe = sanitise(&name);
            prop_assert!(validate_name(&safe).is_ok(), "invalid name {}", safe);
        }
    }
}
