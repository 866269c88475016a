//! Structural rewrites applied to manifests before they reach the cluster.

use pkg_constants::gpu::*;
use pkg_constants::storage::DEFAULT_STORAGE_NAME;
use pkg_types::project::ProjectGpuSettings;
use pkg_types::{CoreError, CoreResult};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct PolicyInput {
    pub enforce_read_only: bool,
    pub gpu: ProjectGpuSettings,
}

/// Run every manifest rewrite in order.
pub fn apply(manifest: &mut Value, input: &PolicyInput) {
    if input.enforce_read_only {
        enforce_read_only(manifest);
    }
    inject_mps(manifest, &input.gpu);
}

fn pod_spec_mut(manifest: &mut Value) -> Option<&mut Map<String, Value>> {
    let kind = manifest.get("kind").and_then(Value::as_str)?.to_string();
    let pointer = match kind.as_str() {
        "Pod" => "/spec",
        "Deployment" | "StatefulSet" | "DaemonSet" | "Job" => "/spec/template/spec",
        _ => return None,
    };
    manifest.pointer_mut(pointer).and_then(Value::as_object_mut)
}

/// Mark every mount of a claim-backed volume read-only, except mounts of
/// the project's default write-space claim.
pub fn enforce_read_only(manifest: &mut Value) {
    let Some(spec) = pod_spec_mut(manifest) else {
        return;
    };
    let guarded: HashSet<String> = spec
        .get("volumes")
        .and_then(Value::as_array)
        .map(|volumes| {
            volumes
                .iter()
                .filter_map(|v| {
                    let name = v.get("name").and_then(Value::as_str)?;
                    let claim = v.pointer("/persistentVolumeClaim/claimName")?.as_str()?;
                    (claim != DEFAULT_STORAGE_NAME).then(|| name.to_string())
                })
                .collect()
        })
        .unwrap_or_default();
    if guarded.is_empty() {
        return;
    }

    let Some(containers) = spec.get_mut("containers").and_then(Value::as_array_mut) else {
        return;
    };
    for container in containers {
        let Some(mounts) = container.get_mut("volumeMounts").and_then(Value::as_array_mut) else {
            continue;
        };
        for mount in mounts.iter_mut().filter_map(Value::as_object_mut) {
            let hit = mount
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| guarded.contains(n));
            if hit {
                mount.insert("readOnly".to_string(), Value::Bool(true));
            }
        }
    }
}

/// Add the project's MPS limits to `metadata.annotations`.
pub fn inject_mps(manifest: &mut Value, gpu: &ProjectGpuSettings) {
    let Some(metadata) = manifest.get_mut("metadata").and_then(Value::as_object_mut) else {
        return;
    };
    let annotations = metadata
        .entry("annotations")
        .or_insert_with(|| Value::Object(Map::new()));
    if !annotations.is_object() {
        *annotations = Value::Object(Map::new());
    }
    let Some(annotations) = annotations.as_object_mut() else {
        return;
    };
    for (key, value) in mps_annotations(gpu) {
        annotations.insert(key, Value::String(value));
    }
}

fn mps_annotations(gpu: &ProjectGpuSettings) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if gpu.mps_threads > 0 {
        out.insert(MPS_THREADS_ANNOTATION.to_string(), gpu.mps_threads.to_string());
    }
    if gpu.mps_memory_mib > 0 {
        out.insert(MPS_VRAM_ANNOTATION.to_string(), format!("{}M", gpu.mps_memory_mib));
    }
    out
}

/// Concrete GPU resource for a job container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuResourcePlan {
    pub resource_name: String,
    pub quantity: i64,
    pub annotations: BTreeMap<String, String>,
}

/// Translate a job's `(count, type)` into a resource request.
///
/// Dedicated GPUs are emulated on shared nodes: the request becomes
/// `count * 10` shared units with the MPS limits raised to the maximum.
pub fn translate_gpu(
    count: u32,
    gpu_type: &str,
    project: &ProjectGpuSettings,
) -> CoreResult<GpuResourcePlan> {
    match gpu_type {
        ACCESS_DEDICATED => Ok(GpuResourcePlan {
            resource_name: GPU_SHARED_RESOURCE.to_string(),
            quantity: i64::from(count) * i64::from(MPS_UNITS_PER_GPU),
            annotations: BTreeMap::from([
                (MPS_THREADS_ANNOTATION.to_string(), EMULATED_MPS_THREADS.to_string()),
                (MPS_VRAM_ANNOTATION.to_string(), EMULATED_MPS_VRAM.to_string()),
            ]),
        }),
        ACCESS_SHARED => Ok(GpuResourcePlan {
            resource_name: GPU_SHARED_RESOURCE.to_string(),
            quantity: i64::from(count),
            annotations: mps_annotations(project),
        }),
        other => Err(CoreError::InvalidInput(format!(
            "unknown GPU type '{}' (expected {} or {})",
            other, ACCESS_SHARED, ACCESS_DEDICATED
        ))),
    }
}

/// Quota units a request consumes.
pub fn requested_units(count: u32, gpu_type: &str) -> u32 {
    if gpu_type == ACCESS_DEDICATED {
        count.saturating_mul(MPS_UNITS_PER_GPU)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "train"},
            "spec": {
                "replicas": 1,
                "template": {
                    "metadata": {"labels": {"app": "train"}},
                    "spec": {
                        "containers": [
                            {
                                "name": "main",
                                "image": "pytorch",
                                "volumeMounts": [
                                    {"name": "datasets", "mountPath": "/data"},
                                    {"name": "scratch", "mountPath": "/scratch"},
                                    {"name": "home", "mountPath": "/home"},
                                    {"name": "tmp", "mountPath": "/tmp"}
                                ]
                            },
                            {
                                "name": "sidecar",
                                "image": "busybox",
                                "volumeMounts": [{"name": "datasets", "mountPath": "/d", "readOnly": false}]
                            }
                        ],
                        "volumes": [
                            {"name": "datasets", "persistentVolumeClaim": {"claimName": "shared-data"}},
                            {"name": "scratch", "persistentVolumeClaim": {"claimName": "project"}},
                            {"name": "home", "nfs": {"server": "10.0.0.1", "path": "/"}},
                            {"name": "tmp", "emptyDir": {}}
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn read_only_touches_only_foreign_claim_mounts() {
        let original = deployment();
        let mut rewritten = original.clone();
        enforce_read_only(&mut rewritten);

        let mounts = rewritten
            .pointer("/spec/template/spec/containers/0/volumeMounts")
            .unwrap()
            .as_array()
            .unwrap();
        assert_eq!(mounts[0]["readOnly"], json!(true));
        assert!(mounts[1].get("readOnly").is_none());
        assert!(mounts[2].get("readOnly").is_none());
        assert!(mounts[3].get("readOnly").is_none());
        assert_eq!(
            rewritten.pointer("/spec/template/spec/containers/1/volumeMounts/0/readOnly"),
            Some(&json!(true))
        );

        // Clearing the flags we set restores the input exactly.
        let mut restored = rewritten.clone();
        restored["spec"]["template"]["spec"]["containers"][0]["volumeMounts"][0]
            .as_object_mut()
            .unwrap()
            .remove("readOnly");
        restored["spec"]["template"]["spec"]["containers"][1]["volumeMounts"][0]["readOnly"] =
            json!(false);
        assert_eq!(restored, original);
    }

    #[test]
    fn read_only_on_pod_and_unknown_kinds() {
        let mut pod = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "p"},
            "spec": {
                "containers": [{"name": "c", "image": "x", "volumeMounts": [{"name": "v", "mountPath": "/v"}]}],
                "volumes": [{"name": "v", "persistentVolumeClaim": {"claimName": "other"}}]
            }
        });
        enforce_read_only(&mut pod);
        assert_eq!(pod.pointer("/spec/containers/0/volumeMounts/0/readOnly"), Some(&json!(true)));

        let mut cm = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "c"}, "data": {}});
        let before = cm.clone();
        enforce_read_only(&mut cm);
        assert_eq!(cm, before);
    }

    #[test]
    fn mps_annotations_follow_project_settings() {
        let mut manifest = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "p"}});
        let gpu = ProjectGpuSettings {
            mps_threads: 50,
            mps_memory_mib: 2048,
            ..Default::default()
        };
        inject_mps(&mut manifest, &gpu);
        assert_eq!(manifest["metadata"]["annotations"]["mps.nvidia.com/threads"], "50");
        assert_eq!(manifest["metadata"]["annotations"]["mps.nvidia.com/vram"], "2048M");

        let mut bare = json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "p"}});
        inject_mps(&mut bare, &ProjectGpuSettings::default());
        assert_eq!(bare["metadata"]["annotations"], json!({}));
    }

    #[test]
    fn apply_skips_read_only_for_privileged_callers() {
        let mut manifest = deployment();
        apply(&mut manifest, &PolicyInput::default());
        assert!(
            manifest
                .pointer("/spec/template/spec/containers/0/volumeMounts/0/readOnly")
                .is_none()
        );
        assert!(manifest.pointer("/metadata/annotations").is_some());
    }

    #[test]
    fn dedicated_is_emulated_as_shared() {
        let plan = translate_gpu(2, "dedicated", &ProjectGpuSettings::default()).unwrap();
        assert_eq!(plan.resource_name, "nvidia.com/gpu.shared");
        assert_eq!(plan.quantity, 20);
        assert_eq!(plan.annotations["mps.nvidia.com/threads"], "100");
        assert_eq!(plan.annotations["mps.nvidia.com/vram"], "48000M");

        let project = ProjectGpuSettings {
            mps_memory_mib: 1024,
            ..Default::default()
        };
        let shared = translate_gpu(3, "shared", &project).unwrap();
        assert_eq!(shared.quantity, 3);
        assert_eq!(
            shared.annotations,
            BTreeMap::from([("mps.nvidia.com/vram".to_string(), "1024M".to_string())])
        );

        assert!(matches!(
            translate_gpu(1, "tpu", &project),
            Err(CoreError::InvalidInput(_))
        ));
        assert_eq!(requested_units(1, "dedicated"), 10);
        assert_eq!(requested_units(4, "shared"), 4);
    }
}
