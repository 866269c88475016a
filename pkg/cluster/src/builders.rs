//! Typed object builders for everything the platform creates itself.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::batch::v1::{Job, JobSpec as BatchJobSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HostPathVolumeSource, Namespace, PersistentVolume,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource,
    PersistentVolumeSpec, PodSpec, PodTemplateSpec, ResourceRequirements, SecurityContext, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use pkg_constants::labels::*;
use pkg_constants::naming::{HUB_DEPLOYMENT_NAME, HUB_SERVICE_NAME};
use pkg_constants::storage::*;
use pkg_manifest::naming::{browser_name, browser_service_name};
use std::collections::BTreeMap;

use crate::types::{ClaimSpec, JobSpec, VolumeSpec};

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn non_empty(map: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if map.is_empty() { None } else { Some(map) }
}

fn storage_request(size: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([("storage".to_string(), Quantity(size.to_string()))])
}

pub fn namespace(name: &str, labels: &BTreeMap<String, String>) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: non_empty(labels.clone()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn claim(ns: &str, spec: &ClaimSpec) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(ns.to_string()),
            labels: non_empty(spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![spec.access_mode.clone()]),
            storage_class_name: Some(spec.class.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(storage_request(&spec.size)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Host-path volume with a retain reclaim policy.
pub fn volume(spec: &VolumeSpec) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            labels: non_empty(spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            capacity: Some(storage_request(&spec.size)),
            access_modes: Some(vec![spec.access_mode.clone()]),
            storage_class_name: Some(spec.class.clone()),
            persistent_volume_reclaim_policy: Some("Retain".to_string()),
            host_path: Some(HostPathVolumeSource {
                path: spec.host_path.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn nfs_ports() -> Vec<(&'static str, i32, &'static str)> {
    vec![
        ("nfs", NFS_PORT, "TCP"),
        ("nfs-udp", NFS_PORT, "UDP"),
        ("mountd", MOUNTD_PORT, "TCP"),
        ("mountd-udp", MOUNTD_PORT, "UDP"),
        ("rpcbind", RPCBIND_PORT, "TCP"),
        ("rpcbind-udp", RPCBIND_PORT, "UDP"),
    ]
}

/// The hub file server: one replica, recreate strategy, privileged NFS
/// container exporting the hub claim.
pub fn hub_deployment(ns: &str, claim_name: &str) -> Deployment {
    let app = labels(&[(APP_LABEL, NFS_GATEWAY_APP)]);
    let container = Container {
        name: NFS_CONTAINER_NAME.to_string(),
        image: Some(NFS_SERVER_IMAGE.to_string()),
        env: Some(vec![EnvVar {
            name: NFS_EXPORT_ENV.to_string(),
            value: Some(NFS_EXPORT_OPTIONS.to_string()),
            ..Default::default()
        }]),
        ports: Some(
            nfs_ports()
                .into_iter()
                .map(|(name, port, protocol)| ContainerPort {
                    name: Some(name.to_string()),
                    container_port: port,
                    protocol: Some(protocol.to_string()),
                    ..Default::default()
                })
                .collect(),
        ),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: HUB_VOLUME_NAME.to_string(),
            mount_path: NFS_EXPORT_ROOT.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(HUB_DEPLOYMENT_NAME.to_string()),
            namespace: Some(ns.to_string()),
            labels: Some(app.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            selector: LabelSelector {
                match_labels: Some(app.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![claim_volume(HUB_VOLUME_NAME, claim_name, false)]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Cluster-IP service in front of the hub file server.
pub fn hub_service(ns: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(HUB_SERVICE_NAME.to_string()),
            namespace: Some(ns.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels(&[(APP_LABEL, NFS_GATEWAY_APP)])),
            ports: Some(
                nfs_ports()
                    .into_iter()
                    .map(|(name, port, protocol)| ServicePort {
                        name: Some(name.to_string()),
                        port,
                        target_port: Some(IntOrString::Int(port)),
                        protocol: Some(protocol.to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn claim_volume(name: &str, claim_name: &str, read_only: bool) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            read_only: if read_only { Some(true) } else { None },
        }),
        ..Default::default()
    }
}

/// File browser serving `claim_name` under `base_url`.
pub fn browser_deployment(ns: &str, claim_name: &str, read_only: bool, base_url: &str) -> Deployment {
    let selector = labels(&[(APP_LABEL, FILEBROWSER_APP), (PVC_LABEL, claim_name)]);
    let port = FILEBROWSER_PORT.to_string();
    let args: Vec<String> = [
        "--noauth",
        "--database",
        "/tmp/filebrowser.db",
        "--root",
        FILEBROWSER_ROOT,
        "--port",
        port.as_str(),
        "--address",
        "0.0.0.0",
        "--baseURL",
        base_url,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(browser_name(claim_name)),
            namespace: Some(ns.to_string()),
            labels: Some(selector.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: FILEBROWSER_CONTAINER_NAME.to_string(),
                        image: Some(FILEBROWSER_IMAGE.to_string()),
                        args: Some(args),
                        ports: Some(vec![ContainerPort {
                            container_port: FILEBROWSER_PORT,
                            ..Default::default()
                        }]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: FILEBROWSER_VOLUME_NAME.to_string(),
                            mount_path: FILEBROWSER_ROOT.to_string(),
                            read_only: Some(read_only),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![claim_volume(FILEBROWSER_VOLUME_NAME, claim_name, read_only)]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Node-port service for a file browser.
pub fn browser_service(ns: &str, claim_name: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(browser_service_name(claim_name)),
            namespace: Some(ns.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(labels(&[(APP_LABEL, FILEBROWSER_APP), (PVC_LABEL, claim_name)])),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: FILEBROWSER_PORT,
                target_port: Some(IntOrString::Int(FILEBROWSER_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Batch job with restart-on-failure and one container.
pub fn job(spec: &JobSpec) -> Job {
    let mut volumes = Vec::with_capacity(spec.volumes.len());
    let mut mounts = Vec::with_capacity(spec.volumes.len());
    for v in &spec.volumes {
        let mut volume = Volume {
            name: v.name.clone(),
            ..Default::default()
        };
        if let Some(claim_name) = &v.claim_name {
            volume.persistent_volume_claim = Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim_name.clone(),
                read_only: None,
            });
        } else if let Some(path) = &v.host_path {
            volume.host_path = Some(HostPathVolumeSource {
                path: path.clone(),
                ..Default::default()
            });
        }
        volumes.push(volume);
        mounts.push(VolumeMount {
            name: v.name.clone(),
            mount_path: v.mount_path.clone(),
            ..Default::default()
        });
    }

    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();
    if let Some((resource, count)) = &spec.gpu {
        requests.insert(resource.clone(), Quantity(count.to_string()));
        limits.insert(resource.clone(), Quantity(count.to_string()));
    }
    if let Some(cpu) = &spec.cpu_request {
        requests.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &spec.memory_request {
        requests.insert("memory".to_string(), Quantity(memory.clone()));
    }

    let env: Vec<EnvVar> = spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let container = Container {
        name: spec.name.clone(),
        image: Some(spec.image.clone()),
        command: if spec.command.is_empty() { None } else { Some(spec.command.clone()) },
        env: if env.is_empty() { None } else { Some(env) },
        volume_mounts: if mounts.is_empty() { None } else { Some(mounts) },
        resources: Some(ResourceRequirements {
            requests: non_empty_quantities(requests),
            limits: non_empty_quantities(limits),
            ..Default::default()
        }),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: non_empty(spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(BatchJobSpec {
            parallelism: Some(spec.parallelism),
            completions: Some(spec.completions),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    annotations: non_empty(spec.annotations.clone()),
                    labels: non_empty(spec.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".to_string()),
                    priority_class_name: spec.priority_class.clone(),
                    containers: vec![container],
                    volumes: if volumes.is_empty() { None } else { Some(volumes) },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn non_empty_quantities(map: BTreeMap<String, Quantity>) -> Option<BTreeMap<String, Quantity>> {
    if map.is_empty() { None } else { Some(map) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobVolumeSpec;

    #[test]
    fn hub_deployment_shape() {
        let d = hub_deployment("user-alice-storage", "user-alice-disk");
        let spec = d.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.strategy.unwrap().type_.as_deref(), Some("Recreate"));
        let pod = spec.template.spec.unwrap();
        let c = &pod.containers[0];
        assert_eq!(c.image.as_deref(), Some(NFS_SERVER_IMAGE));
        assert_eq!(c.ports.as_ref().unwrap().len(), 6);
        assert_eq!(c.security_context.as_ref().unwrap().privileged, Some(true));
        assert_eq!(c.volume_mounts.as_ref().unwrap()[0].mount_path, "/exports");
        let vol = &pod.volumes.unwrap()[0];
        assert_eq!(vol.persistent_volume_claim.as_ref().unwrap().claim_name, "user-alice-disk");
    }

    #[test]
    fn hub_service_selects_file_server() {
        let s = hub_service("user-alice-storage");
        assert_eq!(s.metadata.name.as_deref(), Some("storage-svc"));
        let spec = s.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(spec.selector.unwrap().get("app").map(String::as_str), Some("nfs-gateway"));
        assert_eq!(spec.ports.unwrap().len(), 6);
    }

    #[test]
    fn browser_objects() {
        let d = browser_deployment("proj-1-alice", "pvc-x", true, "/files/x");
        assert_eq!(d.metadata.name.as_deref(), Some("filebrowser-pvc-x"));
        let pod = d.spec.unwrap().template.spec.unwrap();
        let args = pod.containers[0].args.clone().unwrap();
        assert_eq!(args.last().map(String::as_str), Some("/files/x"));
        assert!(args.contains(&"--noauth".to_string()));
        assert_eq!(pod.containers[0].volume_mounts.as_ref().unwrap()[0].read_only, Some(true));

        let s = browser_service("proj-1-alice", "pvc-x");
        assert_eq!(s.metadata.name.as_deref(), Some("filebrowser-pvc-x-svc"));
        assert_eq!(s.spec.unwrap().type_.as_deref(), Some("NodePort"));
    }

    #[test]
    fn job_carries_gpu_and_volumes() {
        let spec = JobSpec {
            name: "train".into(),
            namespace: "proj-1-alice".into(),
            image: "pytorch".into(),
            command: vec!["python".into(), "train.py".into()],
            env: BTreeMap::from([("EPOCHS".into(), "3".into())]),
            parallelism: 1,
            completions: 1,
            priority_class: Some("low-priority".into()),
            annotations: BTreeMap::from([("mps.nvidia.com/threads".into(), "100".into())]),
            labels: BTreeMap::new(),
            gpu: Some(("nvidia.com/gpu.shared".into(), 10)),
            cpu_request: Some("500m".into()),
            memory_request: None,
            volumes: vec![
                JobVolumeSpec {
                    name: "data".into(),
                    claim_name: Some("project".into()),
                    host_path: None,
                    mount_path: "/data".into(),
                },
                JobVolumeSpec {
                    name: "scratch".into(),
                    claim_name: None,
                    host_path: Some("/mnt/scratch".into()),
                    mount_path: "/scratch".into(),
                },
            ],
        };
        let job = job(&spec);
        let js = job.spec.unwrap();
        assert_eq!(js.parallelism, Some(1));
        let tpl = js.template;
        assert_eq!(
            tpl.metadata.unwrap().annotations.unwrap()["mps.nvidia.com/threads"],
            "100"
        );
        let pod = tpl.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));
        assert_eq!(pod.priority_class_name.as_deref(), Some("low-priority"));
        let res = pod.containers[0].resources.clone().unwrap();
        assert_eq!(res.requests.unwrap()["nvidia.com/gpu.shared"].0, "10");
        assert_eq!(res.limits.unwrap()["nvidia.com/gpu.shared"].0, "10");
        let vols = pod.volumes.unwrap();
        assert!(vols[0].persistent_volume_claim.is_some());
        assert!(vols[1].host_path.is_some());
    }
}
