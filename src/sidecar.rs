//! SDK sidecar injection for game-server pods
//!
//! Pods labelled with [`GAMESERVER_LABEL`] get the carrier SDK sidecar
//! appended to their containers. The sidecar is described by a list of
//! data-only [`SidecarOption`]s that [`inject_sidecar`] interprets in a fixed
//! order, plus an optional [`PodHook`] that adjusts the pod before the
//! sidecar is built.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, HTTPGetAction, ObjectFieldSelector, Pod, Probe,
    ResourceRequirements, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::config::SidecarConfig;
use crate::{GAMESERVER_LABEL, GRPC_PORT_ANNOTATION, HTTP_PORT_ANNOTATION, SIDECAR_NAME};

/// Mount path of the projected service account token
pub const TOKEN_MOUNT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Env var carrying the game server name into the sidecar
pub const GAMESERVER_NAME_ENV: &str = "GAMESERVER_NAME";

/// Env var carrying the pod namespace into the sidecar
pub const POD_NAMESPACE_ENV: &str = "POD_NAMESPACE";

/// Env var exposing the SDK gRPC port to game containers
pub const GRPC_PORT_ENV: &str = "CARRIER_SDK_GRPC_PORT";

/// Env var exposing the SDK HTTP port to game containers
pub const HTTP_PORT_ENV: &str = "CARRIER_SDK_HTTP_PORT";

/// Port of the sidecar's own health endpoint
const HEALTH_PORT: i32 = 8080;

// =============================================================================
// Options
// =============================================================================

/// A single piece of sidecar configuration
#[derive(Debug, Clone, PartialEq)]
pub enum SidecarOption {
    /// Container image
    Image(String),
    /// Requests and limits, set to the same values
    Resources {
        /// CPU quantity
        cpu: Quantity,
        /// Memory quantity
        memory: Quantity,
    },
    /// Identity env vars for the SDK server
    Env {
        /// Name of the game server the pod belongs to
        workload_name: String,
    },
    /// Liveness probe against the sidecar health endpoint
    HealthCheck,
    /// SDK server command-line arguments
    Args {
        /// SDK HTTP port
        http_port: i32,
        /// SDK gRPC port
        grpc_port: i32,
    },
}

impl SidecarOption {
    /// Position of the option in the interpretation order
    fn rank(&self) -> u8 {
        match self {
            Self::Image(_) => 0,
            Self::Resources { .. } => 1,
            Self::Env { .. } => 2,
            Self::HealthCheck => 3,
            Self::Args { .. } => 4,
        }
    }

    fn apply(&self, container: &mut Container) {
        match self {
            Self::Image(image) => container.image = Some(image.clone()),
            Self::Resources { cpu, memory } => {
                let quantities = BTreeMap::from([
                    ("cpu".to_string(), cpu.clone()),
                    ("memory".to_string(), memory.clone()),
                ]);
                container.resources = Some(ResourceRequirements {
                    limits: Some(quantities.clone()),
                    requests: Some(quantities),
                    ..Default::default()
                });
            }
            Self::Env { workload_name } => {
                container.env = Some(vec![
                    EnvVar {
                        name: GAMESERVER_NAME_ENV.to_string(),
                        value: Some(workload_name.clone()),
                        value_from: None,
                    },
                    EnvVar {
                        name: POD_NAMESPACE_ENV.to_string(),
                        value: None,
                        value_from: Some(EnvVarSource {
                            field_ref: Some(ObjectFieldSelector {
                                api_version: None,
                                field_path: "metadata.namespace".to_string(),
                            }),
                            ..Default::default()
                        }),
                    },
                ]);
            }
            Self::HealthCheck => {
                container.liveness_probe = Some(Probe {
                    http_get: Some(HTTPGetAction {
                        path: Some("/healthz".to_string()),
                        port: IntOrString::Int(HEALTH_PORT),
                        ..Default::default()
                    }),
                    initial_delay_seconds: Some(3),
                    timeout_seconds: Some(1),
                    period_seconds: Some(10),
                    success_threshold: Some(1),
                    failure_threshold: Some(3),
                    ..Default::default()
                });
            }
            Self::Args {
                http_port,
                grpc_port,
            } => {
                container.args = Some(vec![
                    format!("--grpc-port={grpc_port}"),
                    format!("--http-port={http_port}"),
                    "--v=5".to_string(),
                ]);
            }
        }
    }
}

/// Pod adjustment applied before the sidecar is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodHook {
    /// Tell every game container where the SDK listens
    PortEnv {
        /// SDK gRPC port
        grpc_port: i32,
        /// SDK HTTP port
        http_port: i32,
    },
}

impl PodHook {
    fn apply(&self, pod: &mut Pod) {
        match self {
            Self::PortEnv {
                grpc_port,
                http_port,
            } => {
                let Some(spec) = pod.spec.as_mut() else {
                    return;
                };
                for container in spec.containers.iter_mut().filter(|c| c.name != SIDECAR_NAME) {
                    container.env.get_or_insert_with(Vec::new).extend([
                        EnvVar {
                            name: GRPC_PORT_ENV.to_string(),
                            value: Some(grpc_port.to_string()),
                            value_from: None,
                        },
                        EnvVar {
                            name: HTTP_PORT_ENV.to_string(),
                            value: Some(http_port.to_string()),
                            value_from: None,
                        },
                    ]);
                }
            }
        }
    }
}

// =============================================================================
// Planning
// =============================================================================

/// SDK ports for one pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdkPorts {
    /// HTTP port
    pub http: i32,
    /// gRPC port
    pub grpc: i32,
}

/// Resolve SDK ports from configuration and pod annotations
///
/// An annotation overrides the configured default only when it parses as an
/// integer; anything else is ignored.
pub fn resolve_ports(config: &SidecarConfig, pod: &Pod) -> SdkPorts {
    let annotation = |key: &str| {
        pod.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .and_then(|v| v.parse::<i32>().ok())
    };
    SdkPorts {
        http: annotation(HTTP_PORT_ANNOTATION).unwrap_or(config.http_port),
        grpc: annotation(GRPC_PORT_ANNOTATION).unwrap_or(config.grpc_port),
    }
}

/// Everything needed to inject the sidecar into one pod
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarPlan {
    /// Hook applied to the pod before the sidecar is built
    pub hook: Option<PodHook>,
    /// Sidecar options in interpretation order
    pub options: Vec<SidecarOption>,
}

impl SidecarPlan {
    /// Build the standard plan for a pod
    pub fn for_pod(config: &SidecarConfig, pod: &Pod) -> Self {
        let ports = resolve_ports(config, pod);
        let mut options = vec![SidecarOption::Image(config.image.clone())];
        if config.has_resources() {
            options.push(SidecarOption::Resources {
                cpu: config.cpu.clone(),
                memory: config.memory.clone(),
            });
        }
        options.push(SidecarOption::Env {
            workload_name: pod.metadata.name.clone().unwrap_or_default(),
        });
        options.push(SidecarOption::HealthCheck);
        options.push(SidecarOption::Args {
            http_port: ports.http,
            grpc_port: ports.grpc,
        });

        Self {
            hook: Some(PodHook::PortEnv {
                grpc_port: ports.grpc,
                http_port: ports.http,
            }),
            options,
        }
    }

    /// Apply the plan to a pod
    pub fn apply(&self, pod: &Pod) -> Pod {
        inject_sidecar(pod, self.hook.as_ref(), &self.options)
    }
}

// =============================================================================
// Injection
// =============================================================================

/// Returns true when the pod already runs the SDK sidecar
pub fn has_sidecar(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .is_some_and(|s| s.containers.iter().any(|c| c.name == SIDECAR_NAME))
}

/// Returns true when the pod carries a non-empty game server label
pub fn is_gameserver_pod(pod: &Pod) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(GAMESERVER_LABEL))
        .is_some_and(|v| !v.is_empty())
}

/// Return a copy of `pod` with the SDK sidecar appended
///
/// Pods that already run the sidecar, or are not game-server pods, come back
/// unchanged.
pub fn inject_sidecar(pod: &Pod, hook: Option<&PodHook>, options: &[SidecarOption]) -> Pod {
    if has_sidecar(pod) || !is_gameserver_pod(pod) {
        return pod.clone();
    }

    let mut injected = pod.clone();
    if let Some(hook) = hook {
        hook.apply(&mut injected);
    }

    let mut sidecar = base_sidecar(&injected);
    let mut ordered: Vec<&SidecarOption> = options.iter().collect();
    ordered.sort_by_key(|o| o.rank());
    for option in ordered {
        option.apply(&mut sidecar);
    }

    injected
        .spec
        .get_or_insert_with(Default::default)
        .containers
        .push(sidecar);
    injected
}

fn base_sidecar(pod: &Pod) -> Container {
    Container {
        name: SIDECAR_NAME.to_string(),
        image_pull_policy: Some("IfNotPresent".to_string()),
        volume_mounts: token_volume_mount(pod).map(|m| vec![m]),
        ..Default::default()
    }
}

fn token_volume_mount(pod: &Pod) -> Option<VolumeMount> {
    let spec = pod.spec.as_ref()?;
    let needle = format!(
        "{}-token",
        spec.service_account_name.as_deref().unwrap_or_default()
    );
    let volume = spec.volumes.as_ref()?.iter().find(|v| v.name.contains(&needle))?;
    Some(VolumeMount {
        name: volume.name.clone(),
        mount_path: TOKEN_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    })
}
