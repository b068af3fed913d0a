//! Supporting types shared by the Carrier CRDs

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use super::gameserver::GameServerSpec;

/// How a game server port is exposed outside the pod
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum PortPolicy {
    /// Host port is chosen by the user
    Static,
    /// Host port is allocated by the carrier controller
    Dynamic,
    /// Traffic reaches the pod through an external load balancer
    LoadBalancer,
}

impl std::fmt::Display for PortPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static => write!(f, "Static"),
            Self::Dynamic => write!(f, "Dynamic"),
            Self::LoadBalancer => write!(f, "LoadBalancer"),
        }
    }
}

/// Bin-packing preference used when placing game servers on nodes
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// Pack game servers onto the fullest nodes first
    MostAllocated,
    /// Spread game servers across the emptiest nodes
    LeastAllocated,
}

/// Inclusive port range
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortRange {
    /// Lowest port of the range
    #[serde(default)]
    pub min_port: i32,
    /// Highest port of the range
    #[serde(default)]
    pub max_port: i32,
}

impl PortRange {
    /// Create a range from its bounds
    pub fn new(min_port: i32, max_port: i32) -> Self {
        Self { min_port, max_port }
    }
}

/// A port exposed by a game server
///
/// Exactly one of `container_port` and `container_port_range` is expected;
/// host assignments may be back-filled by the controller after creation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameServerPort {
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Single container port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<i32>,

    /// Range of container ports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port_range: Option<PortRange>,

    /// Assigned host port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,

    /// Assigned host port range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port_range: Option<PortRange>,

    /// Exposure policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_policy: Option<PortPolicy>,

    /// Transport protocol (TCP, UDP, TCPUDP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Template used by sets and squads to stamp out game servers
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct GameServerTemplateSpec {
    /// Metadata applied to every generated game server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,

    /// Spec of every generated game server
    #[serde(default)]
    pub spec: GameServerSpec,
}
