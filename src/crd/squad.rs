//! Squad Custom Resource Definition
//!
//! A Squad manages GameServerSets the way a Deployment manages ReplicaSets:
//! it owns the rollout strategy and the revision history.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::types::{GameServerTemplateSpec, SchedulingStrategy};

/// Rollout strategy kind for a Squad
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum SquadStrategyType {
    /// Replace game servers gradually within surge/unavailable bounds
    RollingUpdate,
    /// Delete all game servers before creating new ones
    Recreate,
    /// Roll out to a subset first
    CanaryUpdate,
    /// Update game servers without recreating their pods
    InplaceUpdate,
}

/// Bounds for a rolling update
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdateSquad {
    /// Maximum number or percentage of unavailable game servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,

    /// Maximum number or percentage of game servers above the desired count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_surge: Option<IntOrString>,
}

/// Update strategy of a Squad
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SquadStrategy {
    /// Strategy kind
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<SquadStrategyType>,

    /// Rolling update bounds, used when `type_` is RollingUpdate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdateSquad>,
}

/// Specification for a Squad
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "carrier.ocgi.dev",
    version = "v1alpha1",
    kind = "Squad",
    plural = "squads",
    shortname = "sq",
    namespaced,
    schema = "disabled",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct SquadSpec {
    /// Desired number of game servers
    #[serde(default)]
    pub replicas: i32,

    /// Selector over owned game servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Template for the generated game servers
    #[serde(default)]
    pub template: GameServerTemplateSpec,

    /// Rollout strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<SquadStrategy>,

    /// Number of old GameServerSets retained for rollback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,

    /// Scheduling preference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<SchedulingStrategy>,
}
