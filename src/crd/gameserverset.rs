//! GameServerSet Custom Resource Definition
//!
//! A GameServerSet keeps a fixed number of identical GameServers running.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::types::{GameServerTemplateSpec, SchedulingStrategy};

/// Specification for a GameServerSet
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "carrier.ocgi.dev",
    version = "v1alpha1",
    kind = "GameServerSet",
    plural = "gameserversets",
    shortname = "gss",
    namespaced,
    schema = "disabled",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct GameServerSetSpec {
    /// Desired number of game servers
    #[serde(default)]
    pub replicas: i32,

    /// Selector over owned game servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Scheduling preference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<SchedulingStrategy>,

    /// Template for the generated game servers
    #[serde(default)]
    pub template: GameServerTemplateSpec,
}
