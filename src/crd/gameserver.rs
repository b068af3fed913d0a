//! GameServer Custom Resource Definition
//!
//! A GameServer is a single dedicated game-server pod plus the port and gate
//! metadata the carrier controller needs to expose and drain it.

use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::types::{GameServerPort, SchedulingStrategy};

/// Specification of a single game server
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "carrier.ocgi.dev",
    version = "v1alpha1",
    kind = "GameServer",
    plural = "gameservers",
    shortname = "gs",
    namespaced,
    schema = "disabled",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct GameServerSpec {
    /// Ports exposed by the game server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<GameServerPort>,

    /// Pod template the game server runs as
    #[serde(default)]
    pub template: PodTemplateSpec,

    /// Scheduling preference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<SchedulingStrategy>,

    /// Conditions that must hold before the game server is Ready
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness_gates: Vec<String>,

    /// Conditions that must hold before the game server may be deleted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deletable_gates: Vec<String>,
}

impl GameServerSpec {
    /// Service account name of the pod template, empty when unset
    pub fn service_account_name(&self) -> &str {
        self.template
            .spec
            .as_ref()
            .and_then(|s| s.service_account_name.as_deref())
            .unwrap_or_default()
    }

    /// Mutable pod spec of the template, created empty when absent
    pub fn pod_spec_mut(&mut self) -> &mut PodSpec {
        self.template.spec.get_or_insert_with(PodSpec::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;
    use serde_json::json;

    #[test]
    fn gameserver_has_carrier_api_identity() {
        assert_eq!(GameServer::group(&()), "carrier.ocgi.dev");
        assert_eq!(GameServer::version(&()), "v1alpha1");
        assert_eq!(GameServer::kind(&()), "GameServer");
        assert_eq!(GameServer::plural(&()), "gameservers");
    }

    #[test]
    fn pod_spec_mut_creates_missing_spec() {
        let mut spec = GameServerSpec::default();
        assert!(spec.template.spec.is_none());
        spec.pod_spec_mut().service_account_name = Some("runner".to_string());
        assert_eq!(spec.service_account_name(), "runner");
    }

    /// Story: a GameServer decoded from an admission payload exposes its spec fields
    #[test]
    fn story_decode_gameserver_from_admission_payload() {
        let gs: GameServer = serde_json::from_value(json!({
            "apiVersion": "carrier.ocgi.dev/v1alpha1",
            "kind": "GameServer",
            "metadata": {"name": "arena-0", "namespace": "games"},
            "spec": {
                "ports": [{"name": "udp", "containerPort": 7777}],
                "readinessGates": ["custom/ready"],
                "template": {"spec": {"containers": [{"name": "server", "image": "arena:1.0"}]}}
            }
        }))
        .unwrap();

        assert_eq!(gs.metadata.name.as_deref(), Some("arena-0"));
        assert_eq!(gs.spec.ports.len(), 1);
        assert_eq!(gs.spec.readiness_gates, vec!["custom/ready".to_string()]);
        assert_eq!(
            serde_json::to_value(&gs).unwrap()["spec"]["ports"][0]["containerPort"],
            7777
        );
    }
}
