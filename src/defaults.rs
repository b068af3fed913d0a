//! Defaulting for carrier resources
//!
//! Every rule fills a field only when it is unset, so applying the defaults
//! twice yields the same object. The inputs are never modified; each call
//! returns a defaulted copy.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::{
    GameServer, GameServerSet, GameServerSpec, GameServerTemplateSpec, PortPolicy,
    RollingUpdateSquad, SchedulingStrategy, Squad, SquadStrategy, SquadStrategyType,
};
use crate::{
    DEFAULT_ROLLING_UPDATE_BOUND, DEFAULT_SERVICE_ACCOUNT, EXTERNAL_NETWORK_ANNOTATION,
    GAMESERVERSET_LABEL, LB_READY_GATE, SQUAD_LABEL, SQUAD_REVISION_HISTORY_LIMIT,
};

/// Resources that carry creation-time defaults
pub trait EnsureDefaults: Sized {
    /// Return a copy of `self` with every unset defaultable field filled in
    fn with_defaults(&self) -> Self;
}

impl EnsureDefaults for GameServer {
    fn with_defaults(&self) -> Self {
        let mut gs = self.clone();
        ensure_lb_readiness_gate(&gs.metadata, &mut gs.spec);
        ensure_scheduling(&mut gs.spec.scheduling);
        ensure_service_account(&mut gs.spec);
        ensure_port_policy(&mut gs.spec);
        gs
    }
}

impl EnsureDefaults for GameServerSet {
    fn with_defaults(&self) -> Self {
        let mut gss = self.clone();
        let name = gss.metadata.name.clone().unwrap_or_default();
        ensure_template_label(&mut gss.spec.template, GAMESERVERSET_LABEL, &name);
        ensure_selector(&mut gss.spec.selector, GAMESERVERSET_LABEL, &name);
        ensure_scheduling(&mut gss.spec.scheduling);
        ensure_service_account(&mut gss.spec.template.spec);
        ensure_port_policy(&mut gss.spec.template.spec);
        gss
    }
}

impl EnsureDefaults for Squad {
    fn with_defaults(&self) -> Self {
        let mut squad = self.clone();
        let name = squad.metadata.name.clone().unwrap_or_default();
        squad.spec.revision_history_limit = Some(SQUAD_REVISION_HISTORY_LIMIT);
        ensure_strategy(&mut squad.spec.strategy);
        ensure_selector(&mut squad.spec.selector, SQUAD_LABEL, &name);
        ensure_scheduling(&mut squad.spec.scheduling);
        ensure_service_account(&mut squad.spec.template.spec);
        ensure_port_policy(&mut squad.spec.template.spec);
        squad
    }
}

/// Re-apply the defaults an update must not lose
///
/// Copies the service account from `old` when `new` leaves it empty, then
/// fills the port policy on `new`. Used before comparing Squad updates.
pub fn carry_over_defaults(old: &Squad, new: &Squad) -> Squad {
    let mut squad = new.clone();
    if squad.spec.template.spec.service_account_name().is_empty() {
        let previous = old.spec.template.spec.service_account_name();
        if !previous.is_empty() {
            squad.spec.template.spec.pod_spec_mut().service_account_name =
                Some(previous.to_string());
        }
    }
    ensure_port_policy(&mut squad.spec.template.spec);
    squad
}

// =============================================================================
// Rules
// =============================================================================

fn ensure_lb_readiness_gate(meta: &ObjectMeta, spec: &mut GameServerSpec) {
    let wants_lb = meta
        .annotations
        .as_ref()
        .and_then(|a| a.get(EXTERNAL_NETWORK_ANNOTATION))
        .is_some_and(|v| !v.is_empty());
    if wants_lb && !spec.readiness_gates.iter().any(|g| g == LB_READY_GATE) {
        spec.readiness_gates.push(LB_READY_GATE.to_string());
    }
}

fn ensure_scheduling(scheduling: &mut Option<SchedulingStrategy>) {
    scheduling.get_or_insert(SchedulingStrategy::MostAllocated);
}

fn ensure_service_account(spec: &mut GameServerSpec) {
    if spec.service_account_name().is_empty() {
        spec.pod_spec_mut().service_account_name = Some(DEFAULT_SERVICE_ACCOUNT.to_string());
    }
}

fn ensure_port_policy(spec: &mut GameServerSpec) {
    for port in &mut spec.ports {
        if port.port_policy.is_none() && port.host_port.is_none() && port.host_port_range.is_none()
        {
            port.port_policy = Some(PortPolicy::LoadBalancer);
        }
    }
}

fn ensure_selector(selector: &mut Option<LabelSelector>, key: &str, name: &str) {
    let selector = selector.get_or_insert_with(LabelSelector::default);
    if selector.match_labels.is_none() {
        selector.match_labels = Some(BTreeMap::from([(key.to_string(), name.to_string())]));
    }
}

fn ensure_template_label(template: &mut GameServerTemplateSpec, key: &str, name: &str) {
    let meta = template.metadata.get_or_insert_with(ObjectMeta::default);
    if meta.labels.as_ref().is_none_or(BTreeMap::is_empty) {
        meta.labels = Some(BTreeMap::from([(key.to_string(), name.to_string())]));
    }
}

fn ensure_strategy(strategy: &mut Option<SquadStrategy>) {
    let strategy = strategy.get_or_insert_with(SquadStrategy::default);
    let kind = *strategy.type_.get_or_insert(SquadStrategyType::RollingUpdate);
    if kind == SquadStrategyType::RollingUpdate {
        let rolling = strategy
            .rolling_update
            .get_or_insert_with(RollingUpdateSquad::default);
        rolling
            .max_unavailable
            .get_or_insert_with(|| IntOrString::String(DEFAULT_ROLLING_UPDATE_BOUND.to_string()));
        rolling
            .max_surge
            .get_or_insert_with(|| IntOrString::String(DEFAULT_ROLLING_UPDATE_BOUND.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{GameServerPort, GameServerSetSpec, PortRange, SquadSpec};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};

    fn pod_template(sa: Option<&str>) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "server".to_string(),
                    image: Some("arena:1.0".to_string()),
                    ..Default::default()
                }],
                service_account_name: sa.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    fn gs_spec(ports: Vec<GameServerPort>) -> GameServerSpec {
        GameServerSpec {
            ports,
            template: pod_template(None),
            ..Default::default()
        }
    }

    fn lb_annotated_gameserver() -> GameServer {
        let mut gs = GameServer::new(
            "arena-0",
            gs_spec(vec![GameServerPort {
                container_port: Some(7777),
                ..Default::default()
            }]),
        );
        gs.metadata.annotations = Some(BTreeMap::from([(
            EXTERNAL_NETWORK_ANNOTATION.to_string(),
            "lb".to_string(),
        )]));
        gs
    }

    // =========================================================================
    // Unit Tests
    // =========================================================================

    #[test]
    fn lb_gate_added_only_once() {
        let gs = lb_annotated_gameserver().with_defaults();
        assert_eq!(gs.spec.readiness_gates, vec![LB_READY_GATE.to_string()]);
        let again = gs.with_defaults();
        assert_eq!(again.spec.readiness_gates.len(), 1);
    }

    #[test]
    fn empty_external_network_annotation_adds_no_gate() {
        let mut gs = lb_annotated_gameserver();
        gs.metadata.annotations = Some(BTreeMap::from([(
            EXTERNAL_NETWORK_ANNOTATION.to_string(),
            String::new(),
        )]));
        assert!(gs.with_defaults().spec.readiness_gates.is_empty());
    }

    #[test]
    fn port_policy_left_unset_when_host_assignment_present() {
        let gs = GameServer::new(
            "arena-0",
            gs_spec(vec![
                GameServerPort {
                    container_port: Some(7777),
                    host_port: Some(30000),
                    ..Default::default()
                },
                GameServerPort {
                    container_port_range: Some(PortRange::new(7000, 7010)),
                    host_port_range: Some(PortRange::new(31000, 31010)),
                    ..Default::default()
                },
                GameServerPort {
                    container_port: Some(7778),
                    port_policy: Some(PortPolicy::Dynamic),
                    ..Default::default()
                },
            ]),
        )
        .with_defaults();

        assert_eq!(gs.spec.ports[0].port_policy, None);
        assert_eq!(gs.spec.ports[1].port_policy, None);
        assert_eq!(gs.spec.ports[2].port_policy, Some(PortPolicy::Dynamic));
    }

    #[test]
    fn explicit_service_account_and_scheduling_are_kept() {
        let mut gs = GameServer::new("arena-0", gs_spec(vec![]));
        gs.spec.template = pod_template(Some("runner"));
        gs.spec.scheduling = Some(SchedulingStrategy::LeastAllocated);

        let gs = gs.with_defaults();
        assert_eq!(gs.spec.service_account_name(), "runner");
        assert_eq!(gs.spec.scheduling, Some(SchedulingStrategy::LeastAllocated));
    }

    #[test]
    fn existing_selector_labels_are_kept() {
        let mut gss = GameServerSet::new("arena", GameServerSetSpec::default());
        gss.spec.selector = Some(LabelSelector {
            match_labels: Some(BTreeMap::from([("app".to_string(), "arena".to_string())])),
            ..Default::default()
        });

        let gss = gss.with_defaults();
        let labels = gss.spec.selector.unwrap().match_labels.unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get("app").map(String::as_str), Some("arena"));
    }

    #[test]
    fn non_rolling_strategy_gets_no_rolling_bounds() {
        let mut squad = Squad::new("arena", SquadSpec::default());
        squad.spec.strategy = Some(SquadStrategy {
            type_: Some(SquadStrategyType::Recreate),
            rolling_update: None,
        });
        let squad = squad.with_defaults();
        assert!(squad.spec.strategy.unwrap().rolling_update.is_none());
    }

    #[test]
    fn revision_history_is_always_forced() {
        let mut squad = Squad::new("arena", SquadSpec::default());
        squad.spec.revision_history_limit = Some(3);
        assert_eq!(
            squad.with_defaults().spec.revision_history_limit,
            Some(SQUAD_REVISION_HISTORY_LIMIT)
        );
    }

    #[test]
    fn defaults_leave_the_input_untouched() {
        let gs = lb_annotated_gameserver();
        let before = gs.clone();
        let _ = gs.with_defaults();
        assert_eq!(gs, before);
    }

    #[test]
    fn carry_over_restores_service_account_and_port_policy() {
        let mut old = Squad::new("arena", SquadSpec::default());
        old.spec.template.spec = gs_spec(vec![]);
        old.spec.template.spec.template = pod_template(Some("carrier-sdk"));

        let mut new = old.clone();
        new.spec.template.spec.template = pod_template(None);
        new.spec.template.spec.ports = vec![GameServerPort {
            container_port: Some(7777),
            ..Default::default()
        }];

        let carried = carry_over_defaults(&old, &new);
        assert_eq!(carried.spec.template.spec.service_account_name(), "carrier-sdk");
        assert_eq!(
            carried.spec.template.spec.ports[0].port_policy,
            Some(PortPolicy::LoadBalancer)
        );
        assert_eq!(new.spec.template.spec.service_account_name(), "");
    }

    // =========================================================================
    // Story Tests
    // =========================================================================

    /// Story: applying defaults a second time never changes a defaulted object
    #[test]
    fn story_defaults_are_idempotent_for_every_kind() {
        let gs = lb_annotated_gameserver().with_defaults();
        assert_eq!(gs.with_defaults(), gs);

        let mut gss = GameServerSet::new("arena", GameServerSetSpec::default());
        gss.spec.template.spec = gs_spec(vec![GameServerPort {
            container_port: Some(7777),
            ..Default::default()
        }]);
        let gss = gss.with_defaults();
        assert_eq!(gss.with_defaults(), gss);

        let mut squad = Squad::new("arena", SquadSpec::default());
        squad.spec.template.spec = gs_spec(vec![]);
        let squad = squad.with_defaults();
        assert_eq!(squad.with_defaults(), squad);
    }

    /// Story: a fresh GameServerSet is tied to its own game servers by label
    #[test]
    fn story_gameserverset_selector_matches_its_template_label() {
        let gss = GameServerSet::new("arena", GameServerSetSpec::default()).with_defaults();

        let expected = BTreeMap::from([(GAMESERVERSET_LABEL.to_string(), "arena".to_string())]);
        let template_labels = gss
            .spec
            .template
            .metadata
            .as_ref()
            .and_then(|m| m.labels.clone());
        assert_eq!(template_labels, Some(expected.clone()));
        assert_eq!(gss.spec.selector.unwrap().match_labels, Some(expected));
        assert_eq!(gss.spec.scheduling, Some(SchedulingStrategy::MostAllocated));
        assert_eq!(gss.spec.template.spec.service_account_name(), DEFAULT_SERVICE_ACCOUNT);
    }

    /// Story: a bare Squad named "s" receives every documented default
    #[test]
    fn story_squad_defaulting_scenario() {
        let squad = Squad {
            metadata: ObjectMeta {
                name: Some("s".to_string()),
                ..Default::default()
            },
            spec: SquadSpec {
                template: GameServerTemplateSpec {
                    metadata: None,
                    spec: gs_spec(vec![GameServerPort {
                        container_port: Some(7777),
                        ..Default::default()
                    }]),
                },
                ..Default::default()
            },
        }
        .with_defaults();

        assert_eq!(squad.spec.revision_history_limit, Some(10));
        let strategy = squad.spec.strategy.unwrap();
        assert_eq!(strategy.type_, Some(SquadStrategyType::RollingUpdate));
        let rolling = strategy.rolling_update.unwrap();
        assert_eq!(rolling.max_unavailable, Some(IntOrString::String("25%".to_string())));
        assert_eq!(rolling.max_surge, Some(IntOrString::String("25%".to_string())));
        assert_eq!(
            squad.spec.selector.unwrap().match_labels,
            Some(BTreeMap::from([(SQUAD_LABEL.to_string(), "s".to_string())]))
        );
        assert_eq!(squad.spec.scheduling, Some(SchedulingStrategy::MostAllocated));
        assert_eq!(squad.spec.template.spec.service_account_name(), "carrier-sdk");
        assert_eq!(
            squad.spec.template.spec.ports[0].port_policy,
            Some(PortPolicy::LoadBalancer)
        );
    }
}
