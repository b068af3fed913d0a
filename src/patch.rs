//! JSON patch generation between two versions of an object

use json_patch::Patch;
use serde::Serialize;

use crate::{Error, Result};

/// Compute the RFC 6902 patch that turns `before` into `after`
///
/// Both sides go through the same serializer, so fields skipped when empty on
/// one side never produce operations against paths absent from the other.
/// Identical inputs produce an empty patch.
pub fn diff<T: Serialize>(before: &T, after: &T) -> Result<Patch> {
    let before = serde_json::to_value(before).map_err(|e| Error::serialization(e.to_string()))?;
    let after = serde_json::to_value(after).map_err(|e| Error::serialization(e.to_string()))?;
    Ok(json_patch::diff(&before, &after))
}

/// Returns true when the patch contains no operations
pub fn is_empty(patch: &Patch) -> bool {
    patch.0.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{GameServer, GameServerPort, GameServerSpec, SchedulingStrategy};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn gameserver() -> GameServer {
        let mut gs = GameServer::new(
            "arena-0",
            GameServerSpec {
                ports: vec![GameServerPort {
                    container_port: Some(7777),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        gs.metadata.namespace = Some("games".to_string());
        gs
    }

    #[test]
    fn identical_objects_produce_empty_patch() {
        let gs = gameserver();
        let patch = diff(&gs, &gs.clone()).unwrap();
        assert!(is_empty(&patch));
    }

    #[test]
    fn non_string_map_keys_are_a_serialization_error() {
        let bad: BTreeMap<(u8, u8), u8> = BTreeMap::from([((1, 2), 3)]);
        let err = diff(&bad, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    /// Story: applying the generated patch to the original yields the mutated object
    #[test]
    fn story_patch_applied_to_before_yields_after() {
        let before = gameserver();
        let mut after = before.clone();
        after.spec.scheduling = Some(SchedulingStrategy::MostAllocated);
        after.spec.readiness_gates.push("externalnetwork.ocgi.dev/lb-ready".to_string());
        after.spec.pod_spec_mut().service_account_name = Some("carrier-sdk".to_string());

        let patch = diff(&before, &after).unwrap();
        assert!(!is_empty(&patch));

        let mut doc = serde_json::to_value(&before).unwrap();
        json_patch::patch(&mut doc, &patch).unwrap();
        assert_eq!(doc, serde_json::to_value(&after).unwrap());
        assert_eq!(doc["spec"]["scheduling"], json!("MostAllocated"));
    }
}
