//! Admission dispatch
//!
//! Turns a raw mutation request into a typed object, routes it to the
//! defaulting, validation or sidecar-injection path for its kind and returns
//! a [`Decision`]. Nothing here touches HTTP; the router in the parent module
//! owns the wire format.

use std::sync::Arc;

use json_patch::Patch;
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::Operation;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::SidecarConfig;
use crate::crd::{GameServer, GameServerSet, Squad};
use crate::defaults::EnsureDefaults;
use crate::patch;
use crate::rbac::Provisioner;
use crate::sidecar::SidecarPlan;
use crate::validation::{FieldErrors, PodTemplateValidator, Validate};
use crate::{Error, CARRIER_GROUP};

/// Status code of a rejected request
pub const REJECTED_CODE: u16 = 400;

// =============================================================================
// Request
// =============================================================================

/// The parts of an admission request the dispatcher needs
#[derive(Debug, Clone)]
pub struct MutationRequest {
    /// API group of the object (empty for core)
    pub group: String,
    /// Kind of the object
    pub kind: String,
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object (may be empty when generated server-side)
    pub name: String,
    /// Requested operation
    pub operation: Operation,
    /// Object after the operation
    pub object: Option<Value>,
    /// Object before the operation (updates only)
    pub old_object: Option<Value>,
}

/// Kinds the webhook knows how to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// carrier.ocgi.dev GameServer
    GameServer,
    /// carrier.ocgi.dev GameServerSet
    GameServerSet,
    /// carrier.ocgi.dev Squad
    Squad,
    /// core Pod
    Pod,
}

impl ResourceKind {
    /// Every supported kind
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::GameServer,
        ResourceKind::GameServerSet,
        ResourceKind::Squad,
        ResourceKind::Pod,
    ];

    /// API group and kind name
    pub fn group_kind(&self) -> (&'static str, &'static str) {
        match self {
            Self::GameServer => (CARRIER_GROUP, "GameServer"),
            Self::GameServerSet => (CARRIER_GROUP, "GameServerSet"),
            Self::Squad => (CARRIER_GROUP, "Squad"),
            Self::Pod => ("", "Pod"),
        }
    }
}

/// Create or update of one object
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<T> {
    /// The object is being created
    Create(T),
    /// The object is being replaced
    Update {
        /// Stored object
        old: T,
        /// Incoming object
        new: T,
    },
}

/// A decoded admission object
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionObject {
    /// GameServer transition
    GameServer(Transition<GameServer>),
    /// GameServerSet transition
    GameServerSet(Transition<GameServerSet>),
    /// Squad transition
    Squad(Transition<Squad>),
    /// Pod transition
    Pod(Transition<Pod>),
    /// Any other kind; admitted untouched
    Unsupported(String),
}

/// Decodes request payloads for a fixed set of kinds
#[derive(Debug, Clone)]
pub struct ObjectDecoder {
    kinds: Vec<ResourceKind>,
}

impl Default for ObjectDecoder {
    fn default() -> Self {
        Self::new(ResourceKind::ALL)
    }
}

impl ObjectDecoder {
    /// Decoder for the given kinds
    pub fn new(kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Resolve the kind of a request, if it is one this decoder handles
    pub fn resolve(&self, group: &str, kind: &str) -> Option<ResourceKind> {
        self.kinds
            .iter()
            .copied()
            .find(|k| k.group_kind() == (group, kind))
    }

    /// Decode a create or update request into a typed object
    pub fn decode(&self, req: &MutationRequest) -> Result<AdmissionObject, Error> {
        let Some(kind) = self.resolve(&req.group, &req.kind) else {
            return Ok(AdmissionObject::Unsupported(req.kind.clone()));
        };
        Ok(match kind {
            ResourceKind::GameServer => AdmissionObject::GameServer(transition(req)?),
            ResourceKind::GameServerSet => AdmissionObject::GameServerSet(transition(req)?),
            ResourceKind::Squad => AdmissionObject::Squad(transition(req)?),
            ResourceKind::Pod => AdmissionObject::Pod(transition(req)?),
        })
    }
}

fn transition<T: DeserializeOwned>(req: &MutationRequest) -> Result<Transition<T>, Error> {
    let new = decode_object(req.object.as_ref(), "object")?;
    match req.operation {
        Operation::Update => Ok(Transition::Update {
            old: decode_object(req.old_object.as_ref(), "oldObject")?,
            new,
        }),
        _ => Ok(Transition::Create(new)),
    }
}

fn decode_object<T: DeserializeOwned>(value: Option<&Value>, field: &str) -> Result<T, Error> {
    let value = value.ok_or_else(|| Error::decode(format!("admission request has no {field}")))?;
    Ok(T::deserialize(value)?)
}

// =============================================================================
// Decision
// =============================================================================

/// Outcome of one admission request
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Patch to apply to the incoming object, never empty
    pub patch: Option<Patch>,
    /// Rejection message
    pub reason: String,
    /// Field-level causes of a rejection
    pub causes: FieldErrors,
    /// Status code (0 when admitted)
    pub code: u16,
}

impl Decision {
    /// Admit without changes
    pub fn allow() -> Self {
        Self {
            allowed: true,
            patch: None,
            reason: String::new(),
            causes: FieldErrors::new(),
            code: 0,
        }
    }

    /// Admit with a patch; an empty patch is dropped
    pub fn patched(patch: Patch) -> Self {
        Self {
            patch: (!patch::is_empty(&patch)).then_some(patch),
            ..Self::allow()
        }
    }

    /// Reject with the error's message and field causes
    pub fn reject(err: &Error) -> Self {
        Self {
            allowed: false,
            patch: None,
            reason: err.to_string(),
            causes: err.field_errors().cloned().unwrap_or_default(),
            code: REJECTED_CODE,
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Kinds whose pods run under a service identity this webhook provisions
trait ServiceIdentity {
    fn requested_service_account(&self) -> &str;
}

impl ServiceIdentity for GameServer {
    fn requested_service_account(&self) -> &str {
        self.spec.service_account_name()
    }
}

impl ServiceIdentity for GameServerSet {
    fn requested_service_account(&self) -> &str {
        self.spec.template.spec.service_account_name()
    }
}

impl ServiceIdentity for Squad {
    fn requested_service_account(&self) -> &str {
        self.spec.template.spec.service_account_name()
    }
}

/// Routes admission requests by kind and operation
pub struct Dispatcher {
    decoder: ObjectDecoder,
    provisioner: Provisioner,
    pods: Arc<dyn PodTemplateValidator>,
    sidecar: SidecarConfig,
}

impl Dispatcher {
    /// Create a dispatcher for every supported kind
    pub fn new(
        provisioner: Provisioner,
        pods: Arc<dyn PodTemplateValidator>,
        sidecar: SidecarConfig,
    ) -> Self {
        Self {
            decoder: ObjectDecoder::default(),
            provisioner,
            pods,
            sidecar,
        }
    }

    /// Decide one request; errors become rejections
    pub async fn dispatch(&self, req: &MutationRequest) -> Decision {
        let decision = match self.admit(req).await {
            Ok(decision) => decision,
            Err(e) => Decision::reject(&e),
        };

        if decision.allowed {
            info!(
                kind = %req.kind,
                namespace = %req.namespace,
                name = %req.name,
                operation = ?req.operation,
                patched = decision.patch.is_some(),
                "admitted"
            );
        } else {
            warn!(
                kind = %req.kind,
                namespace = %req.namespace,
                name = %req.name,
                operation = ?req.operation,
                reason = %decision.reason,
                "rejected"
            );
        }
        decision
    }

    async fn admit(&self, req: &MutationRequest) -> Result<Decision, Error> {
        if !matches!(req.operation, Operation::Create | Operation::Update) {
            return Ok(Decision::allow());
        }

        match self.decoder.decode(req)? {
            AdmissionObject::GameServer(t) => self.admit_workload(&req.namespace, t).await,
            AdmissionObject::GameServerSet(t) => self.admit_workload(&req.namespace, t).await,
            AdmissionObject::Squad(t) => self.admit_workload(&req.namespace, t).await,
            AdmissionObject::Pod(Transition::Create(pod)) => self.admit_pod(&pod),
            AdmissionObject::Pod(Transition::Update { .. }) => Ok(Decision::allow()),
            AdmissionObject::Unsupported(_) => Ok(Decision::allow()),
        }
    }

    async fn admit_workload<T>(&self, namespace: &str, transition: Transition<T>) -> Result<Decision, Error>
    where
        T: EnsureDefaults + Validate + ServiceIdentity + Serialize,
    {
        match transition {
            Transition::Create(obj) => {
                self.provisioner
                    .ensure_service_identity(namespace, Some(obj.requested_service_account()))
                    .await?;
                let defaulted = obj.with_defaults();
                defaulted.validate(self.pods.as_ref()).into_result()?;
                Ok(Decision::patched(patch::diff(&obj, &defaulted)?))
            }
            Transition::Update { old, new } => {
                T::validate_update(&old, &new).into_result()?;
                Ok(Decision::allow())
            }
        }
    }

    fn admit_pod(&self, pod: &Pod) -> Result<Decision, Error> {
        let injected = SidecarPlan::for_pod(&self.sidecar, pod).apply(pod);
        Ok(Decision::patched(patch::diff(pod, &injected)?))
    }
}
