//! Admission validation for carrier resources
//!
//! Creation checks the structure of a defaulted object. Updates are checked
//! in two phases: the fields that may legitimately change are copied from the
//! new object onto a clone of the old one, then whatever still differs is
//! reported as Forbidden.

mod field;
mod meta;
mod pod;

pub use field::{ErrorKind, FieldError, FieldErrors, FieldPath};
pub use meta::{
    validate_annotations, validate_dns1123_label, validate_dns1123_subdomain,
    validate_label_value, validate_labels, validate_qualified_name, LABEL_VALUE_MAX_LEN,
};
#[cfg(test)]
pub use pod::MockPodTemplateValidator;
pub use pod::{
    apply_pod_defaults, synthetic_pod_template, PodTemplateValidator, StructuralPodValidator,
    PLACEHOLDER_NAME,
};

use k8s_openapi::api::core::v1::{Container, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde_json::Value;

use crate::config::canonicalize_quantity;
use crate::crd::{GameServer, GameServerSet, GameServerSpec, PortPolicy, Squad};
use crate::defaults::carry_over_defaults;

/// Create and update validation for an admitted resource
pub trait Validate {
    /// Check a newly created (already defaulted) object
    fn validate(&self, pods: &dyn PodTemplateValidator) -> FieldErrors;

    /// Check the transition from `old` to `new`
    fn validate_update(old: &Self, new: &Self) -> FieldErrors;
}

// =============================================================================
// Create
// =============================================================================

impl Validate for GameServer {
    fn validate(&self, pods: &dyn PodTemplateValidator) -> FieldErrors {
        let mut errs = validate_name(&self.metadata);
        errs.extend(validate_spec(&self.spec, &FieldPath::new("spec")));
        errs.extend(pods.validate(&synthetic_pod_template(None, &self.spec.template)));
        errs
    }

    fn validate_update(old: &Self, new: &Self) -> FieldErrors {
        let mut errs = validate_name(&new.metadata);
        let mut equalized = old.spec.clone();

        if let (Some(old_pod), Some(new_pod)) =
            (equalized.template.spec.as_mut(), new.spec.template.spec.as_ref())
        {
            copy_images(old_pod, new_pod, false);
        }

        let spec = FieldPath::new("spec");
        if !semantically_equal(&old.spec.readiness_gates, &new.spec.readiness_gates) {
            errs.push(FieldError::forbidden(
                spec.child("readinessGates"),
                "readinessGates cannot be updated after creation",
            ));
        }
        if !semantically_equal(&old.spec.deletable_gates, &new.spec.deletable_gates) {
            errs.push(FieldError::forbidden(
                spec.child("deletableGates"),
                "deletableGates cannot be updated after creation",
            ));
        }

        for (old_port, new_port) in equalized.ports.iter_mut().zip(&new.spec.ports) {
            old_port.host_port = new_port.host_port;
            old_port.host_port_range = new_port.host_port_range.clone();
        }
        if !semantically_equal(&equalized.ports, &new.spec.ports) {
            errs.push(FieldError::forbidden(
                spec.child("ports"),
                "ports cannot be updated after creation",
            ));
        }

        if !pod_specs_equal(equalized.template.spec.as_ref(), new.spec.template.spec.as_ref()) {
            errs.push(FieldError::forbidden(
                spec.child("template").child("spec"),
                "pod template spec cannot be updated after creation, except for container images",
            ));
        }
        errs
    }
}

impl Validate for GameServerSet {
    fn validate(&self, pods: &dyn PodTemplateValidator) -> FieldErrors {
        let mut errs = validate_name(&self.metadata);
        let template = FieldPath::new("spec").child("template");
        errs.extend(validate_spec(&self.spec.template.spec, &template.child("spec")));
        errs.extend(validate_template_meta(
            self.spec.template.metadata.as_ref(),
            &template.child("metadata"),
        ));
        errs.extend(pods.validate(&synthetic_pod_template(
            Some(&self.metadata),
            &self.spec.template.spec.template,
        )));
        errs
    }

    fn validate_update(old: &Self, new: &Self) -> FieldErrors {
        let mut errs = validate_name(&new.metadata);
        let mut equalized = old.spec.clone();
        equalized.replicas = new.spec.replicas;
        equalized.template.metadata = new.spec.template.metadata.clone();
        if let (Some(old_pod), Some(new_pod)) = (
            equalized.template.spec.template.spec.as_mut(),
            new.spec.template.spec.template.spec.as_ref(),
        ) {
            copy_images(old_pod, new_pod, true);
        }

        if !gameserver_specs_equal(&equalized.template.spec, &new.spec.template.spec) {
            errs.push(FieldError::forbidden(
                FieldPath::new("spec").child("template").child("spec"),
                "GameServer spec cannot be changed, except for image and imagePullPolicy",
            ));
        }
        errs
    }
}

impl Validate for Squad {
    fn validate(&self, pods: &dyn PodTemplateValidator) -> FieldErrors {
        let mut errs = validate_name(&self.metadata);
        let template = FieldPath::new("spec").child("template");
        errs.extend(validate_spec(&self.spec.template.spec, &template.child("spec")));
        errs.extend(validate_template_meta(
            self.spec.template.metadata.as_ref(),
            &template.child("metadata"),
        ));
        errs.extend(pods.validate(&synthetic_pod_template(
            Some(&self.metadata),
            &self.spec.template.spec.template,
        )));
        errs
    }

    fn validate_update(old: &Self, new: &Self) -> FieldErrors {
        let mut errs = validate_name(&new.metadata);
        let new = carry_over_defaults(old, new);
        let mut equalized = old.spec.clone();
        if let (Some(old_pod), Some(new_pod)) = (
            equalized.template.spec.template.spec.as_mut(),
            new.spec.template.spec.template.spec.as_ref(),
        ) {
            copy_images(old_pod, new_pod, true);
        }

        if !gameserver_specs_equal(&equalized.template.spec, &new.spec.template.spec) {
            errs.push(FieldError::forbidden(
                FieldPath::new("spec").child("template").child("spec"),
                "GameServer spec cannot be changed, except for image and imagePullPolicy",
            ));
        }
        errs
    }
}

// =============================================================================
// Shared rules
// =============================================================================

/// Object names end up as label values on generated objects
fn validate_name(meta: &ObjectMeta) -> FieldErrors {
    let mut errs = FieldErrors::new();
    let name = meta.name.as_deref().unwrap_or_default();
    if name.len() > LABEL_VALUE_MAX_LEN {
        errs.push(FieldError::too_long(
            FieldPath::new("metadata").child("name"),
            LABEL_VALUE_MAX_LEN,
        ));
    }
    errs
}

fn validate_template_meta(meta: Option<&ObjectMeta>, path: &FieldPath) -> FieldErrors {
    let mut errs = FieldErrors::new();
    if let Some(meta) = meta {
        errs.extend(validate_labels(meta.labels.as_ref(), &path.child("labels")));
        errs.extend(validate_annotations(
            meta.annotations.as_ref(),
            &path.child("annotations"),
        ));
    }
    errs
}

/// Port rules plus the pod template metadata of a GameServer spec at `path`
fn validate_spec(spec: &GameServerSpec, path: &FieldPath) -> FieldErrors {
    let mut errs = FieldErrors::new();
    for (i, port) in spec.ports.iter().enumerate() {
        let p = path.child("ports").index(i);
        let range = port.container_port_range.as_ref();

        if let Some(range) = range.filter(|r| r.min_port > r.max_port) {
            errs.push(FieldError::invalid(
                p.child("containerPortRange"),
                range.min_port,
                "containerPortRange.minPort can not be larger than containerPortRange.maxPort",
            ));
        }
        if let Some(host) = port.host_port_range.as_ref().filter(|r| r.min_port > r.max_port) {
            errs.push(FieldError::invalid(
                p.child("hostPortRange"),
                host.min_port,
                "hostPortRange.minPort can not be larger than hostPortRange.maxPort",
            ));
        }
        match (port.container_port, range) {
            (Some(_), Some(_)) => errs.push(FieldError::forbidden(
                p.child("containerPortRange"),
                "containerPortRange and containerPort are exclusive in one GameServer port",
            )),
            (None, None) => errs.push(FieldError::required(
                p.child("containerPort"),
                "one of containerPort or containerPortRange is required",
            )),
            _ => {}
        }
        if let Some(cp) = port.container_port.filter(|cp| *cp <= 0) {
            errs.push(FieldError::invalid(
                p.child("containerPort"),
                cp,
                "containerPort must be greater than 0",
            ));
        }
        if let Some(range) = range {
            if range.min_port <= 0 {
                errs.push(FieldError::forbidden(
                    p.child("containerPortRange"),
                    "containerPortRange.minPort must be greater than 0",
                ));
            }
            if range.max_port <= 0 {
                errs.push(FieldError::forbidden(
                    p.child("containerPortRange"),
                    "containerPortRange.maxPort must be greater than 0",
                ));
            }
        }
        if port.host_port.is_some_and(|hp| hp > 0) && port.port_policy == Some(PortPolicy::Dynamic) {
            errs.push(FieldError::forbidden(
                p.child("hostPort"),
                "hostPort must not be set when portPolicy is Dynamic",
            ));
        }
    }
    errs.extend(validate_template_meta(
        spec.template.metadata.as_ref(),
        &path.child("template").child("metadata"),
    ));
    errs
}

/// Copy container images (and optionally pull policies) by index
fn copy_images(target: &mut PodSpec, source: &PodSpec, pull_policy: bool) {
    let pairs = target.containers.iter_mut().zip(&source.containers);
    for (to, from) in pairs {
        copy_image(to, from, pull_policy);
    }
}

fn copy_image(to: &mut Container, from: &Container, pull_policy: bool) {
    to.image = from.image.clone();
    if pull_policy {
        to.image_pull_policy = from.image_pull_policy.clone();
    }
}

// =============================================================================
// Semantic equality
// =============================================================================

/// Pod specs compare equal when both are absent or semantically identical
fn pod_specs_equal(a: Option<&PodSpec>, b: Option<&PodSpec>) -> bool {
    let canonical = |spec: Option<&PodSpec>| {
        let mut spec = spec.cloned().unwrap_or_default();
        canonicalize_pod_quantities(&mut spec);
        spec
    };
    semantically_equal(&canonical(a), &canonical(b))
}

fn gameserver_specs_equal(a: &GameServerSpec, b: &GameServerSpec) -> bool {
    let canonical = |spec: &GameServerSpec| {
        let mut spec = spec.clone();
        if let Some(pod) = spec.template.spec.as_mut() {
            canonicalize_pod_quantities(pod);
        }
        spec
    };
    semantically_equal(&canonical(a), &canonical(b))
}

/// Equality that ignores how an object was serialized
///
/// Absent, null and empty lists or maps are the same value. Quantities must
/// already be canonical.
fn semantically_equal<T: Serialize>(a: &T, b: &T) -> bool {
    let comparable = |value: &T| {
        let mut value = serde_json::to_value(value).ok()?;
        prune_empty(&mut value);
        Some(value)
    };
    match (comparable(a), comparable(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Drop nulls and empty lists or maps, innermost first
fn prune_empty(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.values_mut().for_each(prune_empty);
            map.retain(|_, v| !is_empty_value(v));
        }
        Value::Array(items) => items.iter_mut().for_each(prune_empty),
        _ => {}
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn canonicalize_pod_quantities(spec: &mut PodSpec) {
    let containers = spec
        .containers
        .iter_mut()
        .chain(spec.init_containers.iter_mut().flatten());
    for container in containers {
        if let Some(resources) = container.resources.as_mut() {
            let maps = resources.limits.iter_mut().chain(resources.requests.iter_mut());
            maps.flat_map(|m| m.values_mut()).for_each(canonicalize_quantity);
        }
    }
    spec.overhead
        .iter_mut()
        .flat_map(|m| m.values_mut())
        .for_each(canonicalize_quantity);
    let empty_dirs = spec
        .volumes
        .iter_mut()
        .flatten()
        .filter_map(|v| v.empty_dir.as_mut());
    for empty_dir in empty_dirs {
        if let Some(size) = empty_dir.size_limit.as_mut() {
            canonicalize_quantity(size);
        }
    }
}
