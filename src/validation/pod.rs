//! Pod template validation
//!
//! Pod templates embedded in carrier resources are checked the way the API
//! server would check a standalone PodTemplate: platform defaults first, then
//! structural rules. The check sits behind [`PodTemplateValidator`] so the
//! rule set can be swapped out.

use std::collections::HashSet;

use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplate, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use mockall::automock;

use super::field::{FieldError, FieldErrors, FieldPath};
use super::meta::{
    validate_annotations, validate_dns1123_label, validate_dns1123_subdomain,
    validate_env_var_name, validate_labels, validate_port_name,
};

/// Name and namespace given to the synthetic PodTemplate
pub const PLACEHOLDER_NAME: &str = "fake";

const RESTART_POLICIES: [&str; 3] = ["Always", "OnFailure", "Never"];
const DNS_POLICIES: [&str; 4] = ["ClusterFirstWithHostNet", "ClusterFirst", "Default", "None"];
const PULL_POLICIES: [&str; 3] = ["Always", "IfNotPresent", "Never"];
const PROTOCOLS: [&str; 3] = ["TCP", "UDP", "SCTP"];

/// Structural validation of a pod template
#[cfg_attr(test, automock)]
pub trait PodTemplateValidator: Send + Sync {
    /// Validate a defaulted pod template, returning every failure found
    fn validate(&self, template: &PodTemplate) -> FieldErrors;
}

/// Build the PodTemplate that stands in for an embedded pod template
///
/// Owner metadata (labels, annotations) is carried over, name and namespace
/// are replaced by [`PLACEHOLDER_NAME`], and platform defaults are applied.
pub fn synthetic_pod_template(owner: Option<&ObjectMeta>, template: &PodTemplateSpec) -> PodTemplate {
    let mut metadata = owner.cloned().unwrap_or_default();
    metadata.name = Some(PLACEHOLDER_NAME.to_string());
    metadata.namespace = Some(PLACEHOLDER_NAME.to_string());

    let mut template = template.clone();
    if let Some(spec) = template.spec.as_mut() {
        apply_pod_defaults(spec);
    }
    PodTemplate {
        metadata,
        template: Some(template),
    }
}

// =============================================================================
// Platform defaults
// =============================================================================

/// Fill the fields the API server defaults on every pod
pub fn apply_pod_defaults(spec: &mut PodSpec) {
    spec.restart_policy.get_or_insert_with(|| "Always".to_string());
    spec.dns_policy.get_or_insert_with(|| "ClusterFirst".to_string());
    spec.scheduler_name
        .get_or_insert_with(|| "default-scheduler".to_string());
    spec.termination_grace_period_seconds.get_or_insert(30);

    let init = spec.init_containers.iter_mut().flatten();
    for container in spec.containers.iter_mut().chain(init) {
        apply_container_defaults(container);
    }
}

fn apply_container_defaults(container: &mut Container) {
    container
        .termination_message_path
        .get_or_insert_with(|| "/dev/termination-log".to_string());
    container
        .termination_message_policy
        .get_or_insert_with(|| "File".to_string());
    if container.image_pull_policy.is_none() {
        let policy = default_pull_policy(container.image.as_deref().unwrap_or_default());
        container.image_pull_policy = Some(policy.to_string());
    }
    for port in container.ports.iter_mut().flatten() {
        port.protocol.get_or_insert_with(|| "TCP".to_string());
    }
}

/// `Always` for untagged or `:latest` images, `IfNotPresent` otherwise
fn default_pull_policy(image: &str) -> &'static str {
    if image.contains('@') {
        return "IfNotPresent";
    }
    let last = image.rsplit('/').next().unwrap_or(image);
    match last.split_once(':') {
        None | Some((_, "latest")) => "Always",
        Some(_) => "IfNotPresent",
    }
}

// =============================================================================
// Structural rules
// =============================================================================

/// Built-in pod template rules
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralPodValidator;

impl PodTemplateValidator for StructuralPodValidator {
    fn validate(&self, template: &PodTemplate) -> FieldErrors {
        let mut errs = FieldErrors::new();
        let meta_path = FieldPath::new("metadata");
        validate_object_meta(&template.metadata, &meta_path, &mut errs);

        let tpl_path = FieldPath::new("template");
        let Some(tpl) = template.template.as_ref() else {
            errs.push(FieldError::required(tpl_path, ""));
            return errs;
        };
        if let Some(meta) = tpl.metadata.as_ref() {
            let path = tpl_path.child("metadata");
            errs.extend(validate_labels(meta.labels.as_ref(), &path.child("labels")));
            errs.extend(validate_annotations(
                meta.annotations.as_ref(),
                &path.child("annotations"),
            ));
        }
        match tpl.spec.as_ref() {
            Some(spec) => validate_pod_spec(spec, &tpl_path.child("spec"), &mut errs),
            None => errs.push(FieldError::required(tpl_path.child("spec"), "")),
        }
        errs
    }
}

fn validate_object_meta(meta: &ObjectMeta, path: &FieldPath, errs: &mut FieldErrors) {
    match meta.name.as_deref() {
        Some(name) => {
            if let Err(e) = validate_dns1123_subdomain(name) {
                errs.push(FieldError::invalid(path.child("name"), name, e));
            }
        }
        None => errs.push(FieldError::required(path.child("name"), "name is required")),
    }
    if let Some(ns) = meta.namespace.as_deref() {
        if let Err(e) = validate_dns1123_subdomain(ns) {
            errs.push(FieldError::invalid(path.child("namespace"), ns, e));
        }
    }
    errs.extend(validate_labels(meta.labels.as_ref(), &path.child("labels")));
    errs.extend(validate_annotations(
        meta.annotations.as_ref(),
        &path.child("annotations"),
    ));
}

fn validate_pod_spec(spec: &PodSpec, path: &FieldPath, errs: &mut FieldErrors) {
    let volumes = validate_volumes(spec, &path.child("volumes"), errs);

    if spec.containers.is_empty() {
        errs.push(FieldError::required(path.child("containers"), ""));
    }

    let mut container_names = HashSet::new();
    let mut port_names = HashSet::new();
    let init = spec.init_containers.iter().flatten();
    let groups = [
        (path.child("initContainers"), init.collect::<Vec<_>>()),
        (path.child("containers"), spec.containers.iter().collect()),
    ];
    for (group_path, containers) in &groups {
        for (i, container) in containers.iter().enumerate() {
            let c_path = group_path.index(i);
            let name_path = c_path.child("name");
            match validate_dns1123_label(&container.name) {
                Err(e) => errs.push(FieldError::invalid(name_path, container.name.as_str(), e)),
                Ok(()) if !container_names.insert(container.name.as_str()) => {
                    errs.push(FieldError::duplicate(name_path, container.name.as_str()))
                }
                Ok(()) => {}
            }
            validate_container(container, &c_path, &volumes, &mut port_names, errs);
        }
    }

    check_supported(
        spec.restart_policy.as_deref(),
        &RESTART_POLICIES,
        path.child("restartPolicy"),
        errs,
    );
    check_supported(
        spec.dns_policy.as_deref(),
        &DNS_POLICIES,
        path.child("dnsPolicy"),
        errs,
    );
}

fn validate_volumes<'a>(spec: &'a PodSpec, path: &FieldPath, errs: &mut FieldErrors) -> HashSet<&'a str> {
    let mut names = HashSet::new();
    for (i, volume) in spec.volumes.iter().flatten().enumerate() {
        let name_path = path.index(i).child("name");
        match validate_dns1123_label(&volume.name) {
            Err(e) => errs.push(FieldError::invalid(name_path, volume.name.as_str(), e)),
            Ok(()) if !names.insert(volume.name.as_str()) => {
                errs.push(FieldError::duplicate(name_path, volume.name.as_str()))
            }
            Ok(()) => {}
        }
    }
    names
}

fn validate_container<'a>(
    container: &'a Container,
    path: &FieldPath,
    volumes: &HashSet<&str>,
    port_names: &mut HashSet<&'a str>,
    errs: &mut FieldErrors,
) {
    if container.image.as_deref().is_none_or(|i| i.trim().is_empty()) {
        errs.push(FieldError::required(path.child("image"), ""));
    }

    for (i, port) in container.ports.iter().flatten().enumerate() {
        let p_path = path.child("ports").index(i);
        if !(1..=65535).contains(&port.container_port) {
            errs.push(FieldError::invalid(
                p_path.child("containerPort"),
                port.container_port,
                "must be between 1 and 65535, inclusive",
            ));
        }
        if let Some(host) = port.host_port.filter(|p| *p != 0) {
            if !(1..=65535).contains(&host) {
                errs.push(FieldError::invalid(
                    p_path.child("hostPort"),
                    host,
                    "must be between 1 and 65535, inclusive",
                ));
            }
        }
        if let Some(name) = port.name.as_deref() {
            match validate_port_name(name) {
                Err(e) => errs.push(FieldError::invalid(p_path.child("name"), name, e)),
                Ok(()) if !port_names.insert(name) => {
                    errs.push(FieldError::duplicate(p_path.child("name"), name))
                }
                Ok(()) => {}
            }
        }
        check_supported(
            port.protocol.as_deref(),
            &PROTOCOLS,
            p_path.child("protocol"),
            errs,
        );
    }

    for (i, env) in container.env.iter().flatten().enumerate() {
        if let Err(e) = validate_env_var_name(&env.name) {
            errs.push(FieldError::invalid(
                path.child("env").index(i).child("name"),
                env.name.as_str(),
                e,
            ));
        }
    }

    for (i, mount) in container.volume_mounts.iter().flatten().enumerate() {
        let m_path = path.child("volumeMounts").index(i);
        if !volumes.contains(mount.name.as_str()) {
            errs.push(FieldError::invalid(
                m_path.child("name"),
                mount.name.as_str(),
                "must reference a volume declared in the pod spec",
            ));
        }
        if mount.mount_path.is_empty() {
            errs.push(FieldError::required(m_path.child("mountPath"), ""));
        }
    }

    check_supported(
        container.image_pull_policy.as_deref(),
        &PULL_POLICIES,
        path.child("imagePullPolicy"),
        errs,
    );
}

fn check_supported(value: Option<&str>, supported: &[&str], path: FieldPath, errs: &mut FieldErrors) {
    if let Some(value) = value {
        if !supported.contains(&value) {
            errs.push(FieldError::not_supported(path, value, supported));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ErrorKind;
    use k8s_openapi::api::core::v1::{ContainerPort, EnvVar, Volume, VolumeMount};
    use std::collections::BTreeMap;

    fn container(name: &str, image: &str) -> Container {
        Container {
            name: name.to_string(),
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    fn template(containers: Vec<Container>) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers,
                ..Default::default()
            }),
        }
    }

    fn check(tpl: &PodTemplateSpec) -> FieldErrors {
        StructuralPodValidator.validate(&synthetic_pod_template(None, tpl))
    }

    fn fields(errs: &FieldErrors) -> Vec<String> {
        errs.iter().map(|e| e.field.to_string()).collect()
    }

    // =========================================================================
    // Unit Tests
    // =========================================================================

    #[test]
    fn pull_policy_defaults_follow_the_tag() {
        assert_eq!(default_pull_policy("arena"), "Always");
        assert_eq!(default_pull_policy("arena:latest"), "Always");
        assert_eq!(default_pull_policy("registry:5000/arena"), "Always");
        assert_eq!(default_pull_policy("registry:5000/arena:1.0"), "IfNotPresent");
        assert_eq!(default_pull_policy("arena@sha256:abc"), "IfNotPresent");
    }

    #[test]
    fn synthetic_template_uses_placeholder_identity_and_defaults() {
        let owner = ObjectMeta {
            name: Some("arena".to_string()),
            namespace: Some("games".to_string()),
            labels: Some(BTreeMap::from([("app".to_string(), "arena".to_string())])),
            ..Default::default()
        };
        let mut tpl = template(vec![container("server", "arena:1.0")]);
        tpl.spec.as_mut().unwrap().containers[0].ports = Some(vec![ContainerPort {
            container_port: 7777,
            ..Default::default()
        }]);

        let pt = synthetic_pod_template(Some(&owner), &tpl);
        assert_eq!(pt.metadata.name.as_deref(), Some(PLACEHOLDER_NAME));
        assert_eq!(pt.metadata.namespace.as_deref(), Some(PLACEHOLDER_NAME));
        assert_eq!(pt.metadata.labels, owner.labels);

        let spec = pt.template.unwrap().spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Always"));
        assert_eq!(spec.dns_policy.as_deref(), Some("ClusterFirst"));
        assert_eq!(spec.scheduler_name.as_deref(), Some("default-scheduler"));
        assert_eq!(spec.termination_grace_period_seconds, Some(30));
        let c = &spec.containers[0];
        assert_eq!(c.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(c.termination_message_path.as_deref(), Some("/dev/termination-log"));
        assert_eq!(c.termination_message_policy.as_deref(), Some("File"));
        assert_eq!(c.ports.as_ref().unwrap()[0].protocol.as_deref(), Some("TCP"));
    }

    #[test]
    fn valid_template_passes() {
        assert!(check(&template(vec![container("server", "arena:1.0")])).is_empty());
    }

    #[test]
    fn missing_containers_and_spec_are_required() {
        let errs = check(&template(vec![]));
        assert_eq!(fields(&errs), vec!["template.spec.containers"]);

        let errs = check(&PodTemplateSpec::default());
        assert_eq!(fields(&errs), vec!["template.spec"]);
    }

    #[test]
    fn container_names_must_be_labels_and_unique_across_init_containers() {
        let mut tpl = template(vec![container("server", "a:1"), container("Bad_Name", "a:1")]);
        tpl.spec.as_mut().unwrap().init_containers = Some(vec![container("server", "a:1")]);

        let errs = check(&tpl);
        let kinds: Vec<ErrorKind> = errs.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&ErrorKind::Duplicate));
        assert!(fields(&errs).contains(&"template.spec.containers[1].name".to_string()));
        assert!(fields(&errs).contains(&"template.spec.containers[0].name".to_string()));
    }

    #[test]
    fn image_is_required() {
        let mut c = container("server", "");
        c.image = None;
        let errs = check(&template(vec![c]));
        assert_eq!(fields(&errs), vec!["template.spec.containers[0].image"]);
    }

    #[test]
    fn container_ports_are_range_checked_and_names_unique() {
        let mut a = container("a", "img:1");
        a.ports = Some(vec![ContainerPort {
            container_port: 0,
            name: Some("game".to_string()),
            ..Default::default()
        }]);
        let mut b = container("b", "img:1");
        b.ports = Some(vec![ContainerPort {
            container_port: 7777,
            name: Some("game".to_string()),
            protocol: Some("QUIC".to_string()),
            ..Default::default()
        }]);

        let errs = check(&template(vec![a, b]));
        let f = fields(&errs);
        assert!(f.contains(&"template.spec.containers[0].ports[0].containerPort".to_string()));
        assert!(f.contains(&"template.spec.containers[1].ports[0].name".to_string()));
        assert!(f.contains(&"template.spec.containers[1].ports[0].protocol".to_string()));
        assert_eq!(errs.len(), 3);
    }

    #[test]
    fn env_names_and_volume_mounts_are_checked() {
        let mut c = container("server", "img:1");
        c.env = Some(vec![EnvVar {
            name: "1BAD".to_string(),
            ..Default::default()
        }]);
        c.volume_mounts = Some(vec![VolumeMount {
            name: "missing".to_string(),
            mount_path: "/data".to_string(),
            ..Default::default()
        }]);
        let mut tpl = template(vec![c]);
        tpl.spec.as_mut().unwrap().volumes = Some(vec![
            Volume {
                name: "data".to_string(),
                ..Default::default()
            },
            Volume {
                name: "data".to_string(),
                ..Default::default()
            },
        ]);

        let f = fields(&check(&tpl));
        assert!(f.contains(&"template.spec.containers[0].env[0].name".to_string()));
        assert!(f.contains(&"template.spec.containers[0].volumeMounts[0].name".to_string()));
        assert!(f.contains(&"template.spec.volumes[1].name".to_string()));
    }

    #[test]
    fn unsupported_policies_are_rejected() {
        let mut tpl = template(vec![container("server", "img:1")]);
        let spec = tpl.spec.as_mut().unwrap();
        spec.restart_policy = Some("Sometimes".to_string());
        spec.containers[0].image_pull_policy = Some("Maybe".to_string());

        let errs = check(&tpl);
        assert!(errs.iter().all(|e| e.kind == ErrorKind::NotSupported));
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn owner_labels_are_validated() {
        let owner = ObjectMeta {
            labels: Some(BTreeMap::from([("bad key!".to_string(), "v".to_string())])),
            ..Default::default()
        };
        let pt = synthetic_pod_template(Some(&owner), &template(vec![container("s", "i:1")]));
        let errs = StructuralPodValidator.validate(&pt);
        assert_eq!(fields(&errs), vec!["metadata.labels"]);
    }
}
