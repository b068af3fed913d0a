//! Object metadata and name validation
//!
//! Character-level checks for the name formats the API server accepts:
//! DNS-1123 labels and subdomains, qualified names (label and annotation
//! keys), label values, environment variable names and port names.

use std::collections::BTreeMap;

use super::field::{FieldError, FieldErrors, FieldPath};

/// Maximum length of a label value and of a DNS-1123 label
pub const LABEL_VALUE_MAX_LEN: usize = 63;

/// Maximum length of a DNS-1123 subdomain
pub const DNS1123_SUBDOMAIN_MAX_LEN: usize = 253;

/// Maximum total size of all annotations on an object
pub const TOTAL_ANNOTATION_SIZE_LIMIT: usize = 256 * 1024;

const PORT_NAME_MAX_LEN: usize = 15;

fn is_lower_alnum(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

/// Validate a DNS-1123 label: lowercase alphanumerics and '-', alphanumeric at both ends
pub fn validate_dns1123_label(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("must not be empty".to_string());
    }
    if s.len() > LABEL_VALUE_MAX_LEN {
        return Err(format!("must be no more than {LABEL_VALUE_MAX_LEN} characters"));
    }
    let bytes_ok = s.chars().all(|c| is_lower_alnum(c) || c == '-');
    let ends_ok = s.starts_with(is_lower_alnum) && s.ends_with(is_lower_alnum);
    if !bytes_ok || !ends_ok {
        return Err(
            "a lowercase RFC 1123 label must consist of lower case alphanumeric characters or '-', \
             and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    Ok(())
}

/// Validate a DNS-1123 subdomain: dot-separated DNS-1123 labels, at most 253 characters
pub fn validate_dns1123_subdomain(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("must not be empty".to_string());
    }
    if s.len() > DNS1123_SUBDOMAIN_MAX_LEN {
        return Err(format!(
            "must be no more than {DNS1123_SUBDOMAIN_MAX_LEN} characters"
        ));
    }
    if s.split('.').any(|part| validate_dns1123_label(part).is_err()) {
        return Err(
            "a lowercase RFC 1123 subdomain must consist of lower case alphanumeric characters, \
             '-' or '.', and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    Ok(())
}

/// Characters allowed in the name part of a qualified name and in label values
fn validate_name_chars(s: &str) -> bool {
    let alnum = |c: char| c.is_ascii_alphanumeric();
    s.starts_with(alnum)
        && s.ends_with(alnum)
        && s.chars().all(|c| alnum(c) || matches!(c, '-' | '_' | '.'))
}

/// Validate a qualified name such as `app` or `carrier.ocgi.dev/squad`
pub fn validate_qualified_name(s: &str) -> Result<(), String> {
    let name = match s.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() {
                return Err("prefix part must be non-empty".to_string());
            }
            validate_dns1123_subdomain(prefix).map_err(|e| format!("prefix part {e}"))?;
            name
        }
        None => s,
    };
    if name.is_empty() {
        return Err("name part must be non-empty".to_string());
    }
    if name.len() > LABEL_VALUE_MAX_LEN {
        return Err(format!(
            "name part must be no more than {LABEL_VALUE_MAX_LEN} characters"
        ));
    }
    if !validate_name_chars(name) {
        return Err(
            "name part must consist of alphanumeric characters, '-', '_' or '.', \
             and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    Ok(())
}

/// Validate a label value; the empty string is allowed
pub fn validate_label_value(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Ok(());
    }
    if s.len() > LABEL_VALUE_MAX_LEN {
        return Err(format!("must be no more than {LABEL_VALUE_MAX_LEN} characters"));
    }
    if !validate_name_chars(s) {
        return Err(
            "a valid label must be an empty string or consist of alphanumeric characters, \
             '-', '_' or '.', and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    Ok(())
}

/// Validate an environment variable name
pub fn validate_env_var_name(s: &str) -> Result<(), String> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    let valid = !s.is_empty()
        && !s.starts_with(|c: char| c.is_ascii_digit())
        && s.chars().all(allowed)
        && s != "."
        && s != ".."
        && !s.starts_with("..");
    if !valid {
        return Err(
            "a valid environment variable name must consist of alphabetic characters, digits, \
             '_', '-', or '.', and must not start with a digit"
                .to_string(),
        );
    }
    Ok(())
}

/// Validate a named port (IANA service name)
pub fn validate_port_name(s: &str) -> Result<(), String> {
    if s.is_empty() || s.len() > PORT_NAME_MAX_LEN {
        return Err(format!("must be 1-{PORT_NAME_MAX_LEN} characters"));
    }
    if !s.chars().all(|c| is_lower_alnum(c) || c == '-') {
        return Err("must contain only lowercase alphanumeric characters or '-'".to_string());
    }
    if !s.chars().any(|c| c.is_ascii_lowercase()) {
        return Err("must contain at least one letter".to_string());
    }
    if s.contains("--") {
        return Err("must not contain consecutive hyphens".to_string());
    }
    if s.starts_with('-') || s.ends_with('-') {
        return Err("must not begin or end with a hyphen".to_string());
    }
    Ok(())
}

/// Validate every key and value of a label map
pub fn validate_labels(labels: Option<&BTreeMap<String, String>>, path: &FieldPath) -> FieldErrors {
    let mut errs = FieldErrors::new();
    for (key, value) in labels.into_iter().flatten() {
        if let Err(e) = validate_qualified_name(key) {
            errs.push(FieldError::invalid(path.clone(), key.as_str(), e));
        }
        if let Err(e) = validate_label_value(value) {
            errs.push(FieldError::invalid(path.key(key), value.as_str(), e));
        }
    }
    errs
}

/// Validate annotation keys and the total annotation size
pub fn validate_annotations(
    annotations: Option<&BTreeMap<String, String>>,
    path: &FieldPath,
) -> FieldErrors {
    let mut errs = FieldErrors::new();
    let mut total = 0usize;
    for (key, value) in annotations.into_iter().flatten() {
        if let Err(e) = validate_qualified_name(&key.to_lowercase()) {
            errs.push(FieldError::invalid(path.clone(), key.as_str(), e));
        }
        total += key.len() + value.len();
    }
    if total > TOTAL_ANNOTATION_SIZE_LIMIT {
        errs.push(FieldError::too_long(path.clone(), TOTAL_ANNOTATION_SIZE_LIMIT));
    }
    errs
}
