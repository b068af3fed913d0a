//! Field-level validation errors in the Kubernetes API format

use std::fmt;

use serde_json::Value;

/// Path to a field inside an object, e.g. `spec.ports[0].hostPort`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(String);

impl FieldPath {
    /// Start a path at the given root segment
    pub fn new(root: impl Into<String>) -> Self {
        Self(root.into())
    }

    /// Descend into a named child field
    pub fn child(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}.{name}", self.0))
        }
    }

    /// Descend into a list element
    pub fn index(&self, i: usize) -> Self {
        Self(format!("{}[{i}]", self.0))
    }

    /// Descend into a map entry
    pub fn key(&self, k: &str) -> Self {
        Self(format!("{}[{k}]", self.0))
    }

    /// The rendered path
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Category of a field error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Value is malformed or out of range
    Invalid,
    /// Value is not allowed in this context
    Forbidden,
    /// Value exceeds a length limit
    TooLong,
    /// Value is missing
    Required,
    /// Value repeats an earlier one
    Duplicate,
    /// Value is not one of the supported values
    NotSupported,
    /// Validation itself failed
    Internal,
}

impl ErrorKind {
    /// Human-readable label used in messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invalid => "Invalid value",
            Self::Forbidden => "Forbidden",
            Self::TooLong => "Too long",
            Self::Required => "Required value",
            Self::Duplicate => "Duplicate value",
            Self::NotSupported => "Unsupported value",
            Self::Internal => "Internal error",
        }
    }

    /// Machine-readable cause type reported in a Status
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Invalid => "FieldValueInvalid",
            Self::Forbidden => "FieldValueForbidden",
            Self::TooLong => "FieldValueTooLong",
            Self::Required => "FieldValueRequired",
            Self::Duplicate => "FieldValueDuplicate",
            Self::NotSupported => "FieldValueNotSupported",
            Self::Internal => "InternalError",
        }
    }
}

/// A single field validation failure
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    /// Error category
    pub kind: ErrorKind,
    /// Offending field
    pub field: FieldPath,
    /// Offending value, when it is worth echoing back
    pub value: Option<Value>,
    /// Additional explanation
    pub detail: String,
}

impl FieldError {
    fn new(kind: ErrorKind, field: FieldPath, value: Option<Value>, detail: String) -> Self {
        Self {
            kind,
            field,
            value,
            detail,
        }
    }

    /// Value is malformed or out of range
    pub fn invalid(field: FieldPath, value: impl Into<Value>, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, field, Some(value.into()), detail.into())
    }

    /// Value is not allowed
    pub fn forbidden(field: FieldPath, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, field, None, detail.into())
    }

    /// Value is longer than `max_len` bytes
    pub fn too_long(field: FieldPath, max_len: usize) -> Self {
        Self::new(
            ErrorKind::TooLong,
            field,
            None,
            format!("must have at most {max_len} bytes"),
        )
    }

    /// Value is missing
    pub fn required(field: FieldPath, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Required, field, None, detail.into())
    }

    /// Value repeats an earlier one
    pub fn duplicate(field: FieldPath, value: impl Into<Value>) -> Self {
        Self::new(ErrorKind::Duplicate, field, Some(value.into()), String::new())
    }

    /// Value is not among `supported`
    pub fn not_supported(field: FieldPath, value: impl Into<Value>, supported: &[&str]) -> Self {
        let quoted: Vec<String> = supported.iter().map(|s| format!("\"{s}\"")).collect();
        Self::new(
            ErrorKind::NotSupported,
            field,
            Some(value.into()),
            format!("supported values: {}", quoted.join(", ")),
        )
    }

    /// Validation could not be performed
    pub fn internal(field: FieldPath, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, field, None, detail.into())
    }

    /// Message without the field prefix
    pub fn body(&self) -> String {
        let mut body = self.kind.as_str().to_string();
        if let Some(value) = &self.value {
            body.push_str(&format!(": {value}"));
        }
        if !self.detail.is_empty() {
            body.push_str(&format!(": {}", self.detail));
        }
        body
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.body())
    }
}

/// Ordered list of field errors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one error
    pub fn push(&mut self, err: FieldError) {
        self.0.push(err);
    }

    /// Returns true when there are no errors
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of errors
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the errors
    pub fn iter(&self) -> std::slice::Iter<'_, FieldError> {
        self.0.iter()
    }

    /// `Ok(())` when empty, otherwise a validation error
    pub fn into_result(self) -> Result<(), crate::Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::Validation(self))
        }
    }
}

impl Extend<FieldError> for FieldErrors {
    fn extend<I: IntoIterator<Item = FieldError>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl FromIterator<FieldError> for FieldErrors {
    fn from_iter<I: IntoIterator<Item = FieldError>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for FieldErrors {
    type Item = FieldError;
    type IntoIter = std::vec::IntoIter<FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FieldErrors {
    type Item = &'a FieldError;
    type IntoIter = std::slice::Iter<'a, FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => Ok(()),
            [only] => write!(f, "{only}"),
            many => {
                let rendered: Vec<String> = many.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}
