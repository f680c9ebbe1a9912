use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use crate::constants::ROOT_PATH;
use crate::LoopError;

/// A handle naming something events can be bound on and raised against.
///
/// Targets are identified by path, so two handles with the same path are the same target.
///
/// # Example
/// ```
/// use loop_bridge::Target;
///
/// let root = Target::root();
/// assert_eq!(root.path(), ".");
/// assert_eq!(Target::new(".status"), Target::new(".status"));
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Target {
    path: Arc<str>,
}

impl Target {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: Arc::from(path.into()) }
    }

    /// The root target, `"."`.
    pub fn root() -> Self {
        Self::new(ROOT_PATH)
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::root()
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

impl Debug for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Target({})", self.path)
    }
}

/// A virtual event as the host delivers it.
///
/// `detail` is the only free-form slot a virtual event carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeEvent {
    sequence: String,
    target: Target,
    detail: String,
}

impl NativeEvent {
    pub fn new(sequence: impl Into<String>, target: Target, detail: impl Into<String>) -> Self {
        Self {
            sequence: sequence.into(),
            target,
            detail: detail.into(),
        }
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// Checks that `sequence` is a virtual event name of the form `<<name>>`.
///
/// # Example
/// ```
/// use loop_bridge::host::validate_sequence;
///
/// assert!(validate_sequence("<<progress>>").is_ok());
/// assert!(validate_sequence("<Button-1>").is_err());
/// assert!(validate_sequence("<<>>").is_err());
/// ```
pub fn validate_sequence(sequence: &str) -> Result<(), LoopError> {
    let name = sequence
        .strip_prefix("<<")
        .and_then(|rest| rest.strip_suffix(">>"))
        .ok_or_else(|| LoopError::InvalidSequence(sequence.to_string()))?;

    if name.is_empty() || name.chars().any(|c| c == '<' || c == '>' || c.is_whitespace()) {
        return Err(LoopError::InvalidSequence(sequence.to_string()));
    }
    Ok(())
}
