//! Change events delivered to store subscribers.

use std::fmt;

/// Kinds of objects the store manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Machine,
    Provision,
    BootTarget,
    BootMedia,
    ResponseTemplate,
    ConfigMap,
    Secret,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Machine => "Machine",
            Self::Provision => "Provision",
            Self::BootTarget => "BootTarget",
            Self::BootMedia => "BootMedia",
            Self::ResponseTemplate => "ResponseTemplate",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
        };
        f.write_str(name)
    }
}

/// Identity of one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// One observed change. `deleted` distinguishes removals from create/update;
/// subscribers treat both as "re-reconcile this key".
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub key: ObjectKey,
    pub deleted: bool,
}
