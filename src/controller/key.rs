//! Work item key: `namespace/name` of an NdbCluster

use std::fmt;

use crate::Error;

/// Namespace-qualified NdbCluster name as carried through the work queue
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Build a key from its parts
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{namespace}/{name}"))
    }

    /// Wrap a raw key without checking it; see [`ObjectKey::split`]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Split into `(namespace, name)`.
    ///
    /// Fails unless there is exactly one `/` with non-empty text on both sides.
    pub fn split(&self) -> Result<(&str, &str), Error> {
        match self.0.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok((ns, name))
            }
            _ => Err(Error::invalid_key(self.0.clone())),
        }
    }

    /// The raw key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
