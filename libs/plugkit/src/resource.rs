//! Type-erased values exchanged between modules.
//!
//! A provider hands out a [`Resource`] under a string key; consumers must name the
//! exact stored type to read it back. Values that travel between separately built
//! libraries can instead be stored in an encoded (JSON) form, which does not
//! depend on the two sides agreeing on type identity.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource conversion not allowed: {stored} to {requested}")]
    TypeMismatch {
        stored: &'static str,
        requested: &'static str,
    },
    /// The type names agree but the `TypeId`s do not. Only happens when host and
    /// plugin were built separately and each compiled its own copy of the type.
    #[error("resource of type {type_name} could not be recovered (type identity differs across module boundary)")]
    BadCast { type_name: &'static str },
    #[error("encoded resource of type {type_name} could not be converted")]
    Codec {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("resource '{key}' is not registered")]
    Missing { key: String },
}

enum Payload {
    Value(Box<dyn Any + Send + Sync>),
    Encoded(serde_json::Value),
}

/// A single value of some concrete type, remembered by name.
pub struct Resource {
    payload: Payload,
    type_name: &'static str,
}

impl Resource {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            payload: Payload::Value(Box::new(value)),
            type_name: type_name::<T>(),
        }
    }

    /// Store `value` in its serialized form.
    pub fn encoded<T: Serialize>(value: &T) -> Result<Self, ResourceError> {
        let json = serde_json::to_value(value).map_err(|source| ResourceError::Codec {
            type_name: type_name::<T>(),
            source,
        })?;
        Ok(Self {
            payload: Payload::Encoded(json),
            type_name: type_name::<T>(),
        })
    }

    /// Name of the type the resource was created from.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_encoded(&self) -> bool {
        matches!(self.payload, Payload::Encoded(_))
    }

    /// Borrow the stored value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Result<&T, ResourceError> {
        let requested = type_name::<T>();
        match &self.payload {
            Payload::Value(value) => {
                if requested != self.type_name {
                    return Err(ResourceError::TypeMismatch {
                        stored: self.type_name,
                        requested,
                    });
                }
                value.downcast_ref::<T>().ok_or(ResourceError::BadCast {
                    type_name: self.type_name,
                })
            }
            Payload::Encoded(_) => Err(ResourceError::TypeMismatch {
                stored: "encoded resource",
                requested,
            }),
        }
    }

    /// Copy the stored value out as `T`.
    ///
    /// Shared services are usually stored as `Arc<...>`, so the copy is a handle.
    pub fn get<T: Any + Clone>(&self) -> Result<T, ResourceError> {
        self.downcast_ref::<T>().cloned()
    }

    /// Deserialize an encoded resource as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ResourceError> {
        match &self.payload {
            Payload::Encoded(json) => {
                serde_json::from_value(json.clone()).map_err(|source| ResourceError::Codec {
                    type_name: type_name::<T>(),
                    source,
                })
            }
            Payload::Value(_) => Err(ResourceError::TypeMismatch {
                stored: self.type_name,
                requested: "encoded resource",
            }),
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("type_name", &self.type_name)
            .field("encoded", &self.is_encoded())
            .finish()
    }
}

/// Resources published during a resolution pass, keyed by resource key.
///
/// Append-only: the first value stored under a key stays.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: HashMap<String, Resource>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `resource` unless the key already holds a value.
    ///
    /// Returns `false` when the value was discarded.
    pub fn put(&mut self, key: impl Into<String>, resource: Resource) -> bool {
        let key = key.into();
        if let Some(existing) = self.entries.get(&key) {
            tracing::warn!(
                key = %key,
                kept = existing.type_name(),
                discarded = resource.type_name(),
                "Resource already registered; keeping the first value"
            );
            return false;
        }
        self.entries.insert(key, resource);
        true
    }

    pub fn get(&self, key: &str) -> Result<&Resource, ResourceError> {
        self.entries.get(key).ok_or_else(|| ResourceError::Missing {
            key: key.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}
