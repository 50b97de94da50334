//! Per-connection attribute store.
//!
//! `AttributeStore` is the only place connection-scoped mutable state may
//! live. Values are type-erased behind `Box<dyn Any + Send>` and keyed by a
//! string [`AttributeKey`]; decoders key their contexts by filter name.

use std::{any::Any, borrow::Cow, collections::HashMap};

/// Key under which an attribute is stored.
pub type AttributeKey = Cow<'static, str>;

/// Key-value map owned by one connection (or one message).
///
/// # Examples
///
/// ```
/// use wirechain::connection::AttributeStore;
///
/// let mut store = AttributeStore::default();
/// store.insert("user", String::from("ada"));
/// assert_eq!(store.get::<String>("user").map(String::as_str), Some("ada"));
/// assert!(store.get::<u32>("user").is_none());
/// ```
#[derive(Default)]
pub struct AttributeStore {
    values: HashMap<AttributeKey, Box<dyn Any + Send>>,
}

impl AttributeStore {
    /// Insert `value` under `key`, replacing any previous value.
    ///
    /// Returns `true` when a previous value was replaced.
    pub fn insert<T>(&mut self, key: impl Into<AttributeKey>, value: T) -> bool
    where
        T: Send + 'static,
    {
        self.values.insert(key.into(), Box::new(value)).is_some()
    }

    /// Borrow the value under `key` if it has type `T`.
    #[must_use]
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Mutably borrow the value under `key` if it has type `T`.
    pub fn get_mut<T: 'static>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Remove and return the value under `key` if it has type `T`.
    ///
    /// A value of another type is left in place.
    pub fn take<T: 'static>(&mut self, key: &str) -> Option<T> {
        if !self.values.get(key).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        self.values
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Remove the value under `key` regardless of type.
    pub fn remove(&mut self, key: &str) -> bool { self.values.remove(key).is_some() }

    /// Whether a value is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool { self.values.contains_key(key) }

    /// Number of stored attributes.
    #[must_use]
    pub fn len(&self) -> usize { self.values.len() }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    /// Drop every attribute.
    pub fn clear(&mut self) { self.values.clear(); }
}

impl std::fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}
