//! Typed per-session attributes.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// A typed key into an [`AttributeMap`].
///
/// Keys compare by name only; two keys with the same name and different value types
/// address the same slot, and a lookup with the wrong type simply misses.
pub struct AttributeKey<T> {
    name: Cow<'static, str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    /// A key with a static name, usable in `const` items.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            _marker: PhantomData,
        }
    }

    /// A key with a computed name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            _marker: PhantomData,
        }
    }

    /// The key's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeKey({})", self.name)
    }
}

/// Heterogeneous key/value store attached to a session.
#[derive(Default)]
pub struct AttributeMap {
    values: HashMap<Cow<'static, str>, Box<dyn Any + Send + Sync>>,
}

impl AttributeMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the value under `key`.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &AttributeKey<T>) -> Option<T> {
        self.values
            .get(key.name.as_ref())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Stores `value`, returning the previous value of the same type.
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &AttributeKey<T>, value: T) -> Option<T> {
        self.values
            .insert(key.name.clone(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Stores `value` only when the key is vacant. Returns `false` if it was occupied.
    pub fn set_if_absent<T: Send + Sync + 'static>(
        &mut self,
        key: &AttributeKey<T>,
        value: T,
    ) -> bool {
        if self.values.contains_key(key.name.as_ref()) {
            return false;
        }
        self.values.insert(key.name.clone(), Box::new(value));
        true
    }

    /// Returns the value under `key`, inserting `init()` first if vacant.
    ///
    /// A slot holding a value of another type is replaced.
    pub fn get_or_insert_with<T, F>(&mut self, key: &AttributeKey<T>, init: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = init();
        self.values.insert(key.name.clone(), Box::new(value.clone()));
        value
    }

    /// Removes and returns the value under `key`.
    pub fn remove<T: Send + Sync + 'static>(&mut self, key: &AttributeKey<T>) -> Option<T> {
        self.values
            .remove(key.name.as_ref())
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Whether any value is stored under the key's name.
    pub fn contains<T>(&self, key: &AttributeKey<T>) -> bool {
        self.values.contains_key(key.name.as_ref())
    }

    /// Names of all stored attributes.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_ref())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}
