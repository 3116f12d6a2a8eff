//! Reference-counted registry of resources shared between processor duplicates.
//!
//! The first duplicate to acquire a key opens the resource; later duplicates
//! get another lease on the same instance. The resource is dropped when the
//! last lease is released, whichever duplicate holds it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{LookupError, Result};

struct Slot {
    resource: Arc<dyn Any + Send + Sync>,
    leases: usize,
    owner: usize,
}

#[derive(Clone, Default)]
pub struct ResourceRegistry {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.lock();
        f.debug_struct("ResourceRegistry")
            .field("keys", &slots.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lease the resource stored under `key`, opening it with `open` if no
    /// duplicate holds it yet.
    ///
    /// The check and the open happen under one lock, so concurrent
    /// duplicates never open the same resource twice.
    pub fn acquire<T, F>(&self, key: &str, duplicate: usize, open: F) -> Result<Lease<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T>,
    {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(key) {
            let resource = Arc::clone(&slot.resource)
                .downcast::<T>()
                .map_err(|_| {
                    LookupError::Config(format!(
                        "shared resource '{}' was opened with a different type",
                        key
                    ))
                })?;
            slot.leases += 1;
            debug!(
                "Duplicate {} reuses '{}' opened by duplicate {} ({} leases)",
                duplicate, key, slot.owner, slot.leases
            );
            return Ok(Lease {
                resource,
                key: key.to_string(),
                owner: slot.owner,
                registry: self.clone(),
            });
        }

        let resource = Arc::new(open()?);
        slots.insert(
            key.to_string(),
            Slot {
                resource: resource.clone(),
                leases: 1,
                owner: duplicate,
            },
        );
        debug!("Duplicate {} opened shared resource '{}'", duplicate, key);
        Ok(Lease {
            resource,
            key: key.to_string(),
            owner: duplicate,
            registry: self.clone(),
        })
    }

    pub fn is_open(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn lease_count(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, |slot| slot.leases)
    }

    fn release(&self, key: &str) {
        let mut slots = self.lock();
        let remove = match slots.get_mut(key) {
            Some(slot) => {
                slot.leases -= 1;
                slot.leases == 0
            }
            None => false,
        };
        if remove {
            slots.remove(key);
            debug!("Closed shared resource '{}'", key);
        }
    }
}

/// A scoped reference to a shared resource, released on drop.
pub struct Lease<T> {
    resource: Arc<T>,
    key: String,
    owner: usize,
    registry: ResourceRegistry,
}

impl<T> Lease<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Index of the duplicate that opened the resource.
    pub fn owner(&self) -> usize {
        self.owner
    }
}

impl<T> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

impl<T> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .finish()
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}
