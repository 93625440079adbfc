//! [`ServiceRegistry`] — feature modules attached to a session, by type.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

// ---

use mwhost_domain::{EngineEvent, HostError, Result, ServicePtr, ServiceType};

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ServiceRegistry {
    // ---
    services: Mutex<BTreeMap<ServiceType, ServicePtr>>,
}

// ---

impl ServiceRegistry {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    // ---

    /// Register `service` under its own type. Refuses a second service of
    /// the same type.
    pub fn add(&self, service: ServicePtr) -> Result<()> {
        // ---
        let ty = service.service_type();
        let mut services = self.lock();
        if services.contains_key(&ty) {
            return Err(HostError::ServiceExists(ty));
        }
        tracing::debug!(service = service.name(), %ty, "service registered");
        services.insert(ty, service);
        Ok(())
    }

    // ---

    pub fn get(&self, ty: ServiceType) -> Option<ServicePtr> {
        self.lock().get(&ty).cloned()
    }

    // ---

    pub fn remove(&self, ty: ServiceType) -> Option<ServicePtr> {
        self.lock().remove(&ty)
    }

    // ---

    /// Registered types, ascending.
    pub fn types(&self) -> Vec<ServiceType> {
        self.lock().keys().copied().collect()
    }

    // ---

    /// Route one engine event. Conversation and message events go to the
    /// service they name; session-wide events go to every service.
    ///
    /// Targets are cloned out first so services may call back into the
    /// registry (or the session) from `on_event`.
    pub fn dispatch(&self, event: &EngineEvent) {
        // ---
        let targets: Vec<ServicePtr> = match event.service_type() {
            Some(ty) => self.get(ty).into_iter().collect(),
            None => self.lock().values().cloned().collect(),
        };

        if targets.is_empty() {
            tracing::trace!(?event, "no service for engine event");
        }

        for service in targets {
            service.on_event(event);
        }
    }

    // ---

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ServiceType, ServicePtr>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
