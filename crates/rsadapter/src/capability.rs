//! Vendor interface capabilities.
//!
//! Applications reach driver-specific APIs through [`Connection::unwrap`]. A
//! vendor type must be registered on the factory's [`CapabilityRegistry`]
//! first; the returned [`VendorInterface`] then resolves the handle's current
//! physical connection on every call, so it keeps working after the handle
//! moves to another managed connection.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::connection::Connection;
use crate::driver::DriverConnection;
use crate::state::WrapperKind;
use crate::{Error, Result};

type Probe = fn(&mut dyn DriverConnection) -> bool;

fn implemented_by<T: Any>(connection: &mut dyn DriverConnection) -> bool {
    connection.as_any_mut().is::<T>()
}

/// A registered vendor interface.
#[derive(Clone, Copy)]
pub struct Capability {
    name: &'static str,
    probe: Probe,
}

impl Capability {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether `connection` implements this interface.
    pub fn is_implemented_by(&self, connection: &mut dyn DriverConnection) -> bool {
        (self.probe)(connection)
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Vendor interfaces applications may unwrap to.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<TypeId, Capability>>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow unwrapping to the driver connection type `T`.
    pub fn register<T: Any>(&self, name: &'static str) {
        let capability = Capability {
            name,
            probe: implemented_by::<T>,
        };
        self.entries.write().insert(TypeId::of::<T>(), capability);
        tracing::debug!(interface = name, "vendor interface registered");
    }

    #[must_use]
    pub fn is_registered<T: Any>(&self) -> bool {
        self.entries.read().contains_key(&TypeId::of::<T>())
    }

    #[must_use]
    pub fn lookup(&self, type_id: TypeId) -> Option<Capability> {
        self.entries.read().get(&type_id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.entries.read().values().map(|c| c.name).collect();
        f.debug_struct("CapabilityRegistry")
            .field("interfaces", &names)
            .finish()
    }
}

/// Per-handle cache entry backing every [`VendorInterface`] of one type.
#[derive(Debug)]
pub(crate) struct AdapterSlot {
    name: &'static str,
    closed: AtomicBool,
}

impl AdapterSlot {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) const fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::Release);
    }
}

/// Forwarding adapter to a vendor driver type.
pub struct VendorInterface<T: Any> {
    connection: Connection,
    slot: Arc<AdapterSlot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any> VendorInterface<T> {
    pub(crate) const fn new(connection: Connection, slot: Arc<AdapterSlot>) -> Self {
        Self {
            connection,
            slot,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.slot.name()
    }

    /// Closed when the handle closed, or when it was reassociated with a
    /// physical connection that does not implement `T`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }

    /// Run `f` against the handle's current physical connection.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        self.connection.activate()?;
        let mut core = self.connection.core.lock();
        if self.slot.is_closed() {
            return Err(Error::closed(WrapperKind::VendorInterface));
        }
        if core.config().begin_tran_for_vendor_apis {
            core.begin_transaction_if_necessary()?;
        }

        let physical = core.physical()?;
        let mut driver = physical.lock();
        driver
            .as_any_mut()
            .downcast_mut::<T>()
            .map(f)
            .ok_or_else(|| Error::not_supported(self.slot.name()))
    }
}

impl<T: Any> Clone for VendorInterface<T> {
    fn clone(&self) -> Self {
        Self::new(self.connection.clone(), Arc::clone(&self.slot))
    }
}

impl<T: Any> fmt::Debug for VendorInterface<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorInterface")
            .field("interface", &self.slot.name())
            .field("handle", &self.connection.id())
            .field("closed", &self.slot.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnection, MockDriver};

    #[test]
    fn test_register_and_probe() {
        let registry = CapabilityRegistry::new();
        assert!(registry.is_empty());

        registry.register::<MockConnection>("MockConnection");
        assert!(registry.is_registered::<MockConnection>());
        assert!(!registry.is_registered::<String>());

        let capability = registry.lookup(TypeId::of::<MockConnection>()).unwrap();
        let mut conn = MockDriver::new().connection();
        assert!(capability.is_implemented_by(conn.as_mut()));
        assert_eq!(capability.name(), "MockConnection");
    }

    #[test]
    fn test_adapter_slot_flag() {
        let slot = AdapterSlot::new("X");
        assert!(!slot.is_closed());
        slot.set_closed(true);
        assert!(slot.is_closed());
    }
}
