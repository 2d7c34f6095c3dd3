//! Per-run network switch.
//!
//! Network-capable host callables hold a clone of the run's guard and call
//! `ensure_enabled` before any I/O. The orchestrator only ever enables the
//! guard through `scope`, whose drop disables it again on every exit path.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default)]
pub struct NetworkGuard {
    enabled: Rc<Cell<bool>>,
}

impl NetworkGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) {
        self.enabled.set(true);
    }

    pub fn disable(&self) {
        self.enabled.set(false);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn ensure_enabled(&self, method: &str) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(Error::NetworkDisabled {
                method: method.to_string(),
            })
        }
    }

    /// Enables the guard until the returned scope is dropped.
    #[must_use = "the guard is disabled as soon as the scope is dropped"]
    pub fn scope(&self) -> NetworkScope {
        self.enable();
        NetworkScope {
            guard: self.clone(),
        }
    }
}

pub struct NetworkScope {
    guard: NetworkGuard,
}

impl Drop for NetworkScope {
    fn drop(&mut self) {
        self.guard.disable();
    }
}
