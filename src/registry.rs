//! Display name registry
//!
//! Set of names currently claimed by registered connections. Names are
//! compared byte for byte: no case folding, no normalization.

use std::collections::HashSet;

use crate::error::AppError;

#[derive(Debug, Default)]
pub struct NameRegistry {
    names: HashSet<String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Claim a name
    ///
    /// Fails with `NameConflict` if another connection holds it.
    pub fn claim(&mut self, name: &str) -> Result<(), AppError> {
        if self.names.contains(name) {
            return Err(AppError::NameConflict(name.to_string()));
        }
        self.names.insert(name.to_string());
        Ok(())
    }

    /// Release a name; no-op if it is not claimed
    pub fn release(&mut self, name: &str) -> bool {
        self.names.remove(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
