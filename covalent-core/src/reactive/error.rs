//! Runtime errors.

use thiserror::Error;

/// The engine's single failure mode.
///
/// `get` and `subscribe` are total. `set`, `update` and `reset` fail exactly
/// when the target atom was constructed from a compute closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AtomError {
    /// A write was attempted on a derived atom.
    #[error("cannot set value of derived atom")]
    DerivedWrite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_write_message() {
        assert_eq!(
            AtomError::DerivedWrite.to_string(),
            "cannot set value of derived atom"
        );
    }
}
