//! ID generation utilities.

use ulid::Ulid;
use uuid::Uuid;

/// ID generator for evidence reports and poll cycles.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based ID, used for evidence references.
    ///
    /// Lowercase so the value survives case-insensitive page edits.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate a time-ordered UUID v7 identifying one poll cycle.
    #[must_use]
    pub fn generate_run_id(&self) -> String {
        Uuid::now_v7().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ulid() {
        let id_gen = IdGenerator::new();
        let id1 = id_gen.generate();
        let id2 = id_gen.generate();

        assert_eq!(id1.len(), 26);
        assert_ne!(id1, id2);
        assert_eq!(id1, id1.to_lowercase());
    }

    #[test]
    fn test_generate_run_id() {
        let id = IdGenerator::new().generate_run_id();
        assert_eq!(id.len(), 36);
    }
}
