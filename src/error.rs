/// Errors reported by the reference-aware maps.
///
/// Every variant is a usage error: it is reported synchronously, never retried, and never caused
/// by reclamation itself. Reclamation is only ever visible as a key or value that is no longer
/// there.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The query cannot be answered meaningfully because the relevant side of the map is
    /// reclaimable. The entry may disappear between the check and any use of its answer, so the
    /// map refuses to give one.
    #[error("`{operation}` is ambiguous on a map whose values may be reclaimed at any time")]
    AmbiguousQuery {
        /// The rejected operation.
        operation: &'static str,
    },

    /// The operation cannot be given compare-and-swap semantics against concurrent reclamation,
    /// and is rejected instead of silently providing weaker guarantees.
    #[error("`{operation}` is not supported by concurrent reference maps")]
    Unsupported {
        /// The rejected operation.
        operation: &'static str,
    },
}

/// A `Result` whose error is [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
