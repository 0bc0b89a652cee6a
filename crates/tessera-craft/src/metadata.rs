//! Producer identity for rendered predicates.

/// The version of the `tessera-craft` crate (compile-time constant).
#[must_use]
pub const fn tessera_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Default builder identifier recorded in predicates.
///
/// Format: `tessera/{version}`.
#[must_use]
pub fn builder_id() -> String {
    format!("tessera/{}", tessera_version())
}
