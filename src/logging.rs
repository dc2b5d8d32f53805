//! Helper macros enforcing consistent supervisor log fields.
//!
//! These macros keep the `node` field (and optionally `role`) present on every log
//! emitted from the reconciliation layer so downstream parsing can rely on them.

/// Log an event for a supervised node plus any extra fields.
#[macro_export]
macro_rules! node_event {
    ($level:ident, $event:expr, node = $node:expr, role = $role:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            event = $event,
            node = %$node,
            role = %$role,
            $($field = %$value,)*
        )
    };
    ($level:ident, $event:expr, node = $node:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            event = $event,
            node = %$node,
            $($field = %$value,)*
        )
    };
}
