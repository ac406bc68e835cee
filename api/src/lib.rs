// Module layout (Clean Architecture style)
// - bootstrap: configuration and startup
// - infrastructure: Redis/object storage/DB/CRDT adapters
// - presentation: HTTP/WS handlers and routing
// - application: ports, services and the client session protocol
// - domain: core models

pub mod application;
pub mod bootstrap;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

#[cfg(test)]
pub(crate) mod test_support;
