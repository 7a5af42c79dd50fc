//! Resolution service.
//!
//! Ties stores, the key grammar and the processing engine together:
//!
//! ```text
//!                 request path
//!                      │
//!                      ▼
//!               ┌─────────────┐
//!               │  SourceMap  │  picks the source (first segment when
//!               └──────┬──────┘  several are configured)
//!                      ▼
//!               ┌─────────────┐   hit   ┌─────────────┐
//!               │  Resolver   │────────▶│ cache store │
//!               └──────┬──────┘         └─────────────┘
//!                miss  │  single-flight per request key
//!                      ▼
//!   ┌──────────────┐  fetch   ┌──────────────┐  put   ┌─────────────┐
//!   │ source store │─────────▶│   pipeline   │───────▶│ cache store │
//!   └──────────────┘          │  (blocking)  │        └─────────────┘
//!                             └──────────────┘
//! ```
//!
//! Mutations (POST, PUT, DELETE) only touch the source store, then delete
//! every cached artifact matched by the source's thumbnail mask.

mod flight;
mod resolver;
mod sources;

pub use flight::{Leader, Role, SingleFlight, Waiter};
pub use resolver::{CacheStatus, Resolved, Resolver};
pub use sources::{build_engine, build_resolvers, build_store, SourceMap};
