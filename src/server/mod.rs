//! HTTP server layer for thumbkey.
//!
//! A thin adapter over the resolution service: handlers route the path to a
//! source, call the matching [`Resolver`](crate::service::Resolver)
//! operation, and map [`ServiceError`](crate::error::ServiceError) kinds to
//! status codes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │             GET | POST | PUT | DELETE  /{key}                   │
//! │                                                                 │
//! │  ┌─────────────────────────┐      ┌──────────────────────────┐  │
//! │  │        handlers         │      │         routes           │  │
//! │  │ (requests, error JSON)  │      │ (router, CORS, tracing)  │  │
//! │  └─────────────────────────┘      └──────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    create_handler, delete_handler, health_handler, image_handler, replace_handler, AppState,
    ErrorResponse, HandlerError, HealthResponse, MutationResponse, CACHE_HIT_HEADER,
};
pub use routes::{create_router, RouterConfig};
