//! Data-access layer for a multi-tenant business-management API.
//!
//! - Session store with durable persistence and single-flight token renewal
//! - Authenticated dispatcher with transport retry and response classification
//! - One generic client covering every resource family
//! - Query cache with stale-while-revalidate reads and mutation invalidation

pub mod auth;
pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod http;
pub mod logging;
pub mod query;
pub mod resources;
pub mod session;

pub use auth::{AuthClient, Registration};
pub use config::Config;
pub use data::DataClient;
pub use error::ApiError;
pub use query::{Query, QueryState};
pub use resources::{ListQuery, Page, Resource};
