//! Resource families: the descriptor table and one generic client that
//! covers list, get, create, update, delete and named transitions for all of them.

pub mod actions;
mod client;
pub mod descriptor;
mod page;
pub mod sanitize;

pub use client::ResourceClient;
pub use descriptor::{Resource, ResourceDescriptor, Transition};
pub use page::{ListQuery, Page};
