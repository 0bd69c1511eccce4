pub mod config;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod projection;
pub mod resource;
pub mod schema;
pub mod store;
pub mod tenant;
