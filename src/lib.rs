pub mod config;
pub mod filter;
pub mod hook;
pub mod intercept;
pub mod paths;
pub mod query;
pub mod session;
pub mod store;
