//! Claims service: issues claim tokens, resolves lookups and deep links,
//! and redeems claims with first-committer-wins semantics.

pub mod claims;
pub mod config;
pub mod error;
pub mod server;
pub mod store;
