//! # Auth Module
//!
//! This module handles the operator's session:
//! - Password sign-in and sign-out against the auth provider
//! - The process-wide `SessionStore` and its auth-event handler
//! - Profile and role loading after sign-in
//! - Session snapshot route for the console shell

pub mod handlers;
pub mod models;
pub mod routes;
pub mod session;

#[cfg(test)]
mod tests;

pub use routes::auth_routes;
pub use session::SessionStore;
