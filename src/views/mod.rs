// src/views/mod.rs
//! The console's screens: one module per view, all gated through `crate::gate`.

pub mod admin_users;
pub mod communications;
pub mod dashboard;
pub mod incidents;
pub mod live;
pub mod models;
pub mod routes;
pub mod threats;
pub mod validators;


pub use routes::views_routes;
