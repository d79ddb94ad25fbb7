//! # Skynet Accounts API Server Library
//!
//! HTTP surface of the accounts service: registration, tier changes,
//! activity tracking and history, and the billing webhook.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `routes`: API route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod routes;
