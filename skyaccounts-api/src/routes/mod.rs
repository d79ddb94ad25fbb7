/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `users`: Registration, current user, tier changes
/// - `activity`: Paginated uploads and downloads, activity counts
/// - `track`: Recording uploads, downloads and registry accesses
/// - `stripe`: Billing provider webhook

pub mod activity;
pub mod health;
pub mod stripe;
pub mod track;
pub mod users;
