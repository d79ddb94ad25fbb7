/// Billing integration
///
/// Keeps user tiers synchronized with the billing provider in both
/// directions: inbound subscription events are reconciled into the user
/// record, and tier changes made through the service are pushed to the
/// provider with a compensating revert.
///
/// # Modules
///
/// - `plans`: plan to tier catalog
/// - `events`: webhook event parsing and classification
/// - `ports`: storage and provider traits, plus the PostgreSQL user store
/// - `stripe`: HTTP client for the billing provider
/// - `reconciler`: applies subscription state to users
/// - `tier_sync`: tier assignment saga and customer creation
/// - `webhook`: signature verification and event dispatch

pub mod events;
pub mod plans;
pub mod ports;
pub mod reconciler;
pub mod stripe;
pub mod tier_sync;
pub mod webhook;

pub use plans::PlanCatalog;
pub use reconciler::{ReconcileOutcome, SubscriptionReconciler};
pub use tier_sync::TierSync;
pub use webhook::WebhookProcessor;
