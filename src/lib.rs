// Credential encryption engine and envelope codec
pub mod crypto;

// Per-user token table with quarantine and durable snapshots
pub mod store;

// Fixed-window attempt limiting
pub mod rate_limit;

// Provider probe contracts and validity dispatch
pub mod validity;

// Configuration and master-secret loading
pub mod config;

// Service facade wiring vault, dispatcher and limiter
pub mod service;
