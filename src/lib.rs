// Library exports for the server binary and integration tests
pub mod app;
pub mod clock;
pub mod config;
pub mod enrichment;
pub mod fingerprint;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod session;
pub mod sweeper;
pub mod token;
