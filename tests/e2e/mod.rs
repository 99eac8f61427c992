//! End-to-end tests for tiny-updater.
//!
//! Every test runs full update cycles against a local release server:
//! a `wiremock` server for manifests and well-behaved artifacts, and raw
//! TCP servers for transfers that break off or stall.
//!
//! ## Running
//!
//! ```bash
//! cargo test --test e2e
//! RUST_LOG=tiny_updater=debug cargo test --test e2e -- --nocapture
//! ```


mod cycle_tests;
mod transfer_tests;
