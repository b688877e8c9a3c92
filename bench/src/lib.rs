//! Benchmark utilities for the Quasar component store.
//!
//! This crate provides the shared fixtures for the store benchmarks:
//!
//! - **Microbenchmarks**: Individual store operation performance (alloc, free, get, iterate)
//! - **Churn scenarios**: Seeded random alloc/free traffic approximating per-frame turnover
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p quasar_bench
//!
//! # Run specific benchmark group
//! cargo bench -p quasar_bench -- alloc
//! ```
//!
//! Results are written to `target/criterion/` with HTML reports for visualization.

pub mod components;
