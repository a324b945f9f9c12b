// src/tests/mod.rs
//! End-to-end tests for the cache-then-resilient-call flow

mod client_tests;
