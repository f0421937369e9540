// src/tests/mod.rs
//! Limiter-level tests spanning algorithms, stores and policies
