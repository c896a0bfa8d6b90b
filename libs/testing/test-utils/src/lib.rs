//! Shared test infrastructure
//!
//! - `TestRedis`: throwaway Redis container, removed on drop (feature: "redis")
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! Container-backed tests need a Docker daemon. Mark them
//! `#[ignore = "requires Docker"]` and run them with `cargo test -- --ignored`.

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;
