//! # kmsrand-core
//!
//! **Hardware-generated randomness from Cloud KMS, behind the usual Rust
//! randomness interfaces.**
//!
//! [`RandomByteSource`] wraps the key management service's
//! `generateRandomBytes` method. Every fill is one remote call answered by an
//! HSM. Nothing is cached, pooled, mixed, or retried locally.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::io::Read;
//! use kmsrand_core::{NumericSource, RandomByteSource, location_name};
//!
//! // Reads GOOGLE_OAUTH_ACCESS_TOKEN (and optionally KMSRAND_ENDPOINT)
//! let mut source = RandomByteSource::open(location_name("my-project", "us-east1"))?;
//!
//! let mut key = [0u8; 32];
//! source.read_exact(&mut key)?;
//!
//! let n = source.next_int63();
//! assert!(n >= 0);
//!
//! source.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Interfaces
//!
//! - [`std::io::Read`] on `RandomByteSource` and `&RandomByteSource`
//! - [`ByteFiller`] and [`NumericSource`] (`next_int63`, `next_uint64`,
//!   `reseed`, plus fallible `try_*` variants)
//! - [`rand::TryRngCore`] and [`rand::TryCryptoRng`]; use
//!   `source.unwrap_mut()` to drive any [`rand::Rng`] helper
//!
//! ## Numeric range
//!
//! Both `next_int63` and `next_uint64` draw uniformly from `[0, i64::MAX)`.
//! `next_uint64` therefore never sets the top bit. The raw `rand` methods
//! (`try_next_u64`) cover the full range.

pub mod client;
pub mod config;
pub mod error;
pub mod numeric;
pub mod protocol;
pub mod service;
pub mod source;

pub use client::KmsClient;
pub use config::{ACCESS_TOKEN_ENV, ClientOptions, DEFAULT_ENDPOINT, ENDPOINT_ENV};
pub use error::{BoxError, Error, RemoteError, Result};
pub use numeric::{ByteFiller, NumericSource, uniform_below};
pub use protocol::{
    GenerateRandomBytesRequest, GenerateRandomBytesResponse, MAX_REQUEST_LENGTH,
    MIN_REQUEST_LENGTH, ProtectionLevel, location_name,
};
pub use service::RandomService;
pub use source::RandomByteSource;

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
