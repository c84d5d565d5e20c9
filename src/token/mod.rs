//! Capability Token Module
//!
//! Read access to a workflow is granted by a signed, time-limited token
//! instead of a session or API key. The engine keeps no record of the
//! tokens it issues; a token is valid if its signature verifies and its
//! expiry has not passed.
//!
//! - [`manager`]: key generation, signing and verification
//! - [`wire`]: the protobuf messages carried inside a token

pub mod manager;
pub mod wire;

pub use manager::{TokenManager, TOKEN_PREFIX, TOKEN_VERSION};
