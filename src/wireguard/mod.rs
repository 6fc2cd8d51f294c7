//! WireGuard module
//!
//! - `keygen`: Curve25519 key pairs, secret key handling and validation
//! - `config`: Client configuration file generator

pub mod config;
pub mod keygen;

pub use config::{config_filename, synthesize, ClientConfigOptions, ServerEndpoint};
pub use keygen::{validate_private_key, SecretKey, WgKeyPair};
