//! Box operations
//!
//! Each operation is a small service built from the capabilities it needs.
//! All of them share the same failure rules: ids are resolved first, an
//! empty scope fails the request, shared material is loaded once and its
//! failure stops everything, per-secret failures are collected.

pub mod batch;
pub mod cat;
pub mod decrypt;
pub mod encrypt;
pub mod reencrypt;
pub mod track;
pub mod validate;

pub use decrypt::{DecryptBoxRequest, DecryptReport};
pub use encrypt::EncryptBoxRequest;
pub use reencrypt::ReencryptBoxRequest;
pub use track::UntrackBoxRequest;
pub use validate::ValidateBoxRequest;
