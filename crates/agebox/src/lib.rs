//! agebox - age encrypted secret files inside a repository
//!
//! Secrets live next to the code that needs them as `<id>.agebox` files.
//! A registry records which ids are tracked. Operations resolve raw ids,
//! load keys once and then process every secret independently, reporting
//! per-secret failures together.

pub mod cancel;
pub mod encrypt;
pub mod error;
pub mod model;
pub mod ops;
pub mod process;
pub mod storage;

pub use cancel::CancellationToken;
pub use encrypt::{AgeEncrypter, Encrypter};
pub use error::{AggregateError, BoxError, SecretFailure, Stage};
pub use model::{PrivateKeyList, PublicKeyList, Secret, SecretRegistry};
