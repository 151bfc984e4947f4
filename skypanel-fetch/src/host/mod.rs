//! Host APIs used by the session client.
//!
//! - [`http`] - Transport seam and the reqwest-backed client
//! - [`keychain`] - Secure credential storage (system keychain)

pub mod http;
pub mod keychain;

pub use http::{HttpClient, HttpRequest, HttpResponse, Method, Transport};
pub use keychain::{KeychainApi, MemoryKeychain, SystemKeychain};
