//! Client runtime for the batch-RPC protocol.
//!
//! [`codec`] encodes and decodes bodies, [`transport`] performs the HTTP
//! exchange, [`refresh`] recovers from expired credentials with a single
//! shared refresh, and [`poller`] waits for server-side jobs. [`RpcClient`]
//! ties them together.

pub mod client;
pub mod codec;
pub mod credentials;
pub mod poller;
pub mod refresh;
pub mod transport;
pub mod util;

pub use client::RpcClient;
pub use codec::{decode, decode_all, encode, encode_batch, RpcRequest};
pub use credentials::CredentialStore;
pub use poller::{wait_for_completion, wait_for_many, wait_with};
pub use refresh::{AuthRefreshCoordinator, CredentialRefresher};
pub use transport::RpcTransport;
