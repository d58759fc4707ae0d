//! Quill federated mailbox server
//!
//! A server for the Quill messaging protocol. Clients exchange JSON
//! packets with the server over a persistent TLS stream; each server
//! owns one domain and delivers messages for other domains to the peer
//! server that owns them.
//!
//! The pieces, leaf first:
//!
//! - [`protocol`]: the packet envelope, payloads and streaming codec
//! - [`routing`]: internal sends and inbound federated deliveries
//! - [`fetch`]: paginated thread and folder queries
//! - [`federation`]: outbound delivery to peer servers
//! - [`dispatch`] and [`server`]: the per-connection request loop
//!
//! Credential checks and durable storage sit behind the [`Authenticator`]
//! and [`storage`] traits. In-memory implementations are provided for
//! development and tests.

pub mod accounts;
mod address;
pub mod auth;
mod client;
mod config;
pub mod connection;
pub mod dispatch;
mod error;
pub mod federation;
pub mod fetch;
mod folder;
pub mod model;
pub mod protocol;
pub mod routing;
pub mod server;
pub mod storage;
pub mod tls;

pub use address::Address;
pub use auth::{AuthenticatedIdentity, Authenticator, StaticTokenAuthenticator};
pub use client::QuillClient;
pub use config::{ClientConfig, PeerConfig, ServerConfig, TlsTrust};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use federation::{Federation, FederationClient, PeerDirectory};
pub use folder::Folder;
pub use server::{Listener, Server};
pub use storage::Storage;
