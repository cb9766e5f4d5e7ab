//! TCP data channel between a sender and a host-addressable receiver.
//!
//! One connection carries any number of requests. After a token handshake
//! each request is a length-prefixed JSON envelope, followed by raw part
//! bytes for `put_part`; each response is a single envelope.
//!
//! # Wire format
//!
//! See the [`wire`] module for the frame layout.

pub mod client;
pub mod error;
pub mod server;
pub mod token;
pub mod wire;

pub use client::HostConnection;
pub use error::DataChannelError;
pub use server::HostReceiver;
pub use token::{generate_token, is_well_formed, validate_token};

use std::time::Duration;

/// TCP read/write buffer size (256 KB).
pub const TCP_BUFFER_SIZE: usize = 256 * 1024;

/// Timeout for the TCP connection attempt.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the authentication handshake.
pub const TCP_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle time after which the receiver drops a silent connection.
pub const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
