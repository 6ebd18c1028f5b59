//! Non-destructive ClientHello extraction.
//!
//! The peeker reads the first handshake flight of a new connection through a
//! tee, parses the ClientHello out of it and returns a [`PeekedStream`] that
//! replays those bytes before the rest of the connection. The TLS session
//! between client and backend is never touched.

pub mod client_hello;
pub mod peek;

pub use client_hello::{ClientHelloInfo, read_client_hello};
pub use peek::{DEFAULT_MAX_HELLO_BYTES, HelloPeeker, PeekedStream, peek_client_hello};
