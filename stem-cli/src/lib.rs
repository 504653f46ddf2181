//! # stem-cli — command-line probe client
//!
//! Loads a TOML configuration, connects to a server with
//! [`stem_core::Client`], sends one request or notify and prints the
//! messages that come back.

pub mod config;
