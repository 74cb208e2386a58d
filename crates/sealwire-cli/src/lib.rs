//! `sealwire` CLI Library
//!
//! Terminal front end for the encrypted API client: key exchange,
//! login/logout, one-off requests and key management.

pub mod auth_cmd;
pub mod connection;
pub mod keys_cmd;
pub mod request_cmd;
