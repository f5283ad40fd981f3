//! Request extractors.
//!
//! - [`auth::AuthUser`] -- the authenticated caller from a JWT.
//! - [`auth::RemoteAddr`] -- the peer address of the connection.

pub mod auth;
