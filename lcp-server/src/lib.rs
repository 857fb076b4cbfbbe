//! Readium LCP license and status server.
//!
//! Issues cryptographically signed, user-bound licenses for encrypted
//! publications and drives their lifecycle (register, renew, return,
//! revoke) through dynamically computed status documents.

pub mod config;
pub mod license;
pub mod store;
pub mod web;
