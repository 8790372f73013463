//! Core domain: room lifecycle, credentials, and message relay

pub mod config;
pub mod credentials;
pub mod relay;
