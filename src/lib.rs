//! Syncrelay - Real-time Collaboration Relay
//!
//! A standalone relay server for collaborative sessions: one host and a set
//! of guests per room, admission via signed capability claims, and message
//! routing over WebSocket or length-prefixed TCP.

pub mod core;
