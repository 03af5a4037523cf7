//! Data models for the ClearPass API and web interface.
//!
//! This module contains the various data structures used on the wire.

// Export submodules
pub mod auth;
pub mod cookie;
pub mod reply;
