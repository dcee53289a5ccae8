//! The inbound resumable-upload HTTP surface (§4.3).

pub mod tus;

pub use tus::router;
