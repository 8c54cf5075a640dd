//! Text chat over Eddystone service-data advertisements.
//!
//! [`session::BeaconSession`] drives a [`transport::BeaconTransport`]:
//! messages go out through [`codec::FrameCodec::encode`], and scan records
//! come back through [`session::BeaconSession::next`] as deduplicated
//! observations.

pub mod chat;
pub mod codec;
pub mod config;
pub mod error;
pub mod messages;
pub mod profile;
pub mod session;
pub mod settings;
pub mod transport;
