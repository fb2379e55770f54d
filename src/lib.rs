// A WebRTC to SIP signaling gateway
pub type Result<T> = std::result::Result<T, crate::error::Error>;
pub use crate::error::Error;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod relay;
pub mod sdp;
pub mod sip;
pub mod transaction;
pub mod transport;
pub use config::GatewayConfig;
pub use engine::SignalingEngine;
pub use hub::BrowserHub;
