//! API exposures
//!
//! Each exposure consumes shared state from the host and produces a Router.

pub mod rest;
pub mod websocket;

pub use rest::RestExposure;
pub use websocket::WebSocketExposure;
