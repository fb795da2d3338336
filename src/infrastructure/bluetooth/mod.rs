//! Bluetooth LE stack for the LED strip controller.
//!
//! - [`protocol`] — pure command/state codec and the wire constants.
//! - [`scanner`] — discovery session with de-duplication and auto-stop.
//! - [`connection`] — the GATT session state machine.
//! - [`throttle`] — conflating sampler for slider-driven brightness writes.
//! - [`transport`] — the platform transport boundary.
//! - [`btleplug_backend`] — production transport adapter.
//! - [`service`] — supervisor actor and the public handle.

pub mod btleplug_backend;
pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod throttle;
pub mod transport;

pub use connection::MAX_CONNECT_RETRIES;
pub use scanner::SCAN_WINDOW;
pub use service::StripService;
pub use throttle::SAMPLE_WINDOW;
