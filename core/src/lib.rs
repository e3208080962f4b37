//! pitchside-core: live sports-telemetry pipeline.
//!
//! A simulated match produces per-athlete sensor records every tick.
//! Records go out on a publish/subscribe bus and into a per-run SQLite
//! table; a relay republishes a position-only view, and an aggregation
//! pass reduces a run to per-athlete performance metrics.
//!
//! Data flow:
//!   driver  -> generator -> bus `<root>/{id}/sensors` + run store
//!   relay   : `<root>/{id}/sensors` -> `<root>/{id}/sensors/coordinates`
//!   selector -> aggregation -> `<root>/{id}/realtime/*`

pub mod aggregation;
pub mod bus;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod generator;
pub mod record;
pub mod relay;
pub mod rng;
pub mod role;
pub mod selector;
pub mod store;
pub mod types;
