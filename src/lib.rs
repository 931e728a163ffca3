#[macro_use]
extern crate tracing;

pub mod cache;
pub mod context;
pub mod daemon;
pub mod diff;
pub mod dns;
pub mod reconcile;
pub mod tunnel;
pub mod watch;
pub mod zones;
