pub mod budget;
pub mod event_bus;
pub mod metrics;

pub use budget::*;
pub use event_bus::*;
pub use metrics::*;
