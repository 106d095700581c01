pub mod modes;
pub mod registry;
pub mod surface;

pub use modes::*;
pub use registry::*;
pub use surface::*;
