pub mod marker;
pub mod normalize;
pub mod record;
pub mod validation;

pub use marker::*;
pub use normalize::*;
pub use record::*;
pub use validation::*;
