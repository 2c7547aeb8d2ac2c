pub mod indicators;
pub mod patterns;

pub use indicators::*;
pub use patterns::*;
