pub mod param;
pub mod params;

pub use param::{Param, ParamType};
pub use params::Params;
