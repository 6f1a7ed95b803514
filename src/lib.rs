mod bucket;
mod context;
mod eval;
mod flag;
mod flag_value;
mod legacy;
mod memory_store;
mod store;
mod targeting;
mod test_common;
#[cfg(feature = "tracking")]
mod tracking;
mod util;
mod validation;

pub use bucket::*;
pub use context::*;
pub use eval::*;
pub use flag::*;
pub use flag_value::*;
pub use legacy::*;
pub use memory_store::*;
pub use store::*;
pub use targeting::*;
#[cfg(feature = "tracking")]
pub use tracking::*;
pub use validation::*;
