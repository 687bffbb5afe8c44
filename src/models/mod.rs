pub mod location;
pub mod spec;
pub mod plan;
pub mod build;
pub mod execution;
pub mod verdict;
pub mod trace;

pub use location::*;
pub use spec::*;
pub use plan::*;
pub use build::*;
pub use execution::*;
pub use verdict::*;
pub use trace::*;
