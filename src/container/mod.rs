pub mod exec;
pub mod manager;

pub use manager::{ContainerManager, ContainerStatus};
