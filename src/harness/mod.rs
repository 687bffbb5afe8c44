pub mod render;
pub mod source_index;

pub use render::{render, HarnessBundle, HarnessLayout, STUBS_FILE, TARGET_ERROR_SUFFIX, TARGET_MARKER};
pub use source_index::{SourceFile, SourceIndex};
