pub mod metaimage;

pub use metaimage::{apply_to_stack, read_stack, write_stack, ExportSummary};
