pub mod engine;
pub mod format;
