pub mod geometry;
pub mod inputs;
pub mod instance;
pub mod versioning;
