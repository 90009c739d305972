pub mod binding;
pub mod pipeline;
