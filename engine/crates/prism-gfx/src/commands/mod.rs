pub mod barrier;
pub mod clear;
pub mod command;
pub mod command_allocator;
pub mod command_list;
pub mod queue;
