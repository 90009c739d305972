pub mod desc;
pub mod footprint;
pub mod resource;
pub mod staging;
pub mod state_tracker;
pub mod view;
