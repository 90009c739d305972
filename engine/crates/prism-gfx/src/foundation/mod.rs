pub mod device;
pub mod soft_device;
