//! Prism GFX 层
//!
//! 对 GPU 设备做一层后端无关的抽象：队列与 timeline fence、描述符堆、资源与 view、
//! 资源状态追踪（barrier 插入与 staging 资源）、命令录制，以及加速结构的版本管理。
//!
//! 设备通过 [`foundation::device::GfxDevice`] 注入，所有对象通过 [`gfx_context::GfxContext`]
//! 共享同一个设备与描述符堆。[`foundation::soft_device::GfxSoftDevice`] 是一个在 CPU 上
//! 真正执行命令的参考设备。

pub mod basic;
pub mod commands;
pub mod descriptors;
pub mod error;
pub mod foundation;
pub mod gfx_context;
pub mod pipelines;
pub mod raytracing;
pub mod resources;

pub use error::{GfxError, GfxResult};
