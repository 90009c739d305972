//! Prism 的 GPU 调度层
//!
//! [`scheduler::GpuScheduler`] 接收 process（一段录制工作），同步地在 submitter 线程录制，
//! 或者交给 worker 线程池异步录制；`flush_and_signal` 把所有录制好的 command list 按 engine
//! 批量提交，并返回一个 [`signal::GpuSignal`]。`setup_frame` / `finish_frame` 在此基础上
//! 实现帧流水线，同时在飞的帧数不超过 buffering 深度。

pub mod context;
pub mod process;
pub mod scheduler;
pub mod settings;
pub mod signal;

mod recorder;
mod worker;

pub use prism_gfx::{GfxError, GfxResult};
