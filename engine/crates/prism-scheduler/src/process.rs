use prism_gfx::{GfxResult, basic::engine::GfxEngine};

use crate::context::GpuCommandContext;

/// 一段录制工作
///
/// 调度器在 `required_engine` 对应的 command list 上调用一次 `record`，
/// 同步 process 在 submitter 线程上录制，异步 process 在某个 worker 线程上录制。
pub trait GpuProcess: Send {
    fn required_engine(&self) -> GfxEngine;

    fn record(&mut self, context: &mut GpuCommandContext<'_>) -> GfxResult<()>;
}

/// 使用闭包作为 process
pub fn from_fn<F>(engine: GfxEngine, f: F) -> GpuFnProcess<F>
where
    F: FnMut(&mut GpuCommandContext<'_>) -> GfxResult<()> + Send,
{
    GpuFnProcess { engine, f }
}

pub struct GpuFnProcess<F> {
    engine: GfxEngine,
    f: F,
}

impl<F> GpuProcess for GpuFnProcess<F>
where
    F: FnMut(&mut GpuCommandContext<'_>) -> GfxResult<()> + Send,
{
    fn required_engine(&self) -> GfxEngine {
        self.engine
    }

    fn record(&mut self, context: &mut GpuCommandContext<'_>) -> GfxResult<()> {
        (self.f)(context)
    }
}

impl<P: GpuProcess + ?Sized> GpuProcess for Box<P> {
    fn required_engine(&self) -> GfxEngine {
        (**self).required_engine()
    }

    fn record(&mut self, context: &mut GpuCommandContext<'_>) -> GfxResult<()> {
        (**self).record(context)
    }
}
