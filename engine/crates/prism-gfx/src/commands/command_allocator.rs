use std::sync::{Arc, Mutex};

use crate::{
    basic::engine::GfxEngine,
    commands::command_list::GfxRecordedList,
    error::GfxResult,
    foundation::device::{GfxAllocatorId, GfxDevice},
};

/// 一帧、一个 engine、一个线程使用的命令内存
///
/// 提交之后 GPU 仍然会读取 list 的内容，所以 close 的 list 会一直保留到下一次 reset。
/// reset 只能在该帧的 signal 完成之后调用。
pub struct GfxCommandAllocator {
    id: GfxAllocatorId,
    engine: GfxEngine,
    device: Arc<dyn GfxDevice>,

    retired_lists: Mutex<Vec<Arc<GfxRecordedList>>>,

    debug_name: String,
}
// new & init
impl GfxCommandAllocator {
    pub fn new(device: Arc<dyn GfxDevice>, engine: GfxEngine, debug_name: &str) -> GfxResult<Self> {
        let id = device.create_command_allocator(engine, debug_name)?;
        Ok(Self {
            id,
            engine,
            device,
            retired_lists: Mutex::new(Vec::new()),
            debug_name: debug_name.to_string(),
        })
    }
}
// getters
impl GfxCommandAllocator {
    #[inline]
    pub fn id(&self) -> GfxAllocatorId {
        self.id
    }

    #[inline]
    pub fn engine(&self) -> GfxEngine {
        self.engine
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn retired_count(&self) -> GfxResult<usize> {
        Ok(self.retired_lists.lock()?.len())
    }
}
// tools
impl GfxCommandAllocator {
    pub(crate) fn retain(&self, list: Arc<GfxRecordedList>) -> GfxResult<()> {
        self.retired_lists.lock()?.push(list);
        Ok(())
    }

    /// 回收所有命令内存，之后可以重新录制
    pub fn reset(&self) -> GfxResult<()> {
        let _span = tracy_client::span!("GfxCommandAllocator::reset");

        self.device.reset_command_allocator(self.id)?;
        self.retired_lists.lock()?.clear();
        Ok(())
    }
}
