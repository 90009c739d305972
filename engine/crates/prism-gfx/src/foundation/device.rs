use std::sync::Arc;

use ash::vk;
use slotmap::{Key, KeyData};

use crate::{
    basic::engine::GfxEngine,
    commands::{command_list::GfxRecordedList, queue::GfxWaitHandle},
    error::GfxResult,
    raytracing::inputs::GfxAccelerationInputs,
};

slotmap::new_key_type! {
    /// 设备内存对象
    pub struct GfxMemoryId;
    /// timeline fence
    pub struct GfxFenceId;
    /// command allocator，对应 D3D12 的 CommandAllocator 或 Vulkan 的 CommandPool
    pub struct GfxAllocatorId;
}

impl GfxMemoryId {
    /// 加速结构实例中引用 BLAS 使用的 64 位地址
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.data().as_ffi()
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        KeyData::from_ffi(raw).into()
    }
}

/// 内存所在的 heap，决定了 CPU 是否可以 map
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxMemoryHeap {
    /// 只有 GPU 可以访问
    DeviceLocal,
    /// CPU 写，GPU 读
    Upload,
    /// GPU 写，CPU 读
    Readback,
}

impl GfxMemoryHeap {
    #[inline]
    pub fn is_cpu_visible(self) -> bool {
        self != GfxMemoryHeap::DeviceLocal
    }
}

/// 驱动给出的加速结构尺寸估计
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GfxPrebuildInfo {
    pub result_size: u64,
    pub scratch_size: u64,
    pub update_scratch_size: u64,
}

/// 已经 map 的 CPU 可见内存
///
/// map 只发生一次，之后该对象在资源的整个生命周期内复用。
pub trait GfxMappedMemory: Send + Sync {
    fn size(&self) -> u64;

    fn write_bytes(&self, offset: u64, data: &[u8]) -> GfxResult<()>;

    fn read_bytes(&self, offset: u64, out: &mut [u8]) -> GfxResult<()>;
}

/// 注入到 GFX 层的设备
///
/// adapter 选择与特性探测属于环境初始化，不在这里处理；调用方构造好设备之后传入。
/// 任何设备层面的失败都以 `GfxError::DeviceLost` 返回。
pub trait GfxDevice: Send + Sync {
    fn adapter_name(&self) -> &str;

    // memory
    fn create_memory(&self, size: u64, heap: GfxMemoryHeap, debug_name: &str) -> GfxResult<GfxMemoryId>;

    fn release_memory(&self, memory: GfxMemoryId);

    fn map_memory(&self, memory: GfxMemoryId) -> GfxResult<Arc<dyn GfxMappedMemory>>;

    // sync
    fn create_fence(&self, initial_value: u64, debug_name: &str) -> GfxResult<GfxFenceId>;

    fn fence_completed_value(&self, fence: GfxFenceId) -> GfxResult<u64>;

    /// 在 engine 的 queue 上排入一个 signal，queue 上此前的工作全部完成之后 fence 到达 value
    fn signal_fence(&self, engine: GfxEngine, fence: GfxFenceId, value: u64) -> GfxResult<()>;

    /// 阻塞，直到所有 handle 都满足
    fn wait_fences(&self, handles: &[GfxWaitHandle]) -> GfxResult<()>;

    // commands
    fn create_command_allocator(&self, engine: GfxEngine, debug_name: &str) -> GfxResult<GfxAllocatorId>;

    /// 调用方需要保证该 allocator 录制的命令已经执行完毕
    fn reset_command_allocator(&self, allocator: GfxAllocatorId) -> GfxResult<()>;

    /// 按顺序执行 lists
    fn execute_command_lists(&self, engine: GfxEngine, lists: &[Arc<GfxRecordedList>]) -> GfxResult<()>;

    // ray tracing
    fn acceleration_structure_prebuild_info(
        &self,
        inputs: &GfxAccelerationInputs,
        flags: vk::BuildAccelerationStructureFlagsKHR,
    ) -> GfxPrebuildInfo;
}
