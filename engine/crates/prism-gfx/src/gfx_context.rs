use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    descriptors::heaps::{GfxDescriptorHeaps, GfxHeapSettings},
    error::GfxResult,
    foundation::device::GfxDevice,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxLimits {
    /// 单次加速结构构建允许使用的 scratch 大小
    pub max_scratch_bytes: u64,
}

impl Default for GfxLimits {
    fn default() -> Self {
        Self {
            max_scratch_bytes: 256 * 1024 * 1024,
        }
    }
}

/// 一个 session 内共享的 GFX 对象：设备、描述符 heap 与限制
///
/// 资源、view、command list 都通过 `Arc<GfxContext>` 访问设备，可以在线程之间传递。
pub struct GfxContext {
    device: Arc<dyn GfxDevice>,
    heaps: GfxDescriptorHeaps,
    limits: GfxLimits,
    buffers: u32,
}

impl GfxContext {
    pub fn new(
        device: Arc<dyn GfxDevice>,
        heap_settings: &GfxHeapSettings,
        limits: GfxLimits,
        buffers: u32,
    ) -> GfxResult<Arc<Self>> {
        let heaps = GfxDescriptorHeaps::new(heap_settings, buffers)?;
        log::info!(
            "gfx context created on {}: {} buffered frames, csu frame region {} slots",
            device.adapter_name(),
            buffers,
            heaps.gpu_csu().frame_capacity()
        );

        Ok(Arc::new(Self {
            device,
            heaps,
            limits,
            buffers,
        }))
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn GfxDevice> {
        &self.device
    }

    #[inline]
    pub fn heaps(&self) -> &GfxDescriptorHeaps {
        &self.heaps
    }

    #[inline]
    pub fn limits(&self) -> &GfxLimits {
        &self.limits
    }

    #[inline]
    pub fn buffers(&self) -> u32 {
        self.buffers
    }
}
