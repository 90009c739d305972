use serde::{Deserialize, Serialize};

use crate::{
    commands::command_list::GfxDescriptorCopyBatch,
    descriptors::{cpu_heap::GfxCpuDescriptorHeap, descriptor::GfxDescriptorHeapKind, gpu_heap::GfxGpuDescriptorHeap},
    error::GfxResult,
};

/// 各个描述符 heap 的容量
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxHeapSettings {
    pub gpu_csu_capacity: u32,
    pub gpu_csu_persistent: u32,
    pub gpu_sampler_capacity: u32,
    pub gpu_sampler_persistent: u32,
    pub cpu_csu_capacity: u32,
    pub cpu_sampler_capacity: u32,
    pub cpu_render_target_capacity: u32,
    pub cpu_depth_stencil_capacity: u32,
}

impl Default for GfxHeapSettings {
    fn default() -> Self {
        Self {
            gpu_csu_capacity: 900_000,
            gpu_csu_persistent: 1_000,
            gpu_sampler_capacity: 2_000,
            gpu_sampler_persistent: 100,
            cpu_csu_capacity: 1_000_000,
            cpu_sampler_capacity: 2_000,
            cpu_render_target_capacity: 1_000,
            cpu_depth_stencil_capacity: 1_000,
        }
    }
}

/// 一个 session 使用的全部描述符 heap
pub struct GfxDescriptorHeaps {
    cpu_csu: GfxCpuDescriptorHeap,
    cpu_sampler: GfxCpuDescriptorHeap,
    cpu_render_target: GfxCpuDescriptorHeap,
    cpu_depth_stencil: GfxCpuDescriptorHeap,

    gpu_csu: GfxGpuDescriptorHeap,
    gpu_sampler: GfxGpuDescriptorHeap,
}
// new & init
impl GfxDescriptorHeaps {
    pub fn new(settings: &GfxHeapSettings, buffers: u32) -> GfxResult<Self> {
        Ok(Self {
            cpu_csu: GfxCpuDescriptorHeap::new(GfxDescriptorHeapKind::Csu, settings.cpu_csu_capacity),
            cpu_sampler: GfxCpuDescriptorHeap::new(GfxDescriptorHeapKind::Sampler, settings.cpu_sampler_capacity),
            cpu_render_target: GfxCpuDescriptorHeap::new(
                GfxDescriptorHeapKind::RenderTarget,
                settings.cpu_render_target_capacity,
            ),
            cpu_depth_stencil: GfxCpuDescriptorHeap::new(
                GfxDescriptorHeapKind::DepthStencil,
                settings.cpu_depth_stencil_capacity,
            ),
            gpu_csu: GfxGpuDescriptorHeap::new(
                GfxDescriptorHeapKind::Csu,
                settings.gpu_csu_capacity,
                settings.gpu_csu_persistent,
                buffers,
            )?,
            gpu_sampler: GfxGpuDescriptorHeap::new(
                GfxDescriptorHeapKind::Sampler,
                settings.gpu_sampler_capacity,
                settings.gpu_sampler_persistent,
                buffers,
            )?,
        })
    }
}
// getters
impl GfxDescriptorHeaps {
    #[inline]
    pub fn cpu(&self, kind: GfxDescriptorHeapKind) -> &GfxCpuDescriptorHeap {
        match kind {
            GfxDescriptorHeapKind::Csu => &self.cpu_csu,
            GfxDescriptorHeapKind::Sampler => &self.cpu_sampler,
            GfxDescriptorHeapKind::RenderTarget => &self.cpu_render_target,
            GfxDescriptorHeapKind::DepthStencil => &self.cpu_depth_stencil,
        }
    }

    #[inline]
    pub fn gpu_csu(&self) -> &GfxGpuDescriptorHeap {
        &self.gpu_csu
    }

    #[inline]
    pub fn gpu_sampler(&self) -> &GfxGpuDescriptorHeap {
        &self.gpu_sampler
    }
}
// tools
impl GfxDescriptorHeaps {
    /// 两个 shader visible heap 同时切换到 frame 的区域
    pub fn restart_for_frame(&self, frame: usize) -> GfxResult<()> {
        self.gpu_csu.restart_for_frame(frame)?;
        self.gpu_sampler.restart_for_frame(frame)
    }

    /// flush 时执行 command list 中延迟的 csu 描述符拷贝
    pub fn apply_deferred_copies(&self, batch: &GfxDescriptorCopyBatch) -> GfxResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.gpu_csu.copy_from(&self.cpu_csu, batch)
    }
}
