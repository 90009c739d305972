use ash::vk;

use crate::{
    commands::barrier::GfxBarrier,
    descriptors::descriptor::GfxDescriptorHeapKind,
    foundation::device::GfxMemoryId,
    pipelines::binding::GfxBindPoint,
    raytracing::inputs::GfxAccelerationInputs,
    resources::footprint::GfxPlacedFootprint,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxBufferCopy {
    pub src: GfxMemoryId,
    pub src_offset: u64,
    pub dst: GfxMemoryId,
    pub dst_offset: u64,
    pub size: u64,
}

/// 两侧都使用 placed footprint 描述的 texel 区域拷贝
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxTextureCopy {
    pub src: GfxMemoryId,
    pub src_footprint: GfxPlacedFootprint,
    pub src_origin: [u32; 3],
    pub dst: GfxMemoryId,
    pub dst_footprint: GfxPlacedFootprint,
    pub dst_origin: [u32; 3],
    /// texel 为单位的 width、height、depth
    pub extent: [u32; 3],
}

/// 一段按行组织的内存区域
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxFillRegion {
    pub offset: u64,
    pub row_bytes: u64,
    pub rows: u32,
    pub row_pitch: u64,
}

/// 用 pattern 重复填充若干区域，clear 类命令的统一形式
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxFill {
    pub memory: GfxMemoryId,
    pub regions: Vec<GfxFillRegion>,
    pub pattern: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GfxViewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl GfxViewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxAccelerationBuild {
    pub inputs: GfxAccelerationInputs,
    pub mode: vk::BuildAccelerationStructureModeKHR,
    pub flags: vk::BuildAccelerationStructureFlagsKHR,
    pub dst: GfxMemoryId,
    /// update 模式下的源，总是等于 dst
    pub src: Option<GfxMemoryId>,
    pub scratch: GfxMemoryId,
}

/// 后端无关的命令
///
/// 所有引用都已经解析为内存对象与 footprint，设备执行时不需要再访问资源对象。
#[derive(Clone, Debug, PartialEq)]
pub enum GfxCommand {
    Barrier(GfxBarrier),

    // 数据传输
    CopyBuffer(GfxBufferCopy),
    CopyTexture(GfxTextureCopy),
    CopyResource {
        src: GfxMemoryId,
        dst: GfxMemoryId,
        size: u64,
    },
    ClearUnorderedAccess(GfxFill),
    ClearRenderTarget(GfxFill),
    ClearDepthStencil(GfxFill),

    // 状态
    SetPipeline {
        name: String,
        bind_point: GfxBindPoint,
    },
    SetConstants {
        slot: u32,
        values: Vec<u32>,
    },
    SetDescriptorTable {
        slot: u32,
        heap: GfxDescriptorHeapKind,
        start: u32,
        count: u32,
    },
    SetRootView {
        slot: u32,
        memory: GfxMemoryId,
    },
    SetViewport(GfxViewport),
    SetVertexBuffer {
        slot: u32,
        memory: GfxMemoryId,
        offset: u64,
        size: u64,
        stride: u32,
    },
    SetIndexBuffer {
        memory: GfxMemoryId,
        offset: u64,
        size: u64,
        index_type: vk::IndexType,
    },

    // action
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        groups: [u32; 3],
    },
    BuildAccelerationStructure(GfxAccelerationBuild),
    DispatchRays {
        extent: [u32; 3],
    },
}

impl GfxCommand {
    /// 只能在 graphics queue 上录制
    pub fn requires_raster(&self) -> bool {
        matches!(
            self,
            Self::ClearRenderTarget(_)
                | Self::ClearDepthStencil(_)
                | Self::SetViewport(_)
                | Self::SetVertexBuffer { .. }
                | Self::SetIndexBuffer { .. }
                | Self::Draw { .. }
                | Self::DrawIndexed { .. }
        ) || matches!(
            self,
            Self::SetPipeline {
                bind_point: GfxBindPoint::Graphics,
                ..
            }
        )
    }

    /// copy queue 不支持的命令
    pub fn requires_compute(&self) -> bool {
        !matches!(
            self,
            Self::Barrier(_) | Self::CopyBuffer(_) | Self::CopyTexture(_) | Self::CopyResource { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Barrier(_) => "barrier",
            Self::CopyBuffer(_) => "copy-buffer",
            Self::CopyTexture(_) => "copy-texture",
            Self::CopyResource { .. } => "copy-resource",
            Self::ClearUnorderedAccess(_) => "clear-uav",
            Self::ClearRenderTarget(_) => "clear-render-target",
            Self::ClearDepthStencil(_) => "clear-depth-stencil",
            Self::SetPipeline { .. } => "set-pipeline",
            Self::SetConstants { .. } => "set-constants",
            Self::SetDescriptorTable { .. } => "set-descriptor-table",
            Self::SetRootView { .. } => "set-root-view",
            Self::SetViewport(_) => "set-viewport",
            Self::SetVertexBuffer { .. } => "set-vertex-buffer",
            Self::SetIndexBuffer { .. } => "set-index-buffer",
            Self::Draw { .. } => "draw",
            Self::DrawIndexed { .. } => "draw-indexed",
            Self::Dispatch { .. } => "dispatch",
            Self::BuildAccelerationStructure(_) => "build-acceleration-structure",
            Self::DispatchRays { .. } => "dispatch-rays",
        }
    }
}
