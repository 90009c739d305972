//! 资源状态与 barrier
//!
//! 资源状态使用 Vulkan 的 pipeline stage、access mask 和 image layout 描述；
//! buffer 的 layout 始终为 `UNDEFINED`。

use ash::vk;

use crate::foundation::device::GfxMemoryId;

/// 资源最近一次被使用的方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxResourceState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl Default for GfxResourceState {
    fn default() -> Self {
        Self::COMMON
    }
}

// new & 常量定义
impl GfxResourceState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    const SHADER_STAGES_NON_PIXEL: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
        vk::PipelineStageFlags2::VERTEX_SHADER.as_raw()
            | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw()
            | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR.as_raw(),
    );

    /// 刚创建的资源，内容未定义
    pub const COMMON: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED);

    /// upload heap 上的资源始终处于该状态
    pub const GENERIC_READ: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::MEMORY_READ,
        vk::ImageLayout::GENERAL,
    );

    /// 传输源
    pub const COPY_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    /// 传输目标；readback heap 上的资源始终处于该状态
    pub const COPY_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    /// 非像素着色器只读（计算、光追、顶点）
    pub const SHADER_READ_NON_PIXEL: Self = Self::new(
        Self::SHADER_STAGES_NON_PIXEL,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// 所有着色器只读（图形管线需要同时包含像素着色器）
    pub const SHADER_READ_ALL: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            Self::SHADER_STAGES_NON_PIXEL.as_raw() | vk::PipelineStageFlags2::FRAGMENT_SHADER.as_raw(),
        ),
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// 存储读写
    pub const UNORDERED_ACCESS: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    /// 颜色附件输出
    pub const RENDER_TARGET: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    /// 深度附件写入
    pub const DEPTH_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    );

    /// 呈现
    pub const PRESENT: Self =
        Self::new(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR);

    /// 顶点缓冲与常量缓冲
    pub const VERTEX_AND_CONSTANT: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::VERTEX_INPUT.as_raw() | Self::SHADER_STAGES_NON_PIXEL.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::VERTEX_ATTRIBUTE_READ.as_raw() | vk::AccessFlags2::UNIFORM_READ.as_raw(),
        ),
        vk::ImageLayout::UNDEFINED,
    );

    /// 索引缓冲
    pub const INDEX: Self = Self::new(
        vk::PipelineStageFlags2::INDEX_INPUT,
        vk::AccessFlags2::INDEX_READ,
        vk::ImageLayout::UNDEFINED,
    );

    /// 加速结构构建的输入（顶点、索引、AABB、变换）
    pub const BUILD_INPUT: Self = Self::new(
        vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
        vk::AccessFlags2::SHADER_READ,
        vk::ImageLayout::UNDEFINED,
    );

    /// 加速结构本体，创建之后不再迁移
    pub const ACCELERATION_STRUCTURE: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR.as_raw()
                | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR.as_raw()
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR.as_raw(),
        ),
        vk::ImageLayout::UNDEFINED,
    );
}

// 辅助方法
impl GfxResourceState {
    /// 是否包含 unordered access 写
    #[inline]
    pub fn is_unordered_access(&self) -> bool {
        self.access.contains(vk::AccessFlags2::SHADER_STORAGE_WRITE)
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(
            vk::AccessFlags2::SHADER_STORAGE_WRITE
                | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
                | vk::AccessFlags2::TRANSFER_WRITE
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR
                | vk::AccessFlags2::MEMORY_WRITE,
        )
    }
}

/// 录制进 command list 的同步命令
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxBarrier {
    /// 状态迁移
    Transition {
        memory: GfxMemoryId,
        before: GfxResourceState,
        after: GfxResourceState,
    },
    /// 对同一资源的两次 unordered access 之间的读写依赖；`None` 表示所有资源
    UnorderedAccess { memory: Option<GfxMemoryId> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unordered_access_detection() {
        assert!(GfxResourceState::UNORDERED_ACCESS.is_unordered_access());
        assert!(!GfxResourceState::SHADER_READ_ALL.is_unordered_access());
        assert!(!GfxResourceState::COPY_DST.is_unordered_access());
        assert!(GfxResourceState::COPY_DST.is_write());
        assert!(!GfxResourceState::COPY_SRC.is_write());
    }

    #[test]
    fn test_graphics_read_covers_non_pixel_read() {
        let all = GfxResourceState::SHADER_READ_ALL;
        let non_pixel = GfxResourceState::SHADER_READ_NON_PIXEL;
        assert!(all.stage.contains(non_pixel.stage));
        assert_ne!(all, non_pixel);
        assert_eq!(GfxResourceState::default(), GfxResourceState::COMMON);
    }
}
