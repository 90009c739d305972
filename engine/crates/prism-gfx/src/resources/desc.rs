use ash::vk;

use crate::{
    basic::format::format_info,
    error::{GfxError, GfxResult},
    foundation::device::GfxMemoryHeap,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxResourceDimension {
    Buffer,
    Texture1D,
    Texture2D,
    Texture3D,
}

/// CPU 对资源的直接访问方式
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxCpuAccess {
    None,
    Write,
    Read,
}

impl GfxCpuAccess {
    #[inline]
    pub fn heap(self) -> GfxMemoryHeap {
        match self {
            GfxCpuAccess::None => GfxMemoryHeap::DeviceLocal,
            GfxCpuAccess::Write => GfxMemoryHeap::Upload,
            GfxCpuAccess::Read => GfxMemoryHeap::Readback,
        }
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct GfxResourceUsage: u32 {
        const SHADER_READ = 1 << 0;
        const UNORDERED_ACCESS = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
        const ACCELERATION_STRUCTURE = 1 << 4;
    }
}

/// 资源的创建参数
///
/// - buffer：`width` 为字节数，`format` 为 `UNDEFINED`
/// - 1D/2D 纹理：`depth_or_array_size` 为 array 大小
/// - 3D 纹理：`depth_or_array_size` 为深度
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxResourceDesc {
    pub dimension: GfxResourceDimension,
    pub width: u64,
    pub height: u32,
    pub depth_or_array_size: u32,
    pub mip_levels: u32,
    pub format: vk::Format,
    pub element_stride: u32,
    pub cpu_access: GfxCpuAccess,
    pub usage: GfxResourceUsage,
}

// new & 常用配置
impl GfxResourceDesc {
    pub fn buffer(element_count: u64, element_stride: u32) -> Self {
        Self {
            dimension: GfxResourceDimension::Buffer,
            width: element_count * element_stride as u64,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: vk::Format::UNDEFINED,
            element_stride,
            cpu_access: GfxCpuAccess::None,
            usage: GfxResourceUsage::SHADER_READ | GfxResourceUsage::UNORDERED_ACCESS,
        }
    }

    /// constant buffer 的大小需要 256 字节对齐
    pub fn constant_buffer(size: u64) -> Self {
        let aligned = size.div_ceil(256).max(1) * 256;
        Self {
            usage: GfxResourceUsage::SHADER_READ,
            ..Self::buffer(1, aligned as u32)
        }
    }

    pub fn texture1d(format: vk::Format, width: u32, array_size: u32, mip_levels: u32) -> Self {
        Self::texture(GfxResourceDimension::Texture1D, format, width, 1, array_size, mip_levels)
    }

    pub fn texture2d(format: vk::Format, width: u32, height: u32, array_size: u32, mip_levels: u32) -> Self {
        Self::texture(GfxResourceDimension::Texture2D, format, width, height, array_size, mip_levels)
    }

    pub fn texture3d(format: vk::Format, width: u32, height: u32, depth: u32, mip_levels: u32) -> Self {
        Self::texture(GfxResourceDimension::Texture3D, format, width, height, depth, mip_levels)
    }

    pub fn render_target(format: vk::Format, width: u32, height: u32) -> Self {
        Self::texture2d(format, width, height, 1, 1).with_usage(
            GfxResourceUsage::RENDER_TARGET | GfxResourceUsage::SHADER_READ | GfxResourceUsage::UNORDERED_ACCESS,
        )
    }

    pub fn depth_buffer(width: u32, height: u32) -> Self {
        Self::texture2d(vk::Format::D32_SFLOAT, width, height, 1, 1)
            .with_usage(GfxResourceUsage::DEPTH_STENCIL | GfxResourceUsage::SHADER_READ)
    }

    fn texture(
        dimension: GfxResourceDimension,
        format: vk::Format,
        width: u32,
        height: u32,
        depth_or_array_size: u32,
        mip_levels: u32,
    ) -> Self {
        Self {
            dimension,
            width: width as u64,
            height,
            depth_or_array_size,
            mip_levels,
            format,
            element_stride: format_info(format).map(|info| info.texel_size).unwrap_or(0),
            cpu_access: GfxCpuAccess::None,
            usage: GfxResourceUsage::SHADER_READ | GfxResourceUsage::UNORDERED_ACCESS,
        }
    }

    /// builder
    #[inline]
    pub fn with_cpu_access(mut self, cpu_access: GfxCpuAccess) -> Self {
        self.cpu_access = cpu_access;
        self
    }

    /// builder
    #[inline]
    pub fn with_usage(mut self, usage: GfxResourceUsage) -> Self {
        self.usage = usage;
        self
    }
}

// 派生属性
impl GfxResourceDesc {
    #[inline]
    pub fn is_buffer(&self) -> bool {
        self.dimension == GfxResourceDimension::Buffer
    }

    #[inline]
    pub fn element_count(&self) -> u64 {
        if self.element_stride == 0 { 0 } else { self.width / self.element_stride as u64 }
    }

    #[inline]
    pub fn array_size(&self) -> u32 {
        match self.dimension {
            GfxResourceDimension::Texture1D | GfxResourceDimension::Texture2D => self.depth_or_array_size,
            _ => 1,
        }
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        match self.dimension {
            GfxResourceDimension::Texture3D => self.depth_or_array_size,
            _ => 1,
        }
    }

    #[inline]
    pub fn subresource_count(&self) -> u32 {
        match self.dimension {
            GfxResourceDimension::Buffer => 1,
            GfxResourceDimension::Texture3D => self.mip_levels,
            _ => self.mip_levels * self.array_size(),
        }
    }

    /// 与 D3D12 相同的编号：`mip + array * mip_levels`
    #[inline]
    pub fn subresource_index(&self, mip: u32, array: u32) -> u32 {
        mip + array * self.mip_levels
    }

    /// mip 层级的 (width, height, depth)
    pub fn mip_extent(&self, mip: u32) -> (u32, u32, u32) {
        let shrink = |v: u32| (v >> mip).max(1);
        match self.dimension {
            GfxResourceDimension::Buffer => (self.element_count() as u32, 1, 1),
            GfxResourceDimension::Texture1D => (shrink(self.width as u32), 1, 1),
            GfxResourceDimension::Texture2D => (shrink(self.width as u32), shrink(self.height), 1),
            GfxResourceDimension::Texture3D => {
                (shrink(self.width as u32), shrink(self.height), shrink(self.depth_or_array_size))
            }
        }
    }

    pub fn validate(&self) -> GfxResult<()> {
        if self.width == 0 || self.height == 0 || self.depth_or_array_size == 0 || self.mip_levels == 0 {
            return Err(GfxError::invalid(format!("resource extent must be non-zero: {self:?}")));
        }

        if self.is_buffer() {
            if self.element_stride == 0 || self.width % self.element_stride as u64 != 0 {
                return Err(GfxError::invalid(format!(
                    "buffer of {} bytes is not a whole number of {}-byte elements",
                    self.width, self.element_stride
                )));
            }
            if self.element_count() > u32::MAX as u64 {
                return Err(GfxError::invalid(format!("buffer has too many elements: {}", self.element_count())));
            }
            return Ok(());
        }

        if format_info(self.format).is_none() {
            return Err(GfxError::invalid(format!("unsupported texture format {:?}", self.format)));
        }
        if self.width > u32::MAX as u64 {
            return Err(GfxError::invalid(format!("texture width {} is too large", self.width)));
        }
        let largest = (self.width as u32).max(self.height).max(self.depth());
        let max_mips = u32::BITS - largest.leading_zeros();
        if self.mip_levels > max_mips {
            return Err(GfxError::invalid(format!(
                "{} mip levels requested, {} at most for this extent",
                self.mip_levels, max_mips
            )));
        }
        Ok(())
    }
}
