use ash::vk;

use crate::{foundation::device::GfxMemoryId, resources::view::GfxViewSlice};

/// view 可以创建的描述符种类
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxDescriptorKind {
    ShaderRead = 0,
    UnorderedAccess = 1,
    Constant = 2,
    RenderTarget = 3,
    DepthStencil = 4,
}

impl GfxDescriptorKind {
    pub const COUNT: usize = 5;
    pub const ALL: [GfxDescriptorKind; Self::COUNT] = [
        GfxDescriptorKind::ShaderRead,
        GfxDescriptorKind::UnorderedAccess,
        GfxDescriptorKind::Constant,
        GfxDescriptorKind::RenderTarget,
        GfxDescriptorKind::DepthStencil,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// 该种类的描述符存放在哪个 heap
    #[inline]
    pub fn heap_kind(self) -> GfxDescriptorHeapKind {
        match self {
            Self::ShaderRead | Self::UnorderedAccess | Self::Constant => GfxDescriptorHeapKind::Csu,
            Self::RenderTarget => GfxDescriptorHeapKind::RenderTarget,
            Self::DepthStencil => GfxDescriptorHeapKind::DepthStencil,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxDescriptorHeapKind {
    /// constant、shader read、unordered access
    Csu,
    Sampler,
    RenderTarget,
    DepthStencil,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxSamplerDesc {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
}

impl Default for GfxSamplerDesc {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
        }
    }
}

/// 一个描述符槽位的内容
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GfxDescriptor {
    /// 绑定到空资源，读返回 0，写被丢弃
    Null(GfxDescriptorKind),
    View {
        kind: GfxDescriptorKind,
        memory: GfxMemoryId,
        format: vk::Format,
        slice: GfxViewSlice,
        element_stride: u32,
    },
    Sampler(GfxSamplerDesc),
}

/// 描述符表中一项的来源
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GfxDescriptorSource {
    /// CPU heap 中的槽位
    Cpu(u32),
    Null(GfxDescriptorKind),
}
