use ash::vk;

/// 格式分量的数值解释
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GfxComponentKind {
    Uint,
    Sint,
    Float,
    Unorm,
}

/// 线性布局下一个 texel 的信息
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxFormatInfo {
    pub texel_size: u32,
    pub components: u32,
    pub kind: GfxComponentKind,
}

impl GfxFormatInfo {
    const fn new(texel_size: u32, components: u32, kind: GfxComponentKind) -> Self {
        Self {
            texel_size,
            components,
            kind,
        }
    }

    #[inline]
    pub fn component_size(&self) -> u32 {
        self.texel_size / self.components
    }
}

/// 支持的纹理格式；不在表中的格式无法作为纹理创建
pub fn format_info(format: vk::Format) -> Option<GfxFormatInfo> {
    use GfxComponentKind::*;
    let info = match format {
        vk::Format::R8_UNORM => GfxFormatInfo::new(1, 1, Unorm),
        vk::Format::R8_UINT => GfxFormatInfo::new(1, 1, Uint),
        vk::Format::R8G8_UNORM => GfxFormatInfo::new(2, 2, Unorm),
        vk::Format::R8G8B8A8_UNORM | vk::Format::B8G8R8A8_UNORM => GfxFormatInfo::new(4, 4, Unorm),
        vk::Format::R8G8B8A8_UINT => GfxFormatInfo::new(4, 4, Uint),
        vk::Format::R16_UINT => GfxFormatInfo::new(2, 1, Uint),
        vk::Format::R32_UINT => GfxFormatInfo::new(4, 1, Uint),
        vk::Format::R32_SINT => GfxFormatInfo::new(4, 1, Sint),
        vk::Format::R32_SFLOAT | vk::Format::D32_SFLOAT => GfxFormatInfo::new(4, 1, Float),
        vk::Format::R32G32_UINT => GfxFormatInfo::new(8, 2, Uint),
        vk::Format::R32G32_SFLOAT => GfxFormatInfo::new(8, 2, Float),
        vk::Format::R32G32B32_SFLOAT => GfxFormatInfo::new(12, 3, Float),
        vk::Format::R32G32B32A32_UINT => GfxFormatInfo::new(16, 4, Uint),
        vk::Format::R32G32B32A32_SINT => GfxFormatInfo::new(16, 4, Sint),
        vk::Format::R32G32B32A32_SFLOAT => GfxFormatInfo::new(16, 4, Float),
        _ => return None,
    };
    Some(info)
}

#[inline]
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM | vk::Format::D32_SFLOAT_S8_UINT
    )
}
