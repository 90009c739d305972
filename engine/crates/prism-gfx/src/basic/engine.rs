/// 硬件提交通道
///
/// 每个 engine 拥有独立的 queue、fence 和 command allocator。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxEngine {
    Graphics = 0,
    Compute = 1,
    Copy = 2,
}

impl GfxEngine {
    pub const COUNT: usize = 3;
    pub const ALL: [GfxEngine; Self::COUNT] = [GfxEngine::Graphics, GfxEngine::Compute, GfxEngine::Copy];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn mask(self) -> GfxEngineMask {
        match self {
            GfxEngine::Graphics => GfxEngineMask::GRAPHICS,
            GfxEngine::Compute => GfxEngineMask::COMPUTE,
            GfxEngine::Copy => GfxEngineMask::COPY,
        }
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            GfxEngine::Graphics => "graphics",
            GfxEngine::Compute => "compute",
            GfxEngine::Copy => "copy",
        }
    }

    /// draw、clear render target 等光栅化命令
    #[inline]
    pub fn supports_raster(self) -> bool {
        self == GfxEngine::Graphics
    }

    /// dispatch、dispatch rays、UAV clear、加速结构构建
    #[inline]
    pub fn supports_compute(self) -> bool {
        self != GfxEngine::Copy
    }
}

impl std::fmt::Display for GfxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// flush 时选择需要提交的 engine
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct GfxEngineMask: u8 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const COPY = 1 << 2;
        const ALL = Self::GRAPHICS.bits() | Self::COMPUTE.bits() | Self::COPY.bits();
    }
}

impl GfxEngineMask {
    /// 按照 engine 的固定顺序遍历
    pub fn engines(self) -> impl Iterator<Item = GfxEngine> {
        GfxEngine::ALL.into_iter().filter(move |engine| self.contains(engine.mask()))
    }
}
