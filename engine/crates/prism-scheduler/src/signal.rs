use prism_gfx::basic::engine::GfxEngine;

/// 一次 flush 之后，每个 engine 的完成计数值
///
/// 0 表示该 engine 上没有提交任何工作。
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GpuSignal {
    values: [u64; GfxEngine::COUNT],
}

impl GpuSignal {
    #[inline]
    pub fn value(&self, engine: GfxEngine) -> u64 {
        self.values[engine.index()]
    }

    #[inline]
    pub fn set(&mut self, engine: GfxEngine, value: u64) {
        self.values[engine.index()] = value;
    }

    /// 没有任何需要等待的 engine
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(|value| *value == 0)
    }

    /// 非 0 的 (engine, value)
    pub fn pending(&self) -> impl Iterator<Item = (GfxEngine, u64)> + '_ {
        GfxEngine::ALL
            .into_iter()
            .map(|engine| (engine, self.value(engine)))
            .filter(|(_, value)| *value != 0)
    }

    /// 逐个 engine 取较大值
    pub fn merge(&self, other: &GpuSignal) -> GpuSignal {
        let mut merged = *self;
        for engine in GfxEngine::ALL {
            merged.values[engine.index()] = self.value(engine).max(other.value(engine));
        }
        merged
    }
}
