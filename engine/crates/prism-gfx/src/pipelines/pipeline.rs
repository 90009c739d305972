use crate::{
    error::GfxResult,
    pipelines::binding::{GfxBindPoint, GfxBindingSlot},
};

/// 由 pipeline 层提供的已构建 pipeline
///
/// pipeline 对象与 binding layout 的构建不在这一层；这里只需要名字、绑定点，
/// 以及每次 draw / dispatch / trace 之前需要实现的绑定槽位。
pub trait GfxPipeline: Send + Sync {
    fn debug_name(&self) -> &str;

    fn bind_point(&self) -> GfxBindPoint;

    /// 按槽位顺序给出当前的绑定
    fn bindings(&self) -> GfxResult<Vec<GfxBindingSlot>>;
}

/// 绑定固定不变的 pipeline
pub struct GfxFixedPipeline {
    name: String,
    bind_point: GfxBindPoint,
    slots: Vec<GfxBindingSlot>,
}

impl GfxFixedPipeline {
    pub fn new(name: &str, bind_point: GfxBindPoint, slots: Vec<GfxBindingSlot>) -> Self {
        Self {
            name: name.to_string(),
            bind_point,
            slots,
        }
    }

    #[inline]
    pub fn slots_mut(&mut self) -> &mut Vec<GfxBindingSlot> {
        &mut self.slots
    }
}

impl GfxPipeline for GfxFixedPipeline {
    fn debug_name(&self) -> &str {
        &self.name
    }

    fn bind_point(&self) -> GfxBindPoint {
        self.bind_point
    }

    fn bindings(&self) -> GfxResult<Vec<GfxBindingSlot>> {
        Ok(self.slots.clone())
    }
}
