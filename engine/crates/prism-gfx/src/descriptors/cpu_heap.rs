use std::sync::Mutex;

use crate::{
    descriptors::descriptor::{GfxDescriptor, GfxDescriptorHeapKind},
    error::{GfxError, GfxResult},
};

#[derive(Default)]
struct GfxCpuSlot {
    live: bool,
    descriptor: Option<GfxDescriptor>,
}

#[derive(Default)]
struct GfxCpuHeapState {
    /// 单调增长，slots 的长度
    high_water: u32,
    free_list: Vec<u32>,
    slots: Vec<GfxCpuSlot>,
}

/// 只有 CPU 可见的描述符 heap
///
/// 分配优先复用 free list，否则推进 high water mark；所有操作都在一个 mutex 下完成。
pub struct GfxCpuDescriptorHeap {
    kind: GfxDescriptorHeapKind,
    capacity: u32,
    state: Mutex<GfxCpuHeapState>,
}
// new & init
impl GfxCpuDescriptorHeap {
    pub fn new(kind: GfxDescriptorHeapKind, capacity: u32) -> Self {
        Self {
            kind,
            capacity,
            state: Mutex::new(GfxCpuHeapState::default()),
        }
    }
}
// getters
impl GfxCpuDescriptorHeap {
    #[inline]
    pub fn kind(&self) -> GfxDescriptorHeapKind {
        self.kind
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// 当前存活的描述符数量
    pub fn live_count(&self) -> GfxResult<u32> {
        let state = self.state.lock()?;
        Ok(state.high_water - state.free_list.len() as u32)
    }
}
// tools
impl GfxCpuDescriptorHeap {
    pub fn allocate(&self) -> GfxResult<u32> {
        let mut state = self.state.lock()?;
        let index = match state.free_list.pop() {
            Some(index) => index,
            None => {
                if state.high_water >= self.capacity {
                    return Err(GfxError::exhausted(format!(
                        "cpu {:?} descriptor heap is full ({} slots)",
                        self.kind, self.capacity
                    )));
                }
                state.high_water += 1;
                state.slots.push(GfxCpuSlot::default());
                state.high_water - 1
            }
        };

        state.slots[index as usize].live = true;
        Ok(index)
    }

    pub fn free(&self, index: u32) -> GfxResult<()> {
        let mut state = self.state.lock()?;
        let slot = state
            .slots
            .get_mut(index as usize)
            .filter(|slot| slot.live)
            .ok_or_else(|| GfxError::invalid(format!("cpu {:?} descriptor {} is not allocated", self.kind, index)))?;
        slot.live = false;
        slot.descriptor = None;
        state.free_list.push(index);
        Ok(())
    }

    pub fn write(&self, index: u32, descriptor: GfxDescriptor) -> GfxResult<()> {
        let mut state = self.state.lock()?;
        match state.slots.get_mut(index as usize) {
            Some(slot) if slot.live => {
                slot.descriptor = Some(descriptor);
                Ok(())
            }
            _ => Err(GfxError::invalid(format!("write to unallocated cpu {:?} descriptor {}", self.kind, index))),
        }
    }

    pub fn read(&self, index: u32) -> GfxResult<Option<GfxDescriptor>> {
        let state = self.state.lock()?;
        Ok(state.slots.get(index as usize).filter(|slot| slot.live).and_then(|slot| slot.descriptor.clone()))
    }
}
