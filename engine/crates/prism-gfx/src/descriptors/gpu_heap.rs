use std::{
    collections::HashMap,
    ops::Range,
    sync::{
        Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use crate::{
    commands::command_list::GfxDescriptorCopyBatch,
    descriptors::{
        cpu_heap::GfxCpuDescriptorHeap,
        descriptor::{GfxDescriptor, GfxDescriptorHeapKind, GfxDescriptorSource},
    },
    error::{GfxError, GfxResult},
};

#[derive(Default)]
struct GfxPersistentState {
    allocated: u32,
    free_list: Vec<u32>,
}

/// shader visible 的描述符 heap
///
/// 布局：
/// ```text
/// [frame 0][frame 1]...[frame N-1][persistent <- 从顶部向下分配]
/// ```
/// - 每帧的区域大小为 `(capacity - persistent) / buffers` 向下取整，余数并入 persistent 区域，
///   因此每一帧的区域大小完全相同，也没有无法寻址的槽位
/// - 帧内分配只有一次 atomic fetch-add；超过区域末尾立即返回 `ConfigurationExhaustion`
/// - 帧区域只在帧边界 restart，此时不会有并发的帧内分配
pub struct GfxGpuDescriptorHeap {
    kind: GfxDescriptorHeapKind,
    capacity: u32,
    buffers: u32,
    frame_capacity: u32,
    persistent_capacity: u32,

    persistent: Mutex<GfxPersistentState>,

    frame_cursor: AtomicU64,
    frame_end: AtomicU64,
    current_frame: AtomicUsize,

    slots: Mutex<HashMap<u32, GfxDescriptor>>,
}
// new & init
impl GfxGpuDescriptorHeap {
    pub fn new(kind: GfxDescriptorHeapKind, capacity: u32, persistent: u32, buffers: u32) -> GfxResult<Self> {
        if buffers == 0 {
            return Err(GfxError::construction("gpu descriptor heap requires at least one frame buffer"));
        }
        if persistent > capacity {
            return Err(GfxError::construction(format!(
                "{kind:?} heap: persistent region ({persistent}) exceeds capacity ({capacity})"
            )));
        }
        let frame_capacity = (capacity - persistent) / buffers;
        if frame_capacity == 0 {
            return Err(GfxError::construction(format!(
                "{kind:?} heap: no room for {buffers} frame regions in {capacity} slots"
            )));
        }
        let persistent_capacity = capacity - frame_capacity * buffers;
        if persistent_capacity != persistent {
            log::debug!(
                "{:?} heap: {} leftover slots folded into the persistent region",
                kind,
                persistent_capacity - persistent
            );
        }

        let heap = Self {
            kind,
            capacity,
            buffers,
            frame_capacity,
            persistent_capacity,
            persistent: Mutex::new(GfxPersistentState::default()),
            frame_cursor: AtomicU64::new(0),
            frame_end: AtomicU64::new(frame_capacity as u64),
            current_frame: AtomicUsize::new(0),
            slots: Mutex::new(HashMap::new()),
        };
        Ok(heap)
    }
}
// getters
impl GfxGpuDescriptorHeap {
    #[inline]
    pub fn kind(&self) -> GfxDescriptorHeapKind {
        self.kind
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn frame_capacity(&self) -> u32 {
        self.frame_capacity
    }

    #[inline]
    pub fn persistent_capacity(&self) -> u32 {
        self.persistent_capacity
    }

    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame.load(Ordering::Acquire)
    }

    #[inline]
    pub fn frame_region(&self, frame: usize) -> Range<u32> {
        let start = frame as u32 * self.frame_capacity;
        start..start + self.frame_capacity
    }

    /// 当前帧已经分配出去的数量
    pub fn frame_allocated(&self) -> u32 {
        let start = self.frame_region(self.current_frame()).start as u64;
        let cursor = self.frame_cursor.load(Ordering::Acquire);
        (cursor.saturating_sub(start)).min(self.frame_capacity as u64) as u32
    }
}
// persistent 区域
impl GfxGpuDescriptorHeap {
    pub fn allocate_persistent(&self) -> GfxResult<u32> {
        let mut state = self.persistent.lock()?;
        if let Some(index) = state.free_list.pop() {
            return Ok(index);
        }
        if state.allocated >= self.persistent_capacity {
            return Err(GfxError::exhausted(format!(
                "gpu {:?} persistent region is full ({} slots)",
                self.kind, self.persistent_capacity
            )));
        }
        let index = self.capacity - 1 - state.allocated;
        state.allocated += 1;
        Ok(index)
    }

    pub fn free_persistent(&self, index: u32) -> GfxResult<()> {
        let mut state = self.persistent.lock()?;
        let lowest_allocated = self.capacity - state.allocated;
        if index < lowest_allocated || index >= self.capacity || state.free_list.contains(&index) {
            return Err(GfxError::invalid(format!(
                "gpu {:?} descriptor {} is not an allocated persistent slot",
                self.kind, index
            )));
        }
        state.free_list.push(index);
        self.slots.lock()?.remove(&index);
        Ok(())
    }
}
// 帧区域
impl GfxGpuDescriptorHeap {
    /// 将帧内游标移动到 frame 区域的起点
    pub fn restart_for_frame(&self, frame: usize) -> GfxResult<()> {
        if frame >= self.buffers as usize {
            return Err(GfxError::invalid(format!(
                "frame {} is out of range for {} buffered frames",
                frame, self.buffers
            )));
        }
        let region = self.frame_region(frame);
        self.frame_end.store(region.end as u64, Ordering::Release);
        self.frame_cursor.store(region.start as u64, Ordering::Release);
        self.current_frame.store(frame, Ordering::Release);
        Ok(())
    }

    /// 在当前帧区域中分配连续的 count 个槽位，返回起点
    pub fn allocate_in_frame(&self, count: u32) -> GfxResult<u32> {
        let start = self.frame_cursor.fetch_add(count as u64, Ordering::AcqRel);
        let end = self.frame_end.load(Ordering::Acquire);
        if start + count as u64 > end {
            log::error!(
                "gpu {:?} frame region exhausted: requested {} at {}, region ends at {}",
                self.kind,
                count,
                start,
                end
            );
            return Err(GfxError::exhausted(format!(
                "gpu {:?} descriptor frame region exhausted ({} slots per frame)",
                self.kind, self.frame_capacity
            )));
        }
        Ok(start as u32)
    }
}
// 描述符内容
impl GfxGpuDescriptorHeap {
    pub fn write(&self, index: u32, descriptor: GfxDescriptor) -> GfxResult<()> {
        if index >= self.capacity {
            return Err(GfxError::invalid(format!("gpu {:?} descriptor {} out of range", self.kind, index)));
        }
        self.slots.lock()?.insert(index, descriptor);
        Ok(())
    }

    pub fn read(&self, index: u32) -> GfxResult<Option<GfxDescriptor>> {
        Ok(self.slots.lock()?.get(&index).cloned())
    }

    /// 执行一批延迟的描述符拷贝
    pub fn copy_from(&self, src_heap: &GfxCpuDescriptorHeap, batch: &GfxDescriptorCopyBatch) -> GfxResult<()> {
        let total: u64 = batch.dst_ranges.iter().map(|(_, len)| *len as u64).sum();
        if total != batch.src.len() as u64 {
            return Err(GfxError::invalid(format!(
                "descriptor copy batch has {} sources for {} destinations",
                batch.src.len(),
                total
            )));
        }

        let mut sources = batch.src.iter();
        let mut slots = self.slots.lock()?;
        for &(dst_start, len) in &batch.dst_ranges {
            for dst in dst_start..dst_start + len {
                let descriptor = match sources.next() {
                    Some(GfxDescriptorSource::Cpu(index)) => src_heap.read(*index)?.ok_or_else(|| {
                        GfxError::invalid(format!("cpu {:?} descriptor {} has no content", src_heap.kind(), index))
                    })?,
                    Some(GfxDescriptorSource::Null(kind)) => GfxDescriptor::Null(*kind),
                    None => unreachable!("source count checked above"),
                };
                slots.insert(dst, descriptor);
            }
        }
        Ok(())
    }
}
