//! 在 CPU 上执行命令的参考设备
//!
//! 每个 engine 一个执行线程，按提交顺序执行；fence 在该 queue 上之前的工作全部完成后才会 signal。
//! 拷贝、clear、加速结构构建真正修改内存；draw、dispatch、trace 只做计数。
//! 设备上发生的同步事件按调用顺序记录在 journal 中，供测试检查。

use std::{
    sync::{
        Arc, Condvar, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use crossbeam_channel::{Receiver, Sender};
use slotmap::SlotMap;

use crate::{
    basic::engine::GfxEngine,
    commands::{
        command::{GfxAccelerationBuild, GfxCommand, GfxFill, GfxTextureCopy},
        command_list::GfxRecordedList,
        queue::GfxWaitHandle,
    },
    error::{GfxError, GfxResult},
    foundation::device::{
        GfxAllocatorId, GfxDevice, GfxFenceId, GfxMappedMemory, GfxMemoryHeap, GfxMemoryId, GfxPrebuildInfo,
    },
    raytracing::inputs::{GfxAccelerationInputs, GfxInstanceRecord},
};

/// 等待 fence 时检查设备状态的间隔
const WAIT_TICK: Duration = Duration::from_millis(5);

/// 写在加速结构内存开头的头部
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GfxSoftAccelerationHeader {
    pub magic: u32,
    /// `vk::AccelerationStructureTypeKHR` 的原始值
    pub level: i32,
    pub primitive_count: u32,
    /// `vk::BuildAccelerationStructureFlagsKHR` 的原始值
    pub flags: u32,
    /// 自上一次完整构建以来的 update 次数
    pub refits: u32,
    pub _padding: [u32; 3],
}

impl GfxSoftAccelerationHeader {
    pub const MAGIC: u32 = 0x4D53_5250;

    #[inline]
    pub fn allows_update(&self) -> bool {
        vk::BuildAccelerationStructureFlagsKHR::from_raw(self.flags)
            .contains(vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE)
    }
}

/// journal 中的事件
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GfxSoftEvent {
    Submit {
        engine: GfxEngine,
        lists: Vec<String>,
    },
    Signal {
        engine: GfxEngine,
        fence: GfxFenceId,
        value: u64,
    },
    /// 等待返回之后记录
    Wait {
        handles: Vec<GfxWaitHandle>,
    },
    AllocatorReset {
        engine: GfxEngine,
        name: String,
    },
    AccelerationBuild {
        memory: GfxMemoryId,
        mode: vk::BuildAccelerationStructureModeKHR,
        primitive_count: u32,
    },
}

/// 执行过的命令计数
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GfxSoftStats {
    pub submitted_lists: u64,
    pub commands: u64,
    pub barriers: u64,
    pub copies: u64,
    pub clears: u64,
    pub builds: u64,
    pub draws: u64,
    pub dispatches: u64,
}

#[derive(Default)]
struct GfxSoftCounters {
    submitted_lists: AtomicU64,
    commands: AtomicU64,
    barriers: AtomicU64,
    copies: AtomicU64,
    clears: AtomicU64,
    builds: AtomicU64,
    draws: AtomicU64,
    dispatches: AtomicU64,
}

struct GfxSoftMemory {
    heap: GfxMemoryHeap,
    bytes: RwLock<Vec<u8>>,
    name: String,
}

struct GfxSoftFence {
    value: Mutex<u64>,
    cond: Condvar,
}

struct GfxSoftAllocator {
    engine: GfxEngine,
    name: String,
}

enum GfxSoftJob {
    Execute(Vec<Arc<GfxRecordedList>>),
    Signal(Arc<GfxSoftFence>, u64),
}

/// 设备状态，执行线程与调用线程共享
struct GfxSoftShared {
    memories: RwLock<SlotMap<GfxMemoryId, Arc<GfxSoftMemory>>>,
    fences: RwLock<SlotMap<GfxFenceId, Arc<GfxSoftFence>>>,
    allocators: Mutex<SlotMap<GfxAllocatorId, GfxSoftAllocator>>,

    journal: Mutex<Vec<GfxSoftEvent>>,
    counters: GfxSoftCounters,

    /// 设备丢失的原因
    lost: RwLock<Option<String>>,
}

struct GfxSoftQueue {
    sender: Option<Sender<GfxSoftJob>>,
    thread: Option<JoinHandle<()>>,
}

pub struct GfxSoftDevice {
    shared: Arc<GfxSoftShared>,
    queues: Vec<GfxSoftQueue>,
}
// new & init
impl GfxSoftDevice {
    pub fn new() -> Self {
        let shared = Arc::new(GfxSoftShared {
            memories: RwLock::new(SlotMap::with_key()),
            fences: RwLock::new(SlotMap::with_key()),
            allocators: Mutex::new(SlotMap::with_key()),
            journal: Mutex::new(Vec::new()),
            counters: GfxSoftCounters::default(),
            lost: RwLock::new(None),
        });

        let queues = GfxEngine::ALL
            .iter()
            .map(|&engine| {
                let (sender, receiver) = crossbeam_channel::unbounded();
                let thread_shared = shared.clone();
                let thread = std::thread::Builder::new()
                    .name(format!("SoftQueue-{}", engine))
                    .spawn(move || Self::queue_main(engine, thread_shared, receiver))
                    .inspect_err(|e| log::error!("failed to spawn soft queue thread for {}: {}", engine, e))
                    .ok();
                GfxSoftQueue {
                    sender: Some(sender),
                    thread,
                }
            })
            .collect();

        log::info!("soft device created");
        Self { shared, queues }
    }

    fn queue_main(engine: GfxEngine, shared: Arc<GfxSoftShared>, receiver: Receiver<GfxSoftJob>) {
        log::debug!("soft queue {} started", engine);
        for job in receiver.iter() {
            match job {
                GfxSoftJob::Execute(lists) => {
                    if shared.check_lost().is_err() {
                        continue;
                    }
                    for list in &lists {
                        if let Err(e) = list.commands.iter().try_for_each(|cmd| shared.execute(cmd)) {
                            shared.lose(&format!("{} list {} failed: {}", engine, list.debug_name, e));
                            break;
                        }
                    }
                }
                GfxSoftJob::Signal(fence, value) => {
                    if shared.check_lost().is_err() {
                        continue;
                    }
                    match fence.value.lock() {
                        Ok(mut current) => {
                            *current = (*current).max(value);
                            fence.cond.notify_all();
                        }
                        Err(_) => shared.lose("fence mutex poisoned"),
                    }
                }
            }
        }
        log::debug!("soft queue {} stopped", engine);
    }
}

impl Default for GfxSoftDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GfxSoftDevice {
    fn drop(&mut self) {
        // 断开 channel 之后执行线程处理完剩余的工作就会退出
        for queue in &mut self.queues {
            queue.sender.take();
        }
        for queue in &mut self.queues {
            if let Some(thread) = queue.thread.take() {
                let _ = thread.join();
            }
        }
    }
}
// 测试与诊断
impl GfxSoftDevice {
    /// 让设备进入丢失状态，之后所有操作都返回 `DeviceLost`
    pub fn lose_device(&self, reason: &str) {
        self.shared.lose(reason);
    }

    pub fn is_lost(&self) -> bool {
        self.shared.check_lost().is_err()
    }

    pub fn journal(&self) -> Vec<GfxSoftEvent> {
        self.shared.journal.lock().map(|journal| journal.clone()).unwrap_or_default()
    }

    pub fn clear_journal(&self) {
        if let Ok(mut journal) = self.shared.journal.lock() {
            journal.clear();
        }
    }

    pub fn stats(&self) -> GfxSoftStats {
        let c = &self.shared.counters;
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        GfxSoftStats {
            submitted_lists: load(&c.submitted_lists),
            commands: load(&c.commands),
            barriers: load(&c.barriers),
            copies: load(&c.copies),
            clears: load(&c.clears),
            builds: load(&c.builds),
            draws: load(&c.draws),
            dispatches: load(&c.dispatches),
        }
    }

    /// 存活的内存对象数量
    pub fn live_memory_count(&self) -> usize {
        self.shared.memories.read().map(|memories| memories.len()).unwrap_or(0)
    }

    /// 内存开头的加速结构头部；没有构建过时返回 None
    pub fn read_acceleration_header(&self, memory: GfxMemoryId) -> Option<GfxSoftAccelerationHeader> {
        let memory = self.shared.memory(memory).ok()?;
        read_header(&memory)
    }

    fn queue(&self, engine: GfxEngine) -> GfxResult<&Sender<GfxSoftJob>> {
        self.queues[engine.index()]
            .sender
            .as_ref()
            .ok_or_else(|| GfxError::device_lost(format!("{} queue is shut down", engine)))
    }

    fn push_event(&self, event: GfxSoftEvent) -> GfxResult<()> {
        self.shared.journal.lock()?.push(event);
        Ok(())
    }
}

impl GfxDevice for GfxSoftDevice {
    fn adapter_name(&self) -> &str {
        "Prism Soft Device"
    }

    fn create_memory(&self, size: u64, heap: GfxMemoryHeap, debug_name: &str) -> GfxResult<GfxMemoryId> {
        self.shared.check_lost()?;
        let memory = Arc::new(GfxSoftMemory {
            heap,
            bytes: RwLock::new(vec![0; size as usize]),
            name: debug_name.to_string(),
        });
        Ok(self.shared.memories.write()?.insert(memory))
    }

    fn release_memory(&self, memory: GfxMemoryId) {
        if let Ok(mut memories) = self.shared.memories.write() {
            memories.remove(memory);
        }
    }

    fn map_memory(&self, memory: GfxMemoryId) -> GfxResult<Arc<dyn GfxMappedMemory>> {
        self.shared.check_lost()?;
        let memory = self.shared.memory(memory)?;
        if !memory.heap.is_cpu_visible() {
            return Err(GfxError::invalid(format!("memory {} is not cpu visible", memory.name)));
        }
        Ok(Arc::new(GfxSoftMapping { memory }))
    }

    fn create_fence(&self, initial_value: u64, debug_name: &str) -> GfxResult<GfxFenceId> {
        self.shared.check_lost()?;
        log::debug!("soft fence created: {}", debug_name);
        Ok(self.shared.fences.write()?.insert(Arc::new(GfxSoftFence {
            value: Mutex::new(initial_value),
            cond: Condvar::new(),
        })))
    }

    fn fence_completed_value(&self, fence: GfxFenceId) -> GfxResult<u64> {
        self.shared.check_lost()?;
        Ok(*self.shared.fence(fence)?.value.lock()?)
    }

    fn signal_fence(&self, engine: GfxEngine, fence: GfxFenceId, value: u64) -> GfxResult<()> {
        self.shared.check_lost()?;
        let target = self.shared.fence(fence)?;
        self.push_event(GfxSoftEvent::Signal { engine, fence, value })?;
        self.queue(engine)?
            .send(GfxSoftJob::Signal(target, value))
            .map_err(|_| GfxError::device_lost(format!("{} queue is disconnected", engine)))
    }

    fn wait_fences(&self, handles: &[GfxWaitHandle]) -> GfxResult<()> {
        let _span = tracy_client::span!("GfxSoftDevice::wait_fences");

        for handle in handles {
            let fence = self.shared.fence(handle.fence)?;
            let mut value = fence.value.lock()?;
            while *value < handle.value {
                self.shared.check_lost()?;
                value = fence.cond.wait_timeout(value, WAIT_TICK)?.0;
            }
        }
        self.shared.check_lost()?;

        if !handles.is_empty() {
            self.push_event(GfxSoftEvent::Wait {
                handles: handles.to_vec(),
            })?;
        }
        Ok(())
    }

    fn create_command_allocator(&self, engine: GfxEngine, debug_name: &str) -> GfxResult<GfxAllocatorId> {
        self.shared.check_lost()?;
        Ok(self.shared.allocators.lock()?.insert(GfxSoftAllocator {
            engine,
            name: debug_name.to_string(),
        }))
    }

    fn reset_command_allocator(&self, allocator: GfxAllocatorId) -> GfxResult<()> {
        self.shared.check_lost()?;
        let event = {
            let allocators = self.shared.allocators.lock()?;
            let allocator = allocators
                .get(allocator)
                .ok_or_else(|| GfxError::invalid(format!("unknown command allocator {:?}", allocator)))?;
            GfxSoftEvent::AllocatorReset {
                engine: allocator.engine,
                name: allocator.name.clone(),
            }
        };
        self.push_event(event)
    }

    fn execute_command_lists(&self, engine: GfxEngine, lists: &[Arc<GfxRecordedList>]) -> GfxResult<()> {
        self.shared.check_lost()?;
        self.push_event(GfxSoftEvent::Submit {
            engine,
            lists: lists.iter().map(|list| list.debug_name.clone()).collect(),
        })?;
        self.shared.counters.submitted_lists.fetch_add(lists.len() as u64, Ordering::Relaxed);
        self.queue(engine)?
            .send(GfxSoftJob::Execute(lists.to_vec()))
            .map_err(|_| GfxError::device_lost(format!("{} queue is disconnected", engine)))
    }

    fn acceleration_structure_prebuild_info(
        &self,
        inputs: &GfxAccelerationInputs,
        flags: vk::BuildAccelerationStructureFlagsKHR,
    ) -> GfxPrebuildInfo {
        soft_prebuild_info(inputs, flags)
    }
}

/// 尺寸只和图元数量有关
fn soft_prebuild_info(inputs: &GfxAccelerationInputs, flags: vk::BuildAccelerationStructureFlagsKHR) -> GfxPrebuildInfo {
    let primitives = inputs.primitive_count().max(1) as u64;
    let per_primitive = if flags.contains(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE) { 64 } else { 48 };
    let align = |v: u64| v.div_ceil(256) * 256;
    GfxPrebuildInfo {
        result_size: align(size_of::<GfxSoftAccelerationHeader>() as u64 + primitives * per_primitive),
        scratch_size: align(primitives * 32),
        update_scratch_size: align(primitives * 8),
    }
}

fn read_header(memory: &GfxSoftMemory) -> Option<GfxSoftAccelerationHeader> {
    let bytes = memory.bytes.read().ok()?;
    let header_size = size_of::<GfxSoftAccelerationHeader>();
    if bytes.len() < header_size {
        return None;
    }
    let header: GfxSoftAccelerationHeader = bytemuck::pod_read_unaligned(&bytes[..header_size]);
    (header.magic == GfxSoftAccelerationHeader::MAGIC).then_some(header)
}

impl GfxSoftShared {
    fn check_lost(&self) -> GfxResult<()> {
        match self.lost.read()?.as_ref() {
            Some(reason) => Err(GfxError::device_lost(reason.clone())),
            None => Ok(()),
        }
    }

    fn lose(&self, reason: &str) {
        log::error!("soft device lost: {}", reason);
        if let Ok(mut lost) = self.lost.write() {
            lost.get_or_insert_with(|| reason.to_string());
        }
        if let Ok(fences) = self.fences.read() {
            for fence in fences.values() {
                fence.cond.notify_all();
            }
        }
    }

    fn memory(&self, memory: GfxMemoryId) -> GfxResult<Arc<GfxSoftMemory>> {
        self.memories
            .read()?
            .get(memory)
            .cloned()
            .ok_or_else(|| GfxError::device_lost(format!("access to released memory {:?}", memory)))
    }

    fn fence(&self, fence: GfxFenceId) -> GfxResult<Arc<GfxSoftFence>> {
        self.fences
            .read()?
            .get(fence)
            .cloned()
            .ok_or_else(|| GfxError::invalid(format!("unknown fence {:?}", fence)))
    }

    fn execute(&self, command: &GfxCommand) -> GfxResult<()> {
        let counters = &self.counters;
        counters.commands.fetch_add(1, Ordering::Relaxed);

        match command {
            GfxCommand::Barrier(_) => {
                counters.barriers.fetch_add(1, Ordering::Relaxed);
            }
            GfxCommand::CopyBuffer(copy) => {
                counters.copies.fetch_add(1, Ordering::Relaxed);
                let data = self.read_range(copy.src, copy.src_offset, copy.size)?;
                self.write_range(copy.dst, copy.dst_offset, &data)?;
            }
            GfxCommand::CopyTexture(copy) => {
                counters.copies.fetch_add(1, Ordering::Relaxed);
                self.copy_texture(copy)?;
            }
            GfxCommand::CopyResource { src, dst, size } => {
                counters.copies.fetch_add(1, Ordering::Relaxed);
                let data = self.read_range(*src, 0, *size)?;
                self.write_range(*dst, 0, &data)?;
            }
            GfxCommand::ClearUnorderedAccess(fill)
            | GfxCommand::ClearRenderTarget(fill)
            | GfxCommand::ClearDepthStencil(fill) => {
                counters.clears.fetch_add(1, Ordering::Relaxed);
                self.fill(fill)?;
            }
            GfxCommand::BuildAccelerationStructure(build) => {
                counters.builds.fetch_add(1, Ordering::Relaxed);
                self.build_acceleration_structure(build)?;
            }
            GfxCommand::Draw { .. } | GfxCommand::DrawIndexed { .. } => {
                counters.draws.fetch_add(1, Ordering::Relaxed);
            }
            GfxCommand::Dispatch { .. } | GfxCommand::DispatchRays { .. } => {
                counters.dispatches.fetch_add(1, Ordering::Relaxed);
            }
            GfxCommand::SetRootView { memory, .. }
            | GfxCommand::SetVertexBuffer { memory, .. }
            | GfxCommand::SetIndexBuffer { memory, .. } => {
                self.memory(*memory)?;
            }
            GfxCommand::SetPipeline { .. }
            | GfxCommand::SetConstants { .. }
            | GfxCommand::SetDescriptorTable { .. }
            | GfxCommand::SetViewport(_) => {}
        }
        Ok(())
    }

    fn read_range(&self, memory: GfxMemoryId, offset: u64, size: u64) -> GfxResult<Vec<u8>> {
        let memory = self.memory(memory)?;
        let bytes = memory.bytes.read()?;
        let range = checked_range(&memory.name, bytes.len(), offset, size)?;
        Ok(bytes[range].to_vec())
    }

    fn write_range(&self, memory: GfxMemoryId, offset: u64, data: &[u8]) -> GfxResult<()> {
        let memory = self.memory(memory)?;
        let mut bytes = memory.bytes.write()?;
        let range = checked_range(&memory.name, bytes.len(), offset, data.len() as u64)?;
        bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn copy_texture(&self, copy: &GfxTextureCopy) -> GfxResult<()> {
        let [width, height, depth] = copy.extent;
        let row_bytes = width as u64 * copy.src_footprint.texel_size as u64;
        for z in 0..depth {
            for y in 0..height {
                let [sx, sy, sz] = copy.src_origin;
                let [dx, dy, dz] = copy.dst_origin;
                let row = self.read_range(copy.src, copy.src_footprint.texel_offset(sx, sy + y, sz + z), row_bytes)?;
                self.write_range(copy.dst, copy.dst_footprint.texel_offset(dx, dy + y, dz + z), &row)?;
            }
        }
        Ok(())
    }

    fn fill(&self, fill: &GfxFill) -> GfxResult<()> {
        if fill.pattern.is_empty() {
            return Err(GfxError::device_lost("clear with an empty pattern"));
        }
        let memory = self.memory(fill.memory)?;
        let mut bytes = memory.bytes.write()?;
        for region in &fill.regions {
            for row in 0..region.rows as u64 {
                let offset = region.offset + row * region.row_pitch;
                let range = checked_range(&memory.name, bytes.len(), offset, region.row_bytes)?;
                for (dst, src) in bytes[range].iter_mut().zip(fill.pattern.iter().cycle()) {
                    *dst = *src;
                }
            }
        }
        Ok(())
    }

    fn build_acceleration_structure(&self, build: &GfxAccelerationBuild) -> GfxResult<()> {
        let info = soft_prebuild_info(&build.inputs, build.flags);
        let is_update = build.mode == vk::BuildAccelerationStructureModeKHR::UPDATE;

        let scratch = self.memory(build.scratch)?;
        let required_scratch = if is_update { info.update_scratch_size } else { info.scratch_size };
        let scratch_len = scratch.bytes.read()?.len() as u64;
        if scratch_len < required_scratch {
            return Err(GfxError::device_lost(format!(
                "scratch {} holds {} bytes, build needs {}",
                scratch.name, scratch_len, required_scratch
            )));
        }

        let dst = self.memory(build.dst)?;
        let dst_len = dst.bytes.read()?.len() as u64;
        if dst_len < info.result_size {
            return Err(GfxError::device_lost(format!(
                "result {} holds {} bytes, build needs {}",
                dst.name, dst_len, info.result_size
            )));
        }

        let refits = if is_update {
            if build.src != Some(build.dst) {
                return Err(GfxError::device_lost(format!("update of {} must be in place", dst.name)));
            }
            let previous = read_header(&dst)
                .ok_or_else(|| GfxError::device_lost(format!("update of {} without a prior build", dst.name)))?;
            if !previous.allows_update() || previous.primitive_count != build.inputs.primitive_count() {
                return Err(GfxError::device_lost(format!("{} cannot be refit with these inputs", dst.name)));
            }
            previous.refits + 1
        } else {
            0
        };

        if let GfxAccelerationInputs::TopLevel {
            instances,
            instance_offset,
            instance_count,
        } = &build.inputs
        {
            let records = self.read_range(*instances, *instance_offset, *instance_count as u64 * GfxInstanceRecord::SIZE)?;
            for chunk in records.chunks_exact(GfxInstanceRecord::SIZE as usize) {
                let record: GfxInstanceRecord = bytemuck::pod_read_unaligned(chunk);
                let blas = self.memory(record.blas())?;
                match read_header(&blas) {
                    Some(header) if header.level == vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL.as_raw() => {}
                    _ => {
                        return Err(GfxError::device_lost(format!(
                            "instance {} references {} which is not a built bottom level structure",
                            record.id(),
                            blas.name
                        )));
                    }
                }
            }
        }

        let header = GfxSoftAccelerationHeader {
            magic: GfxSoftAccelerationHeader::MAGIC,
            level: build.inputs.level().as_raw(),
            primitive_count: build.inputs.primitive_count(),
            flags: build.flags.as_raw(),
            refits,
            _padding: [0; 3],
        };
        self.write_range(build.dst, 0, bytemuck::bytes_of(&header))?;

        self.journal.lock()?.push(GfxSoftEvent::AccelerationBuild {
            memory: build.dst,
            mode: build.mode,
            primitive_count: header.primitive_count,
        });
        Ok(())
    }
}

fn checked_range(name: &str, len: usize, offset: u64, size: u64) -> GfxResult<std::ops::Range<usize>> {
    let end = offset.checked_add(size).filter(|end| *end <= len as u64).ok_or_else(|| {
        GfxError::device_lost(format!("access {}+{} is out of bounds of {} ({} bytes)", offset, size, name, len))
    })?;
    Ok(offset as usize..end as usize)
}

struct GfxSoftMapping {
    memory: Arc<GfxSoftMemory>,
}

impl GfxMappedMemory for GfxSoftMapping {
    fn size(&self) -> u64 {
        self.memory.bytes.read().map(|bytes| bytes.len() as u64).unwrap_or(0)
    }

    fn write_bytes(&self, offset: u64, data: &[u8]) -> GfxResult<()> {
        let mut bytes = self.memory.bytes.write()?;
        let range = checked_range(&self.memory.name, bytes.len(), offset, data.len() as u64)
            .map_err(|e| GfxError::invalid(e.to_string()))?;
        bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn read_bytes(&self, offset: u64, out: &mut [u8]) -> GfxResult<()> {
        let bytes = self.memory.bytes.read()?;
        let range = checked_range(&self.memory.name, bytes.len(), offset, out.len() as u64)
            .map_err(|e| GfxError::invalid(e.to_string()))?;
        out.copy_from_slice(&bytes[range]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{
        barrier::GfxBarrier,
        command::{GfxBufferCopy, GfxFillRegion},
        command_allocator::GfxCommandAllocator,
        command_list::GfxCommandList,
    };

    fn run(device: &Arc<GfxSoftDevice>, engine: GfxEngine, commands: Vec<GfxCommand>) -> GfxResult<()> {
        let allocator = Arc::new(GfxCommandAllocator::new(device.clone(), engine, "alloc")?);
        let mut list = GfxCommandList::new(engine, "list");
        list.begin(allocator)?;
        for command in commands {
            list.record(command)?;
        }
        let (recorded, _) = list.close()?;
        let fence = device.create_fence(0, "fence")?;
        device.execute_command_lists(engine, &[recorded])?;
        device.signal_fence(engine, fence, 1)?;
        device.wait_fences(&[GfxWaitHandle { fence, value: 1 }])
    }

    fn read(device: &GfxSoftDevice, memory: GfxMemoryId, size: usize) -> Vec<u8> {
        let mut out = vec![0; size];
        device.map_memory(memory).unwrap().read_bytes(0, &mut out).unwrap();
        out
    }

    #[test]
    fn test_copy_and_fill_modify_memory() {
        let device = Arc::new(GfxSoftDevice::new());
        let src = device.create_memory(8, GfxMemoryHeap::Upload, "src").unwrap();
        let dst = device.create_memory(8, GfxMemoryHeap::Readback, "dst").unwrap();
        device.map_memory(src).unwrap().write_bytes(0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        run(
            &device,
            GfxEngine::Compute,
            vec![
                GfxCommand::CopyBuffer(GfxBufferCopy {
                    src,
                    src_offset: 4,
                    dst,
                    dst_offset: 0,
                    size: 4,
                }),
                GfxCommand::ClearUnorderedAccess(GfxFill {
                    memory: dst,
                    regions: vec![GfxFillRegion {
                        offset: 4,
                        row_bytes: 4,
                        rows: 1,
                        row_pitch: 4,
                    }],
                    pattern: vec![9, 9],
                }),
                GfxCommand::Barrier(GfxBarrier::UnorderedAccess { memory: None }),
            ],
        )
        .unwrap();

        assert_eq!(read(&device, dst, 8), vec![5, 6, 7, 8, 9, 9, 9, 9]);
        let stats = device.stats();
        assert_eq!((stats.copies, stats.clears, stats.barriers), (1, 1, 1));
    }

    #[test]
    fn test_out_of_bounds_loses_device() {
        let device = Arc::new(GfxSoftDevice::new());
        let a = device.create_memory(4, GfxMemoryHeap::DeviceLocal, "a").unwrap();
        let result = run(
            &device,
            GfxEngine::Copy,
            vec![GfxCommand::CopyResource { src: a, dst: a, size: 16 }],
        );
        assert!(matches!(result, Err(GfxError::DeviceLost(_))));
        assert!(device.is_lost());
        assert!(matches!(device.create_memory(4, GfxMemoryHeap::Upload, "b"), Err(GfxError::DeviceLost(_))));
    }

    #[test]
    fn test_journal_records_in_call_order() {
        let device = Arc::new(GfxSoftDevice::new());
        let allocator = device.create_command_allocator(GfxEngine::Graphics, "frame-0").unwrap();
        let fence = device.create_fence(0, "fence").unwrap();
        device.signal_fence(GfxEngine::Graphics, fence, 1).unwrap();
        device.wait_fences(&[GfxWaitHandle { fence, value: 1 }]).unwrap();
        device.reset_command_allocator(allocator).unwrap();

        let journal = device.journal();
        assert!(matches!(journal[0], GfxSoftEvent::Signal { value: 1, .. }));
        assert!(matches!(journal[1], GfxSoftEvent::Wait { .. }));
        assert_eq!(
            journal[2],
            GfxSoftEvent::AllocatorReset {
                engine: GfxEngine::Graphics,
                name: "frame-0".to_string()
            }
        );
    }

    #[test]
    fn test_wait_returns_device_lost() {
        let device = Arc::new(GfxSoftDevice::new());
        let fence = device.create_fence(0, "fence").unwrap();

        let waiter = {
            let device = device.clone();
            std::thread::spawn(move || device.wait_fences(&[GfxWaitHandle { fence, value: 1 }]))
        };
        device.lose_device("unit test");
        assert!(matches!(waiter.join().unwrap(), Err(GfxError::DeviceLost(_))));
    }

    #[test]
    fn test_release_memory() {
        let device = GfxSoftDevice::new();
        let memory = device.create_memory(16, GfxMemoryHeap::DeviceLocal, "memory").unwrap();
        assert_eq!(device.live_memory_count(), 1);
        assert!(device.map_memory(memory).is_err());
        device.release_memory(memory);
        assert_eq!(device.live_memory_count(), 0);
    }
}
