use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use prism_gfx::{
    GfxError, GfxResult,
    basic::engine::GfxEngine,
    commands::{
        command_allocator::GfxCommandAllocator,
        command_list::{GfxCommandList, GfxRecordedList},
    },
    gfx_context::GfxContext,
};

use crate::{
    context::{GpuCommandContext, GpuTag},
    process::GpuProcess,
};

/// 调度器与 worker 线程共享的录制状态
///
/// 每个 (slot, engine) 有一个 command list；slot 0 属于 submitter 线程，
/// slot i 属于第 i 个 worker，所以每个 list 在 Active 期间只被一个线程访问。
pub(crate) struct GpuRecorder {
    ctx: Arc<GfxContext>,

    /// [slot][engine]
    slots: Vec<[Mutex<GfxCommandList>; GfxEngine::COUNT]>,
    /// [frame][engine][slot]
    allocators: Vec<[Vec<Arc<GfxCommandAllocator>>; GfxEngine::COUNT]>,
    current_frame: AtomicUsize,

    /// worker 上的录制错误，由下一次 flush 返回
    errors: Mutex<Vec<GfxError>>,
    closed: AtomicBool,

    processes_recorded: AtomicU64,
}
// new & init
impl GpuRecorder {
    pub fn new(ctx: Arc<GfxContext>, buffering: usize, slot_count: usize) -> GfxResult<Self> {
        let slots = (0..slot_count)
            .map(|slot| {
                GfxEngine::ALL.map(|engine| Mutex::new(GfxCommandList::new(engine, &format!("{engine}-slot{slot}"))))
            })
            .collect();

        let mut allocators = Vec::with_capacity(buffering);
        for frame in 0..buffering {
            let mut per_engine: [Vec<Arc<GfxCommandAllocator>>; GfxEngine::COUNT] = Default::default();
            for engine in GfxEngine::ALL {
                for slot in 0..slot_count {
                    per_engine[engine.index()].push(Arc::new(GfxCommandAllocator::new(
                        ctx.device().clone(),
                        engine,
                        &format!("{engine}-frame{frame}-slot{slot}"),
                    )?));
                }
            }
            allocators.push(per_engine);
        }

        Ok(Self {
            ctx,
            slots,
            allocators,
            current_frame: AtomicUsize::new(0),
            errors: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            processes_recorded: AtomicU64::new(0),
        })
    }
}
// getters
impl GpuRecorder {
    #[inline]
    pub fn ctx(&self) -> &Arc<GfxContext> {
        &self.ctx
    }

    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn processes_recorded(&self) -> u64 {
        self.processes_recorded.load(Ordering::Relaxed)
    }

    /// 是否有尚未提交的录制
    pub fn any_active(&self) -> GfxResult<bool> {
        for lists in &self.slots {
            for list in lists {
                if list.lock()?.is_active() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
// tools
impl GpuRecorder {
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn set_current_frame(&self, frame: usize) {
        self.current_frame.store(frame, Ordering::Release);
    }

    /// 在 slot 的 command list 上录制一个 process，list 尚未开始时使用当前帧的 allocator 开始
    pub fn record(&self, slot: usize, process: &mut dyn GpuProcess, tag: Option<GpuTag>) -> GfxResult<()> {
        let engine = process.required_engine();
        let mut cmd = self.slots[slot][engine.index()].lock()?;
        if !cmd.is_active() {
            let allocator = self.allocators[self.current_frame()][engine.index()][slot].clone();
            cmd.begin(allocator)?;
        }

        let mut context = GpuCommandContext::new(&self.ctx, &mut cmd, tag);
        process.record(&mut context)?;
        self.processes_recorded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 按 slot 顺序关闭 engine 上所有 Active 的 list，并执行它们延迟的描述符拷贝
    pub fn close_engine(&self, engine: GfxEngine) -> GfxResult<Vec<Arc<GfxRecordedList>>> {
        let mut lists = Vec::new();
        for slot in &self.slots {
            let mut cmd = slot[engine.index()].lock()?;
            if !cmd.is_active() {
                continue;
            }
            let (list, copies) = cmd.close()?;
            self.ctx.heaps().apply_deferred_copies(&copies)?;
            lists.push(list);
        }
        Ok(lists)
    }

    /// 调用方需要保证该帧的 list 已经在 GPU 上执行完毕
    pub fn reset_frame(&self, frame: usize) -> GfxResult<()> {
        for per_engine in &self.allocators[frame] {
            for allocator in per_engine {
                allocator.reset()?;
            }
        }
        Ok(())
    }

    pub fn push_error(&self, error: GfxError) {
        match self.errors.lock() {
            Ok(mut errors) => errors.push(error),
            Err(_) => log::error!("error list poisoned, dropping: {}", error),
        }
    }

    pub fn take_errors(&self) -> GfxResult<Vec<GfxError>> {
        Ok(std::mem::take(&mut *self.errors.lock()?))
    }
}
