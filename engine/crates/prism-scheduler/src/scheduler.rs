use std::{
    any::Any,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, ThreadId},
};

use crossbeam_utils::sync::WaitGroup;
use itertools::Itertools;
use prism_gfx::{
    GfxError, GfxResult,
    basic::engine::{GfxEngine, GfxEngineMask},
    commands::{barrier::GfxResourceState, queue::GfxQueueChannel},
    foundation::device::GfxDevice,
    gfx_context::GfxContext,
    resources::{desc::GfxResourceUsage, view::GfxView},
};

use crate::{
    context::GpuTag,
    process::{self, GpuProcess},
    recorder::GpuRecorder,
    settings::GpuSchedulerSettings,
    signal::GpuSignal,
    worker::{GpuWorkItem, GpuWorkerPool},
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GpuSchedulerStats {
    pub frames_started: u64,
    pub frames_finished: u64,
    pub processes_recorded: u64,
    pub lists_submitted: u64,
}

#[derive(Default)]
struct GpuFrameState {
    /// 当前帧使用的 slot，等于 frame_index % buffering
    frame: usize,
    frame_index: u64,
    in_frame: bool,
    /// 每个帧 slot 上一次 finish 时的 signal
    signals: Vec<Option<GpuSignal>>,

    render_targets: Vec<GfxView>,
    current_target: Option<GfxView>,
}

/// GPU 工作的调度器
///
/// 创建调度器的线程是 submitter 线程：只有它可以同步 enqueue、flush 以及推进帧。
/// 异步 process 由 worker 线程录制，`flush_and_signal` 是它们的 join 点。
///
/// # 帧流水线
/// 1. `setup_frame`：等待该帧 slot 上一次的 signal，重置该 slot 的 allocator，
///    重新开始描述符的帧区域，并把当前 render target 迁移到 render target 状态
/// 2. 录制、flush
/// 3. `finish_frame`：提交所有工作，把 render target 迁移到 present 状态，
///    记录这一帧的 signal；关闭 frame buffering 时立即等待
pub struct GpuScheduler {
    settings: GpuSchedulerSettings,
    recorder: Arc<GpuRecorder>,
    /// 按 engine 下标
    queues: Vec<GfxQueueChannel>,
    pool: GpuWorkerPool,

    /// 所有已经 enqueue、尚未录制的异步 process
    join: Mutex<WaitGroup>,
    submitter: ThreadId,
    tag: Mutex<Option<GpuTag>>,

    frames: Mutex<GpuFrameState>,
    /// 自上一次 finish_frame 以来所有 flush 的 signal
    submitted: Mutex<GpuSignal>,

    frames_started: AtomicU64,
    frames_finished: AtomicU64,
    lists_submitted: AtomicU64,
}
// new & init
impl GpuScheduler {
    pub fn new(device: Arc<dyn GfxDevice>, settings: GpuSchedulerSettings) -> GfxResult<Self> {
        settings.validate()?;
        let buffering = settings.buffering as usize;
        let slot_count = settings.worker_count as usize;

        let ctx = GfxContext::new(device.clone(), &settings.heaps, settings.limits.clone(), settings.buffering)?;
        let queues = GfxEngine::ALL
            .into_iter()
            .map(|engine| GfxQueueChannel::new(device.clone(), engine))
            .collect::<GfxResult<Vec<_>>>()?;
        let recorder = Arc::new(GpuRecorder::new(ctx, buffering, slot_count)?);
        let pool = GpuWorkerPool::new(&recorder, slot_count - 1)?;

        log::info!(
            "gpu scheduler created: {} buffered frames (frame buffering {}), {} workers",
            buffering,
            if settings.frame_buffering { "on" } else { "off" },
            slot_count - 1
        );

        Ok(Self {
            recorder,
            queues,
            pool,
            join: Mutex::new(WaitGroup::new()),
            submitter: thread::current().id(),
            tag: Mutex::new(None),
            frames: Mutex::new(GpuFrameState {
                signals: vec![None; buffering],
                ..Default::default()
            }),
            submitted: Mutex::new(GpuSignal::default()),
            frames_started: AtomicU64::new(0),
            frames_finished: AtomicU64::new(0),
            lists_submitted: AtomicU64::new(0),
            settings,
        })
    }
}
// getters
impl GpuScheduler {
    /// 创建资源、view 时使用的 GFX 上下文
    #[inline]
    pub fn gfx(&self) -> &Arc<GfxContext> {
        self.recorder.ctx()
    }

    #[inline]
    pub fn settings(&self) -> &GpuSchedulerSettings {
        &self.settings
    }

    #[inline]
    pub fn queue(&self, engine: GfxEngine) -> &GfxQueueChannel {
        &self.queues[engine.index()]
    }

    /// 当前帧的 slot
    #[inline]
    pub fn current_frame(&self) -> usize {
        self.recorder.current_frame()
    }

    pub fn stats(&self) -> GpuSchedulerStats {
        GpuSchedulerStats {
            frames_started: self.frames_started.load(Ordering::Relaxed),
            frames_finished: self.frames_finished.load(Ordering::Relaxed),
            processes_recorded: self.recorder.processes_recorded(),
            lists_submitted: self.lists_submitted.load(Ordering::Relaxed),
        }
    }
}
// tag & render targets
impl GpuScheduler {
    /// 之后 enqueue 的 process 都会带上这个 tag
    pub fn set_tag<T: Any + Send + Sync>(&self, tag: T) -> GfxResult<()> {
        *self.tag.lock()? = Some(Arc::new(tag));
        Ok(())
    }

    pub fn clear_tag(&self) -> GfxResult<()> {
        *self.tag.lock()? = None;
        Ok(())
    }

    /// 由 presentation 层提供的 render target，第 i 帧使用 `targets[i % len]`
    pub fn attach_render_targets(&self, targets: Vec<GfxView>) -> GfxResult<()> {
        if let Some(target) = targets
            .iter()
            .find(|target| !target.resource().desc().usage.contains(GfxResourceUsage::RENDER_TARGET))
        {
            return Err(GfxError::invalid(format!("{} is not a render target", target.debug_name())));
        }
        log::info!(
            "attached {} render targets: [{}]",
            targets.len(),
            targets.iter().map(|target| target.debug_name()).join(", ")
        );
        self.frames.lock()?.render_targets = targets;
        Ok(())
    }
}
// 录制与提交
impl GpuScheduler {
    /// 在当前线程上立即录制
    pub fn enqueue(&self, mut process: impl GpuProcess) -> GfxResult<()> {
        self.check_submitter("enqueue")?;
        let tag = self.tag.lock()?.clone();
        self.recorder.record(0, &mut process, tag)
    }

    /// 交给 worker 线程录制；队列已满时阻塞
    pub fn enqueue_async(&self, process: impl GpuProcess + 'static) -> GfxResult<()> {
        if self.recorder.is_closed() {
            return Err(GfxError::invalid("enqueue_async on a closed scheduler"));
        }
        let item = GpuWorkItem {
            process: Box::new(process),
            tag: self.tag.lock()?.clone(),
            join: self.join.lock()?.clone(),
        };
        self.pool.send(item)
    }

    /// 等待所有异步录制结束，提交 mask 中每个 engine 的 list，并返回对应的 signal
    ///
    /// 没有任何 list 的 engine 在 signal 中为 0。
    pub fn flush_and_signal(&self, mask: GfxEngineMask) -> GfxResult<GpuSignal> {
        let _span = tracy_client::span!("GpuScheduler::flush_and_signal");
        self.check_submitter("flush_and_signal")?;
        self.join_pending()?;

        let mut signal = GpuSignal::default();
        for engine in mask.engines() {
            let lists = self.recorder.close_engine(engine)?;
            if lists.is_empty() {
                continue;
            }

            let queue = &self.queues[engine.index()];
            queue.submit(&lists)?;
            let value = queue.signal_completion()?;
            signal.set(engine, value);
            self.lists_submitted.fetch_add(lists.len() as u64, Ordering::Relaxed);
            log::debug!("submitted {} lists on {}, signal {}", lists.len(), engine, value);
        }

        let mut submitted = self.submitted.lock()?;
        *submitted = submitted.merge(&signal);
        Ok(signal)
    }

    /// 阻塞直到 signal 中的所有 engine 都完成
    pub fn wait_for(&self, signal: &GpuSignal) -> GfxResult<()> {
        let _span = tracy_client::span!("GpuScheduler::wait_for");
        let handles = signal
            .pending()
            .map(|(engine, value)| self.queues[engine.index()].wait_handle(value))
            .collect_vec();
        if handles.is_empty() {
            return Ok(());
        }
        self.gfx().device().wait_fences(&handles)
    }

    fn join_pending(&self) -> GfxResult<()> {
        let join = std::mem::replace(&mut *self.join.lock()?, WaitGroup::new());
        join.wait();

        let mut errors = self.recorder.take_errors()?.into_iter();
        match errors.next() {
            Some(first) => {
                for other in errors {
                    log::error!("additional async recording error: {}", other);
                }
                Err(first)
            }
            None => Ok(()),
        }
    }

    fn check_submitter(&self, action: &str) -> GfxResult<()> {
        if thread::current().id() == self.submitter {
            Ok(())
        } else {
            Err(GfxError::invalid(format!(
                "{action} must be called on the submitter thread, called on {:?}",
                thread::current().name().unwrap_or("<unnamed>")
            )))
        }
    }
}
// 帧流水线
impl GpuScheduler {
    pub fn setup_frame(&self, frame_index: u64) -> GfxResult<()> {
        let _span = tracy_client::span!("GpuScheduler::setup_frame");
        self.check_submitter("setup_frame")?;

        let mut frames = self.frames.lock()?;
        if frames.in_frame {
            return Err(GfxError::invalid(format!(
                "setup_frame({frame_index}) called before finishing frame {}",
                frames.frame_index
            )));
        }

        // 帧之外录制、提交的工作使用了当前 slot 的 allocator，重置之前必须完成
        self.join_pending()?;
        if self.recorder.any_active()? {
            log::warn!("work recorded outside of a frame, flushing before frame {}", frame_index);
            self.flush_and_signal(GfxEngineMask::ALL)?;
        }
        let stray = std::mem::take(&mut *self.submitted.lock()?);
        if !stray.is_empty() {
            self.wait_for(&stray)?;
        }

        let frame = (frame_index % self.settings.buffering as u64) as usize;
        if let Some(signal) = frames.signals[frame].take() {
            if self.settings.frame_buffering {
                log::debug!("frame {}: waiting for slot {} ({:?})", frame_index, frame, signal);
                self.wait_for(&signal)?;
            }
        }

        self.recorder.reset_frame(frame)?;
        self.gfx().heaps().restart_for_frame(frame)?;
        self.recorder.set_current_frame(frame);

        frames.frame = frame;
        frames.frame_index = frame_index;
        frames.in_frame = true;
        frames.current_target = match frames.render_targets.len() {
            0 => None,
            len => Some(frames.render_targets[(frame_index % len as u64) as usize].clone()),
        };
        let target = frames.current_target.clone();
        drop(frames);

        if let Some(target) = target {
            self.enqueue(process::from_fn(GfxEngine::Graphics, |context| {
                context.add_barrier(&target, GfxResourceState::RENDER_TARGET)
            }))?;
        }

        self.frames_started.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 提交这一帧的全部工作，返回这一帧的 signal
    pub fn finish_frame(&self) -> GfxResult<GpuSignal> {
        let _span = tracy_client::span!("GpuScheduler::finish_frame");
        self.check_submitter("finish_frame")?;

        let target = {
            let frames = self.frames.lock()?;
            if !frames.in_frame {
                return Err(GfxError::invalid("finish_frame called without setup_frame"));
            }
            frames.current_target.clone()
        };

        // 先提交所有 slot 的工作，present 迁移必须排在它们之后
        self.flush_and_signal(GfxEngineMask::ALL)?;
        if let Some(target) = target {
            self.enqueue(process::from_fn(GfxEngine::Graphics, |context| {
                context.add_barrier(&target, GfxResourceState::PRESENT)
            }))?;
            self.flush_and_signal(GfxEngineMask::GRAPHICS)?;
        }
        let signal = std::mem::take(&mut *self.submitted.lock()?);

        let frame_index = {
            let mut frames = self.frames.lock()?;
            let frame = frames.frame;
            frames.signals[frame] = Some(signal);
            frames.in_frame = false;
            frames.frame_index
        };

        if !self.settings.frame_buffering {
            self.wait_for(&signal)?;
        }
        self.frames_finished.fetch_add(1, Ordering::Relaxed);
        log::debug!("frame {} finished: {:?}", frame_index, signal);
        Ok(signal)
    }
}

impl Drop for GpuScheduler {
    fn drop(&mut self) {
        self.recorder.close();
        self.pool.shutdown();

        for queue in &self.queues {
            if let Err(e) = queue.wait_idle() {
                log::warn!("queue {} did not drain on shutdown: {}", queue.engine(), e);
            }
        }
        log::info!("gpu scheduler shut down");
    }
}
