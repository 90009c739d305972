use std::{collections::HashMap, sync::Arc};

use crate::{
    basic::engine::GfxEngine,
    commands::{command::GfxCommand, command_allocator::GfxCommandAllocator},
    descriptors::descriptor::GfxDescriptorSource,
    error::{GfxError, GfxResult},
    foundation::device::{GfxAllocatorId, GfxMemoryId},
    resources::{resource::GfxResource, view::GfxView},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GfxRecordingState {
    Inactive,
    Active,
}

/// 延迟到 flush 时执行的描述符拷贝：CPU 描述符 -> shader visible 描述符区间
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GfxDescriptorCopyBatch {
    pub src: Vec<GfxDescriptorSource>,
    /// 目标区间的起点与长度，长度之和等于 `src.len()`
    pub dst_ranges: Vec<(u32, u32)>,
}

impl GfxDescriptorCopyBatch {
    pub fn push_range(&mut self, src: impl IntoIterator<Item = GfxDescriptorSource>, dst_start: u32) {
        let before = self.src.len();
        self.src.extend(src);
        let count = (self.src.len() - before) as u32;
        if count > 0 {
            self.dst_ranges.push((dst_start, count));
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.src.len()
    }
}

/// 录制完成的 list，提交之后由 allocator 持有到下一次 reset
///
/// 命令只保存 memory id，list 引用的资源与 view 由 `resources`、`views` 持有，
/// 直到 allocator reset（该帧的 signal 完成）之后才可能被释放。
#[derive(Debug)]
pub struct GfxRecordedList {
    pub engine: GfxEngine,
    pub allocator: GfxAllocatorId,
    pub debug_name: String,
    pub commands: Vec<GfxCommand>,

    pub resources: Vec<GfxResource>,
    /// 延迟拷贝的描述符属于这些 view
    pub views: Vec<GfxView>,
}

/// 一个 (engine, 线程) 对应的录制槽位
///
/// `begin` 之后处于 Active 状态，绑定到某一帧的 allocator；`close` 之后回到 Inactive。
pub struct GfxCommandList {
    engine: GfxEngine,
    state: GfxRecordingState,
    commands: Vec<GfxCommand>,
    allocator: Option<Arc<GfxCommandAllocator>>,
    descriptor_copies: GfxDescriptorCopyBatch,

    /// 本次录制引用的资源，按 memory id 去重
    resources: HashMap<GfxMemoryId, GfxResource>,
    /// 按 view 的身份去重
    views: HashMap<usize, GfxView>,

    debug_name: String,
}
// new & init
impl GfxCommandList {
    pub fn new(engine: GfxEngine, debug_name: &str) -> Self {
        Self {
            engine,
            state: GfxRecordingState::Inactive,
            commands: Vec::new(),
            allocator: None,
            descriptor_copies: GfxDescriptorCopyBatch::default(),
            resources: HashMap::new(),
            views: HashMap::new(),
            debug_name: debug_name.to_string(),
        }
    }
}
// getters
impl GfxCommandList {
    #[inline]
    pub fn engine(&self) -> GfxEngine {
        self.engine
    }

    #[inline]
    pub fn state(&self) -> GfxRecordingState {
        self.state
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == GfxRecordingState::Active
    }

    /// 当前已经录制、尚未 close 的命令
    #[inline]
    pub fn commands(&self) -> &[GfxCommand] {
        &self.commands
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// 当前录制持有的资源数量
    #[inline]
    pub fn retained_resource_count(&self) -> usize {
        self.resources.len()
    }
}
// 录制
impl GfxCommandList {
    pub fn begin(&mut self, allocator: Arc<GfxCommandAllocator>) -> GfxResult<()> {
        if self.is_active() {
            return Err(GfxError::invalid(format!("command list {} is already recording", self.debug_name)));
        }
        if allocator.engine() != self.engine {
            return Err(GfxError::invalid(format!(
                "allocator {} belongs to {} engine, list {} records {}",
                allocator.debug_name(),
                allocator.engine(),
                self.debug_name,
                self.engine
            )));
        }

        self.allocator = Some(allocator);
        self.state = GfxRecordingState::Active;
        Ok(())
    }

    /// 结束录制，返回的 list 已经交给 allocator 保管
    ///
    /// 同时取出延迟的描述符拷贝，调用方必须在提交之前执行它们。
    pub fn close(&mut self) -> GfxResult<(Arc<GfxRecordedList>, GfxDescriptorCopyBatch)> {
        let allocator = match (self.state, self.allocator.take()) {
            (GfxRecordingState::Active, Some(allocator)) => allocator,
            _ => return Err(GfxError::invalid(format!("command list {} is not recording", self.debug_name))),
        };
        self.state = GfxRecordingState::Inactive;

        let recorded = Arc::new(GfxRecordedList {
            engine: self.engine,
            allocator: allocator.id(),
            debug_name: self.debug_name.clone(),
            commands: std::mem::take(&mut self.commands),
            resources: std::mem::take(&mut self.resources).into_values().collect(),
            views: std::mem::take(&mut self.views).into_values().collect(),
        });
        allocator.retain(recorded.clone())?;

        Ok((recorded, std::mem::take(&mut self.descriptor_copies)))
    }

    pub fn record(&mut self, command: GfxCommand) -> GfxResult<()> {
        if !self.is_active() {
            return Err(GfxError::invalid(format!(
                "{} recorded into inactive command list {}",
                command.name(),
                self.debug_name
            )));
        }
        if command.requires_raster() && !self.engine.supports_raster() {
            return Err(GfxError::invalid(format!("{} is not supported on the {} engine", command.name(), self.engine)));
        }
        if command.requires_compute() && !self.engine.supports_compute() {
            return Err(GfxError::invalid(format!("{} is not supported on the {} engine", command.name(), self.engine)));
        }

        self.commands.push(command);
        Ok(())
    }

    /// 描述符表的拷贝在 flush 时批量执行
    ///
    /// `views` 是 `src` 中 CPU 描述符所属的 view，保证拷贝与执行时描述符仍然有效
    pub fn defer_descriptor_copy(
        &mut self,
        src: impl IntoIterator<Item = GfxDescriptorSource>,
        dst_start: u32,
        views: &[GfxView],
    ) {
        for view in views {
            self.retain_view(view);
        }
        self.descriptor_copies.push_range(src, dst_start);
    }

    /// 在 list 执行完毕之前保持资源存活
    pub fn retain_resource(&mut self, resource: &GfxResource) {
        self.resources.entry(resource.memory()).or_insert_with(|| resource.clone());
    }

    /// 保持 view 及其描述符存活
    pub fn retain_view(&mut self, view: &GfxView) {
        self.retain_resource(view.resource());
        self.views.entry(view.identity()).or_insert_with(|| view.clone());
    }
}
