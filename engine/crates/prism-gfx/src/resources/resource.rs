use std::sync::{Arc, Mutex};

use crate::{
    commands::barrier::GfxResourceState,
    error::{GfxError, GfxResult},
    foundation::device::{GfxMappedMemory, GfxMemoryHeap, GfxMemoryId},
    gfx_context::GfxContext,
    resources::{
        desc::{GfxCpuAccess, GfxResourceDesc, GfxResourceDimension, GfxResourceUsage},
        footprint::GfxFootprints,
    },
};

/// 懒创建的 staging 资源
#[derive(Default)]
pub(crate) struct GfxStagingTwins {
    pub(crate) upload: Option<GfxResource>,
    pub(crate) download: Option<GfxResource>,
}

pub(crate) struct GfxResourceInner {
    ctx: Arc<GfxContext>,
    desc: GfxResourceDesc,
    memory: GfxMemoryId,
    heap: GfxMemoryHeap,
    footprints: GfxFootprints,

    /// 最近一次录制的使用状态
    pub(crate) last_state: Mutex<GfxResourceState>,
    /// CPU 可见内存只 map 一次
    pub(crate) mapping: Mutex<Option<Arc<dyn GfxMappedMemory>>>,
    pub(crate) staging: Mutex<GfxStagingTwins>,

    debug_name: String,
}

impl Drop for GfxResourceInner {
    fn drop(&mut self) {
        log::debug!("Dropping resource: {}", self.debug_name);
        self.ctx.device().release_memory(self.memory);
    }
}

/// GPU 内存对象的引用计数句柄
///
/// clone 只增加引用计数；最后一个句柄释放时归还设备内存，由持有最后一个引用的线程完成。
#[derive(Clone)]
pub struct GfxResource {
    pub(crate) inner: Arc<GfxResourceInner>,
}
// new & init
impl GfxResource {
    pub fn new(ctx: &Arc<GfxContext>, desc: GfxResourceDesc, debug_name: &str) -> GfxResult<Self> {
        let footprints = GfxFootprints::compute(&desc)?;
        let heap = desc.cpu_access.heap();
        if heap.is_cpu_visible() && !desc.is_buffer() {
            return Err(GfxError::invalid(format!(
                "{}: cpu accessible resources must be buffers, use a staging copy for textures",
                debug_name
            )));
        }

        let memory = ctx.device().create_memory(footprints.total_size, heap, debug_name)?;

        // upload 与 readback heap 上的资源状态固定
        let initial_state = match heap {
            GfxMemoryHeap::Upload => GfxResourceState::GENERIC_READ,
            GfxMemoryHeap::Readback => GfxResourceState::COPY_DST,
            GfxMemoryHeap::DeviceLocal if desc.usage.contains(GfxResourceUsage::ACCELERATION_STRUCTURE) => {
                GfxResourceState::ACCELERATION_STRUCTURE
            }
            GfxMemoryHeap::DeviceLocal => GfxResourceState::COMMON,
        };

        Ok(Self {
            inner: Arc::new(GfxResourceInner {
                ctx: ctx.clone(),
                desc,
                memory,
                heap,
                footprints,
                last_state: Mutex::new(initial_state),
                mapping: Mutex::new(None),
                staging: Mutex::new(GfxStagingTwins::default()),
                debug_name: debug_name.to_string(),
            }),
        })
    }
}
// getters
impl GfxResource {
    #[inline]
    pub fn ctx(&self) -> &Arc<GfxContext> {
        &self.inner.ctx
    }

    #[inline]
    pub fn desc(&self) -> &GfxResourceDesc {
        &self.inner.desc
    }

    #[inline]
    pub fn dimension(&self) -> GfxResourceDimension {
        self.inner.desc.dimension
    }

    #[inline]
    pub fn cpu_access(&self) -> GfxCpuAccess {
        self.inner.desc.cpu_access
    }

    #[inline]
    pub fn memory(&self) -> GfxMemoryId {
        self.inner.memory
    }

    #[inline]
    pub fn heap(&self) -> GfxMemoryHeap {
        self.inner.heap
    }

    #[inline]
    pub fn footprints(&self) -> &GfxFootprints {
        &self.inner.footprints
    }

    /// 内存大小（字节）
    #[inline]
    pub fn size(&self) -> u64 {
        self.inner.footprints.total_size
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.inner.debug_name
    }

    /// 当前存活的句柄数量
    #[inline]
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    #[inline]
    pub fn ptr_eq(&self, other: &GfxResource) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
// tools
impl GfxResource {
    /// CPU 可见资源的映射，第一次调用时 map，之后复用
    pub fn mapped(&self) -> GfxResult<Arc<dyn GfxMappedMemory>> {
        if !self.inner.heap.is_cpu_visible() {
            return Err(GfxError::invalid(format!("{} is not cpu accessible", self.inner.debug_name)));
        }

        let mut mapping = self.inner.mapping.lock()?;
        if let Some(mapping) = mapping.as_ref() {
            return Ok(mapping.clone());
        }
        let mapped = self.inner.ctx.device().map_memory(self.inner.memory)?;
        *mapping = Some(mapped.clone());
        Ok(mapped)
    }
}

impl std::fmt::Debug for GfxResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GfxResource")
            .field("name", &self.inner.debug_name)
            .field("dimension", &self.inner.desc.dimension)
            .field("memory", &self.inner.memory)
            .field("size", &self.size())
            .finish()
    }
}
