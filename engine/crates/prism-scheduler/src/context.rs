use std::{any::Any, sync::Arc};

use ash::vk;
use prism_gfx::{
    GfxError, GfxResult,
    basic::engine::GfxEngine,
    commands::{
        barrier::{GfxBarrier, GfxResourceState},
        clear::{GfxClearValue, encode_clear_pattern},
        command::{GfxCommand, GfxFill, GfxViewport},
        command_list::GfxCommandList,
    },
    gfx_context::GfxContext,
    pipelines::{
        binding::{GfxBindPoint, realize_bindings},
        pipeline::GfxPipeline,
    },
    raytracing::{
        geometry::GfxGeometryCollection,
        instance::GfxInstanceCollection,
        versioning::{GfxBuildOptions, GfxCollectionState},
    },
    resources::{footprint::GfxRegion, view::GfxView},
};

/// 在 enqueue 时捕获、随 process 一起传递的任意数据
pub type GpuTag = Arc<dyn Any + Send + Sync>;

/// process 录制时可以使用的上下文
///
/// 按照用途分成 copy、compute、graphics、raytracing 四组操作，
/// engine 不支持的操作在录制时立即返回 `InvalidOperation`。
pub struct GpuCommandContext<'a> {
    ctx: &'a Arc<GfxContext>,
    cmd: &'a mut GfxCommandList,
    tag: Option<GpuTag>,

    /// 当前绑定的 pipeline，只在这个 process 内有效
    pipeline: Option<Arc<dyn GfxPipeline>>,
}
// new & init
impl<'a> GpuCommandContext<'a> {
    pub(crate) fn new(ctx: &'a Arc<GfxContext>, cmd: &'a mut GfxCommandList, tag: Option<GpuTag>) -> Self {
        Self {
            ctx,
            cmd,
            tag,
            pipeline: None,
        }
    }
}
// getters
impl<'a> GpuCommandContext<'a> {
    #[inline]
    pub fn gfx(&self) -> &Arc<GfxContext> {
        self.ctx
    }

    #[inline]
    pub fn engine(&self) -> GfxEngine {
        self.cmd.engine()
    }

    /// 直接访问底层 command list
    #[inline]
    pub fn command_list(&mut self) -> &mut GfxCommandList {
        &mut *self.cmd
    }

    /// enqueue 时设置的 tag，类型不匹配时返回 `None`
    pub fn tag<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.tag.as_ref().and_then(|tag| tag.downcast_ref::<T>())
    }

    #[inline]
    pub fn copy(&mut self) -> GpuCopyManager<'_, 'a> {
        GpuCopyManager(self)
    }

    #[inline]
    pub fn compute(&mut self) -> GpuComputeManager<'_, 'a> {
        GpuComputeManager(self)
    }

    #[inline]
    pub fn graphics(&mut self) -> GpuGraphicsManager<'_, 'a> {
        GpuGraphicsManager(self)
    }

    #[inline]
    pub fn raytracing(&mut self) -> GpuRaytracingManager<'_, 'a> {
        GpuRaytracingManager(self)
    }
}
// tools
impl GpuCommandContext<'_> {
    pub fn add_barrier(&mut self, view: &GfxView, state: GfxResourceState) -> GfxResult<()> {
        view.resource().add_barrier(self.cmd, state)
    }

    fn bind_pipeline(&mut self, pipeline: Arc<dyn GfxPipeline>, expected: &[GfxBindPoint]) -> GfxResult<()> {
        let bind_point = pipeline.bind_point();
        if !expected.contains(&bind_point) {
            return Err(GfxError::invalid(format!(
                "pipeline {} ({:?}) can not be bound here",
                pipeline.debug_name(),
                bind_point
            )));
        }
        self.cmd.record(GfxCommand::SetPipeline {
            name: pipeline.debug_name().to_string(),
            bind_point,
        })?;
        self.pipeline = Some(pipeline);
        Ok(())
    }

    /// 取得当前 pipeline 并实现它的绑定
    fn prepare_pipeline(&mut self, action: &str, bind_point: GfxBindPoint) -> GfxResult<()> {
        let pipeline = match &self.pipeline {
            Some(pipeline) if pipeline.bind_point() == bind_point => pipeline.clone(),
            _ => {
                return Err(GfxError::invalid(format!(
                    "{action} on {} requires a bound {:?} pipeline",
                    self.cmd.debug_name(),
                    bind_point
                )));
            }
        };
        let slots = pipeline.bindings()?;
        realize_bindings(self.cmd, self.ctx, pipeline.debug_name(), &slots)
    }

    fn require_compute(&self, action: &str) -> GfxResult<()> {
        if self.engine().supports_compute() {
            Ok(())
        } else {
            Err(GfxError::invalid(format!("{action} is not supported on the {} engine", self.engine())))
        }
    }

    fn clear(&mut self, view: &GfxView, value: GfxClearValue, state: GfxResourceState) -> GfxResult<GfxFill> {
        self.add_barrier(view, state)?;
        Ok(GfxFill {
            memory: view.resource().memory(),
            regions: view.fill_regions()?,
            pattern: encode_clear_pattern(view.format(), view.element_stride(), value)?,
        })
    }
}

/// 拷贝与 UAV clear
pub struct GpuCopyManager<'c, 'a>(&'c mut GpuCommandContext<'a>);

impl GpuCopyManager<'_, '_> {
    pub fn clear_uav_uint(&mut self, view: &GfxView, value: [u32; 4]) -> GfxResult<()> {
        self.clear_uav(view, GfxClearValue::Uint(value))
    }

    pub fn clear_uav_float(&mut self, view: &GfxView, value: [f32; 4]) -> GfxResult<()> {
        self.clear_uav(view, GfxClearValue::Float(value))
    }

    fn clear_uav(&mut self, view: &GfxView, value: GfxClearValue) -> GfxResult<()> {
        self.0.require_compute("clear unordered access")?;
        let fill = self.0.clear(view, value, GfxResourceState::UNORDERED_ACCESS)?;
        self.0.cmd.record(GfxCommand::ClearUnorderedAccess(fill))
    }

    /// upload staging -> 资源
    pub fn load_to_gpu(&mut self, view: &GfxView) -> GfxResult<()> {
        view.flush_staging_to_resource(self.0.cmd)
    }

    /// 资源 -> download staging；需要等待 flush 的 signal 之后才能读取
    pub fn load_from_gpu(&mut self, view: &GfxView) -> GfxResult<()> {
        view.flush_resource_to_staging(self.0.cmd)
    }

    pub fn load_region_to_gpu(&mut self, view: &GfxView, region: GfxRegion) -> GfxResult<()> {
        view.flush_staging_region_to_resource(self.0.cmd, region)
    }

    pub fn load_region_from_gpu(&mut self, view: &GfxView, region: GfxRegion) -> GfxResult<()> {
        view.flush_resource_region_to_staging(self.0.cmd, region)
    }

    /// 整个资源的拷贝，两个资源的尺寸必须一致
    pub fn copy_resource(&mut self, src: &GfxView, dst: &GfxView) -> GfxResult<()> {
        let (src_resource, dst_resource) = (src.resource(), dst.resource());
        if src_resource.size() != dst_resource.size() {
            return Err(GfxError::invalid(format!(
                "copy {} ({} bytes) -> {} ({} bytes): sizes differ",
                src_resource.debug_name(),
                src_resource.size(),
                dst_resource.debug_name(),
                dst_resource.size()
            )));
        }
        src_resource.add_barrier(self.0.cmd, GfxResourceState::COPY_SRC)?;
        dst_resource.add_barrier(self.0.cmd, GfxResourceState::COPY_DST)?;
        self.0.cmd.record(GfxCommand::CopyResource {
            src: src_resource.memory(),
            dst: dst_resource.memory(),
            size: src_resource.size(),
        })
    }
}

/// compute pipeline 与 dispatch
pub struct GpuComputeManager<'c, 'a>(&'c mut GpuCommandContext<'a>);

impl GpuComputeManager<'_, '_> {
    pub fn set_pipeline(&mut self, pipeline: Arc<dyn GfxPipeline>) -> GfxResult<()> {
        self.0.require_compute("set compute pipeline")?;
        self.0.bind_pipeline(pipeline, &[GfxBindPoint::Compute])
    }

    /// 按线程数 dispatch，group 数向上取整
    ///
    /// 每次 dispatch 之后插入一个全局 UAV barrier。
    pub fn dispatch_threads(&mut self, threads: [u32; 3], group_size: [u32; 3]) -> GfxResult<()> {
        if group_size.contains(&0) {
            return Err(GfxError::invalid(format!("dispatch group size {group_size:?} contains zero")));
        }
        self.0.prepare_pipeline("dispatch", GfxBindPoint::Compute)?;

        let groups = [0, 1, 2].map(|i| threads[i].div_ceil(group_size[i]));
        self.0.cmd.record(GfxCommand::Dispatch { groups })?;
        self.0.cmd.record(GfxCommand::Barrier(GfxBarrier::UnorderedAccess { memory: None }))
    }
}

/// 光栅化
pub struct GpuGraphicsManager<'c, 'a>(&'c mut GpuCommandContext<'a>);

impl GpuGraphicsManager<'_, '_> {
    pub fn set_pipeline(&mut self, pipeline: Arc<dyn GfxPipeline>) -> GfxResult<()> {
        self.0.bind_pipeline(pipeline, &[GfxBindPoint::Graphics])
    }

    pub fn set_viewport(&mut self, viewport: GfxViewport) -> GfxResult<()> {
        self.0.cmd.record(GfxCommand::SetViewport(viewport))
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, view: &GfxView) -> GfxResult<()> {
        let (offset, size) = view.buffer_range()?;
        self.0.add_barrier(view, GfxResourceState::VERTEX_AND_CONSTANT)?;
        self.0.cmd.record(GfxCommand::SetVertexBuffer {
            slot,
            memory: view.resource().memory(),
            offset,
            size,
            stride: view.element_stride(),
        })
    }

    /// 元素大小决定 index 类型：2 字节为 u16，4 字节为 u32
    pub fn set_index_buffer(&mut self, view: &GfxView) -> GfxResult<()> {
        let index_type = match view.element_stride() {
            2 => vk::IndexType::UINT16,
            4 => vk::IndexType::UINT32,
            stride => {
                return Err(GfxError::invalid(format!(
                    "index buffer {} has element stride {stride}",
                    view.debug_name()
                )));
            }
        };
        let (offset, size) = view.buffer_range()?;
        self.0.add_barrier(view, GfxResourceState::INDEX)?;
        self.0.cmd.record(GfxCommand::SetIndexBuffer {
            memory: view.resource().memory(),
            offset,
            size,
            index_type,
        })
    }

    pub fn clear_render_target(&mut self, view: &GfxView, color: [f32; 4]) -> GfxResult<()> {
        let fill = self.0.clear(view, GfxClearValue::Float(color), GfxResourceState::RENDER_TARGET)?;
        self.0.cmd.record(GfxCommand::ClearRenderTarget(fill))
    }

    pub fn clear_depth(&mut self, view: &GfxView, depth: f32) -> GfxResult<()> {
        let fill = self.0.clear(view, GfxClearValue::Float([depth; 4]), GfxResourceState::DEPTH_WRITE)?;
        self.0.cmd.record(GfxCommand::ClearDepthStencil(fill))
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> GfxResult<()> {
        self.0.prepare_pipeline("draw", GfxBindPoint::Graphics)?;
        self.0.cmd.record(GfxCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex: 0,
            first_instance: 0,
        })
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) -> GfxResult<()> {
        self.0.prepare_pipeline("draw indexed", GfxBindPoint::Graphics)?;
        self.0.cmd.record(GfxCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index: 0,
            vertex_offset: 0,
            first_instance: 0,
        })
    }
}

/// 加速结构构建与 trace
pub struct GpuRaytracingManager<'c, 'a>(&'c mut GpuCommandContext<'a>);

impl GpuRaytracingManager<'_, '_> {
    /// 按当前状态构建或 update，返回构建之前的状态
    pub fn build_geometry(
        &mut self,
        geometry: &mut GfxGeometryCollection,
        options: GfxBuildOptions,
    ) -> GfxResult<GfxCollectionState> {
        self.0.require_compute("build geometry collection")?;
        geometry.build(self.0.cmd, options)
    }

    pub fn build_scene(
        &mut self,
        scene: &mut GfxInstanceCollection,
        options: GfxBuildOptions,
    ) -> GfxResult<GfxCollectionState> {
        self.0.require_compute("build scene")?;
        scene.build(self.0.cmd, options)
    }

    pub fn set_pipeline(&mut self, pipeline: Arc<dyn GfxPipeline>) -> GfxResult<()> {
        self.0.require_compute("set raytracing pipeline")?;
        self.0.bind_pipeline(pipeline, &[GfxBindPoint::RayTracing])
    }

    pub fn dispatch_rays(&mut self, extent: [u32; 3]) -> GfxResult<()> {
        self.0.prepare_pipeline("dispatch rays", GfxBindPoint::RayTracing)?;
        self.0.cmd.record(GfxCommand::DispatchRays { extent })
    }
}
