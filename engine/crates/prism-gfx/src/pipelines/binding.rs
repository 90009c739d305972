use std::sync::Arc;

use crate::{
    commands::{barrier::GfxResourceState, command::GfxCommand, command_list::GfxCommandList},
    descriptors::descriptor::{GfxDescriptor, GfxDescriptorHeapKind, GfxDescriptorKind, GfxDescriptorSource, GfxSamplerDesc},
    error::{GfxError, GfxResult},
    gfx_context::GfxContext,
    raytracing::versioning::GfxCollectionState,
    resources::view::GfxView,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxBindPoint {
    Graphics,
    Compute,
    RayTracing,
}

/// 直接绑定到 root 的 view
#[derive(Clone)]
pub enum GfxRootView {
    ConstantBuffer(GfxView),
    ShaderRead(GfxView),
    /// TLAS；`result` 为 `None` 表示从未构建
    Scene {
        state: GfxCollectionState,
        result: Option<GfxView>,
    },
}

/// pipeline 的一个绑定槽位
///
/// 槽位按顺序编号，编号即 `SetConstants` 等命令中的 `slot`。
#[derive(Clone)]
pub enum GfxBindingSlot {
    Constant { values: Vec<u32> },
    /// 描述符表，`None` 项绑定为空描述符
    Table {
        kind: GfxDescriptorKind,
        views: Vec<Option<GfxView>>,
    },
    Samplers { samplers: Vec<GfxSamplerDesc> },
    RootView(GfxRootView),
}

impl GfxBindingSlot {
    pub fn constants<T: bytemuck::Pod>(value: &T) -> Self {
        let bytes = bytemuck::bytes_of(value);
        let mut values = vec![0u32; bytes.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut values)[..bytes.len()].copy_from_slice(bytes);
        Self::Constant { values }
    }
}

/// 在当前 heap 上实现一组绑定
///
/// # 处理过程
/// 1. `Constant`：直接录制 set constants
/// 2. `Table`：为每个 view 插入 barrier，取得 CPU 描述符，在当前帧的 GPU 区域分配一段，
///    记录延迟拷贝，在 flush 时统一执行
/// 3. `Samplers`：直接写入 GPU sampler heap 的当前帧区域
/// 4. `RootView`：constant buffer、shader read buffer 或已经构建的 TLAS
pub fn realize_bindings(
    cmd: &mut GfxCommandList,
    ctx: &Arc<GfxContext>,
    pipeline: &str,
    slots: &[GfxBindingSlot],
) -> GfxResult<()> {
    for (slot, binding) in slots.iter().enumerate() {
        let slot = slot as u32;
        match binding {
            GfxBindingSlot::Constant { values } => {
                cmd.record(GfxCommand::SetConstants {
                    slot,
                    values: values.clone(),
                })?;
            }
            GfxBindingSlot::Table { kind, views } => realize_table(cmd, ctx, pipeline, slot, *kind, views)?,
            GfxBindingSlot::Samplers { samplers } => realize_samplers(cmd, ctx, pipeline, slot, samplers)?,
            GfxBindingSlot::RootView(root) => realize_root_view(cmd, pipeline, slot, root)?,
        }
    }
    Ok(())
}

fn realize_table(
    cmd: &mut GfxCommandList,
    ctx: &Arc<GfxContext>,
    pipeline: &str,
    slot: u32,
    kind: GfxDescriptorKind,
    views: &[Option<GfxView>],
) -> GfxResult<()> {
    if views.is_empty() {
        return Err(GfxError::construction(format!("{pipeline}: descriptor table at slot {slot} is empty")));
    }
    let state = match kind {
        GfxDescriptorKind::ShaderRead => GfxResourceState::SHADER_READ_ALL,
        GfxDescriptorKind::UnorderedAccess => GfxResourceState::UNORDERED_ACCESS,
        GfxDescriptorKind::Constant => GfxResourceState::VERTEX_AND_CONSTANT,
        GfxDescriptorKind::RenderTarget | GfxDescriptorKind::DepthStencil => {
            return Err(GfxError::construction(format!(
                "{pipeline}: {kind:?} descriptors cannot be bound in a table (slot {slot})"
            )));
        }
    };

    let mut sources = Vec::with_capacity(views.len());
    let mut bound = Vec::with_capacity(views.len());
    for view in views {
        match view {
            Some(view) => {
                view.resource().add_barrier(cmd, state)?;
                sources.push(GfxDescriptorSource::Cpu(view.descriptor(kind)?));
                bound.push(view.clone());
            }
            None => sources.push(GfxDescriptorSource::Null(kind)),
        }
    }

    let count = sources.len() as u32;
    let start = ctx.heaps().gpu_csu().allocate_in_frame(count)?;
    cmd.defer_descriptor_copy(sources, start, &bound);
    cmd.record(GfxCommand::SetDescriptorTable {
        slot,
        heap: GfxDescriptorHeapKind::Csu,
        start,
        count,
    })
}

fn realize_samplers(
    cmd: &mut GfxCommandList,
    ctx: &Arc<GfxContext>,
    pipeline: &str,
    slot: u32,
    samplers: &[GfxSamplerDesc],
) -> GfxResult<()> {
    if samplers.is_empty() {
        return Err(GfxError::construction(format!("{pipeline}: sampler table at slot {slot} is empty")));
    }

    let heap = ctx.heaps().gpu_sampler();
    let count = samplers.len() as u32;
    let start = heap.allocate_in_frame(count)?;
    for (i, sampler) in samplers.iter().enumerate() {
        heap.write(start + i as u32, GfxDescriptor::Sampler(*sampler))?;
    }
    cmd.record(GfxCommand::SetDescriptorTable {
        slot,
        heap: GfxDescriptorHeapKind::Sampler,
        start,
        count,
    })
}

fn realize_root_view(cmd: &mut GfxCommandList, pipeline: &str, slot: u32, root: &GfxRootView) -> GfxResult<()> {
    let memory = match root {
        GfxRootView::ConstantBuffer(view) | GfxRootView::ShaderRead(view) => {
            if !view.is_buffer() {
                return Err(GfxError::construction(format!(
                    "{pipeline}: root view {} at slot {slot} is not a buffer",
                    view.debug_name()
                )));
            }
            let state = match root {
                GfxRootView::ConstantBuffer(_) => GfxResourceState::VERTEX_AND_CONSTANT,
                _ => GfxResourceState::SHADER_READ_ALL,
            };
            view.resource().add_barrier(cmd, state)?;
            view.resource().memory()
        }
        GfxRootView::Scene { state, result } => match result {
            Some(result) if *state != GfxCollectionState::NotBuilt => {
                if *state != GfxCollectionState::UpToDate {
                    log::warn!("{pipeline}: scene bound at slot {slot} is {state:?}, tracing stale data");
                }
                cmd.retain_resource(result.resource());
                result.resource().memory()
            }
            _ => {
                log::error!("{pipeline}: scene bound at slot {slot} was never built");
                return Err(GfxError::invalid(format!("{pipeline}: scene bound at slot {slot} must be built")));
            }
        },
    };
    cmd.record(GfxCommand::SetRootView { slot, memory })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        basic::engine::GfxEngine,
        commands::{barrier::GfxBarrier, command_allocator::GfxCommandAllocator},
        descriptors::heaps::GfxHeapSettings,
        foundation::{device::GfxDevice, soft_device::GfxSoftDevice},
        gfx_context::GfxLimits,
        resources::desc::{GfxCpuAccess, GfxResourceDesc, GfxResourceUsage},
    };

    fn setup(gpu_csu_capacity: u32) -> (Arc<GfxContext>, GfxCommandList) {
        let device: Arc<dyn GfxDevice> = Arc::new(GfxSoftDevice::new());
        let settings = GfxHeapSettings {
            gpu_csu_capacity,
            gpu_csu_persistent: 4,
            ..Default::default()
        };
        let ctx = GfxContext::new(device.clone(), &settings, GfxLimits::default(), 2).unwrap();
        let allocator = Arc::new(GfxCommandAllocator::new(device, GfxEngine::Graphics, "alloc").unwrap());
        let mut cmd = GfxCommandList::new(GfxEngine::Graphics, "cmd");
        cmd.begin(allocator).unwrap();
        (ctx, cmd)
    }

    fn texture(ctx: &Arc<GfxContext>, name: &str) -> GfxView {
        let desc = GfxResourceDesc::texture2d(ash::vk::Format::R8G8B8A8_UNORM, 4, 4, 1, 1)
            .with_usage(GfxResourceUsage::SHADER_READ | GfxResourceUsage::UNORDERED_ACCESS);
        GfxView::create(ctx, desc, name).unwrap()
    }

    #[test]
    fn test_table_records_deferred_copy() {
        let (ctx, mut cmd) = setup(64);
        let a = texture(&ctx, "a");
        let b = texture(&ctx, "b");
        let slots = vec![
            GfxBindingSlot::Constant { values: vec![1, 2] },
            GfxBindingSlot::Table {
                kind: GfxDescriptorKind::ShaderRead,
                views: vec![Some(a.clone()), None, Some(b)],
            },
        ];
        realize_bindings(&mut cmd, &ctx, "test", &slots).unwrap();

        let transitions = cmd.commands().iter().filter(|c| matches!(c, GfxCommand::Barrier(GfxBarrier::Transition { .. }))).count();
        assert_eq!(transitions, 2);
        assert!(cmd.commands().iter().any(|c| matches!(
            c,
            GfxCommand::SetDescriptorTable {
                slot: 1,
                heap: GfxDescriptorHeapKind::Csu,
                count: 3,
                ..
            }
        )));
        assert_eq!(ctx.heaps().gpu_csu().frame_allocated(), 3);

        // 描述符缓存在 view 上
        let first = a.descriptor(GfxDescriptorKind::ShaderRead).unwrap();
        realize_bindings(&mut cmd, &ctx, "test", &slots).unwrap();
        assert_eq!(a.descriptor(GfxDescriptorKind::ShaderRead).unwrap(), first);

        let (_, batch) = cmd.close().unwrap();
        assert_eq!(batch.len(), 6);
        assert_eq!(batch.src[1], GfxDescriptorSource::Null(GfxDescriptorKind::ShaderRead));
        ctx.heaps().apply_deferred_copies(&batch).unwrap();
        let (start, _) = batch.dst_ranges[0];
        assert!(matches!(
            ctx.heaps().gpu_csu().read(start).unwrap(),
            Some(GfxDescriptor::View { .. })
        ));
    }

    #[test]
    fn test_table_view_outlives_caller() {
        let (ctx, mut cmd) = setup(64);
        let local = texture(&ctx, "local");
        let slots = vec![GfxBindingSlot::Table {
            kind: GfxDescriptorKind::ShaderRead,
            views: vec![Some(local.clone())],
        }];
        realize_bindings(&mut cmd, &ctx, "test", &slots).unwrap();
        drop(slots);
        drop(local);

        // view 由 list 持有，描述符在 flush 拷贝时仍然有效
        let (recorded, batch) = cmd.close().unwrap();
        assert_eq!(recorded.views.len(), 1);
        ctx.heaps().apply_deferred_copies(&batch).unwrap();
        let (start, _) = batch.dst_ranges[0];
        assert!(matches!(
            ctx.heaps().gpu_csu().read(start).unwrap(),
            Some(GfxDescriptor::View { memory, .. }) if memory == recorded.views[0].resource().memory()
        ));
    }

    #[test]
    fn test_empty_table_is_construction_failure() {
        let (ctx, mut cmd) = setup(64);
        let slots = vec![GfxBindingSlot::Table {
            kind: GfxDescriptorKind::UnorderedAccess,
            views: vec![],
        }];
        assert!(matches!(
            realize_bindings(&mut cmd, &ctx, "test", &slots),
            Err(GfxError::ConstructionFailure(_))
        ));
    }

    #[test]
    fn test_frame_region_exhaustion() {
        // 4 个持久槽位，剩余按两帧平分
        let (ctx, mut cmd) = setup(12);
        let frame_capacity = ctx.heaps().gpu_csu().frame_capacity() as usize;
        let views = (0..frame_capacity + 1).map(|i| Some(texture(&ctx, &format!("t{i}")))).collect();
        let slots = vec![GfxBindingSlot::Table {
            kind: GfxDescriptorKind::ShaderRead,
            views,
        }];
        assert!(matches!(
            realize_bindings(&mut cmd, &ctx, "test", &slots),
            Err(GfxError::ConfigurationExhaustion(_))
        ));
    }

    #[test]
    fn test_unbuilt_scene_is_invalid() {
        let (ctx, mut cmd) = setup(64);
        let slots = vec![GfxBindingSlot::RootView(GfxRootView::Scene {
            state: GfxCollectionState::NotBuilt,
            result: None,
        })];
        assert!(matches!(
            realize_bindings(&mut cmd, &ctx, "test", &slots),
            Err(GfxError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_root_constant_buffer_and_samplers() {
        let (ctx, mut cmd) = setup(64);
        let cb = GfxView::create_buffer(&ctx, 1, 256, GfxCpuAccess::None, "cb").unwrap();
        let slots = vec![
            GfxBindingSlot::RootView(GfxRootView::ConstantBuffer(cb.clone())),
            GfxBindingSlot::Samplers {
                samplers: vec![GfxSamplerDesc::default(); 2],
            },
            GfxBindingSlot::constants(&[1.0f32, 2.0, 3.0]),
        ];
        realize_bindings(&mut cmd, &ctx, "test", &slots).unwrap();

        assert_eq!(cb.resource().last_state().unwrap(), GfxResourceState::VERTEX_AND_CONSTANT);
        assert_eq!(ctx.heaps().gpu_sampler().frame_allocated(), 2);
        assert!(cmd.commands().iter().any(|c| matches!(c, GfxCommand::SetConstants { slot: 2, values } if values.len() == 3)));
    }
}
