//! 加速结构的版本管理
//!
//! 几何体集合与 instance 集合各自维护两个单调递增的版本号：
//! - structural：拓扑变化（增删元素、变换在有/无之间切换）
//! - updating：属性变化（变换的值、顶点 buffer、mask、id 等）
//!
//! 构建之后记录当时的版本号（baked），通过比较 live 与 baked 决定完整构建、update 还是什么都不做。

use std::sync::Arc;

use ash::vk;
use serde::{Deserialize, Serialize};

use crate::{
    commands::{
        barrier::{GfxBarrier, GfxResourceState},
        command::{GfxAccelerationBuild, GfxCommand},
        command_list::GfxCommandList,
    },
    error::{GfxError, GfxResult},
    gfx_context::GfxContext,
    raytracing::inputs::GfxAccelerationInputs,
    resources::{
        desc::{GfxResourceDesc, GfxResourceUsage},
        view::GfxView,
    },
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxCollectionState {
    NotBuilt,
    UpToDate,
    NeedsUpdate,
    NeedsRebuilt,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GfxCollectionVersions {
    pub structural: u64,
    pub updating: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxBuildOptions {
    /// 允许之后以 update 的方式 refit
    pub allow_update: bool,
    /// 为 trace 性能优化；否则为构建速度优化
    pub prefer_fast_trace: bool,
}

impl Default for GfxBuildOptions {
    fn default() -> Self {
        Self {
            allow_update: true,
            prefer_fast_trace: true,
        }
    }
}

impl GfxBuildOptions {
    pub fn flags(&self) -> vk::BuildAccelerationStructureFlagsKHR {
        let mut flags = if self.prefer_fast_trace {
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE
        } else {
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD
        };
        if self.allow_update {
            flags |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE;
        }
        flags
    }
}

/// 上一次构建的结果
pub struct GfxBakedAcceleration {
    pub versions: GfxCollectionVersions,
    pub allows_update: bool,
    pub options: GfxBuildOptions,
    pub result: GfxView,
    pub scratch: GfxView,
}

/// live 与 baked 版本号，以及构建流程
#[derive(Default)]
pub struct GfxVersionTracker {
    live: GfxCollectionVersions,
    baked: Option<GfxBakedAcceleration>,
}
// getters
impl GfxVersionTracker {
    #[inline]
    pub fn live(&self) -> GfxCollectionVersions {
        self.live
    }

    #[inline]
    pub fn baked(&self) -> Option<&GfxBakedAcceleration> {
        self.baked.as_ref()
    }

    /// 由版本号计算得到，不单独存储
    ///
    /// 拓扑落后总是需要完整构建；只有属性落后时，如果上一次构建不允许 update，同样需要完整构建。
    pub fn state(&self) -> GfxCollectionState {
        let Some(baked) = &self.baked else {
            return GfxCollectionState::NotBuilt;
        };
        let updating_behind = baked.versions.updating < self.live.updating;
        if baked.versions.structural < self.live.structural || (updating_behind && !baked.allows_update) {
            GfxCollectionState::NeedsRebuilt
        } else if updating_behind {
            GfxCollectionState::NeedsUpdate
        } else {
            GfxCollectionState::UpToDate
        }
    }
}
// 版本变更
impl GfxVersionTracker {
    #[inline]
    pub fn bump_structural(&mut self) {
        self.live.structural += 1;
    }

    #[inline]
    pub fn bump_updating(&mut self) {
        self.live.updating += 1;
    }

    /// 强制进入某个状态
    ///
    /// - NotBuilt：丢弃 baked
    /// - NeedsRebuilt / NeedsUpdate：增加对应的版本号
    /// - UpToDate：把 baked 版本号对齐到 live，要求已经构建过
    pub fn force_state(&mut self, state: GfxCollectionState) -> GfxResult<()> {
        match state {
            GfxCollectionState::NotBuilt => self.baked = None,
            GfxCollectionState::NeedsRebuilt => self.bump_structural(),
            GfxCollectionState::NeedsUpdate => self.bump_updating(),
            GfxCollectionState::UpToDate => {
                let baked = self
                    .baked
                    .as_mut()
                    .ok_or_else(|| GfxError::invalid("a collection that was never built cannot be up to date"))?;
                baked.versions = self.live;
            }
        }
        Ok(())
    }
}
// 构建
impl GfxVersionTracker {
    /// 根据当前状态构建、update 或者什么都不做，返回构建之前的状态
    ///
    /// # 构建过程
    ///
    /// 1. 向设备查询构建所需的尺寸，scratch 超过预算时直接失败
    /// 2. 已有的 result/scratch 足够大时原地复用，否则重新分配
    /// 3. 录制 build（完整构建）或 update（以上一次的结果为源，原地 refit）
    /// 4. 在 result 上插入 UAV barrier，之后才能被 trace 使用
    /// 5. baked 版本号对齐到 live
    pub fn build(
        &mut self,
        ctx: &Arc<GfxContext>,
        cmd: &mut GfxCommandList,
        inputs: GfxAccelerationInputs,
        options: GfxBuildOptions,
        debug_name: &str,
    ) -> GfxResult<GfxCollectionState> {
        let _span = tracy_client::span!("GfxVersionTracker::build");

        let state = self.state();
        match state {
            GfxCollectionState::UpToDate => {}
            GfxCollectionState::NeedsUpdate => self.update(ctx, cmd, inputs, debug_name)?,
            GfxCollectionState::NotBuilt | GfxCollectionState::NeedsRebuilt => {
                self.rebuild(ctx, cmd, inputs, options, debug_name)?
            }
        }
        Ok(state)
    }

    fn rebuild(
        &mut self,
        ctx: &Arc<GfxContext>,
        cmd: &mut GfxCommandList,
        inputs: GfxAccelerationInputs,
        options: GfxBuildOptions,
        debug_name: &str,
    ) -> GfxResult<()> {
        let flags = options.flags();
        let info = ctx.device().acceleration_structure_prebuild_info(&inputs, flags);
        check_scratch_budget(ctx, info.scratch_size, debug_name)?;

        let previous = self.baked.take();
        let result = match previous.as_ref().map(|baked| &baked.result) {
            Some(result) if result.resource().size() >= info.result_size => result.clone(),
            _ => GfxView::create(
                ctx,
                GfxResourceDesc::buffer(info.result_size, 1)
                    .with_usage(GfxResourceUsage::ACCELERATION_STRUCTURE | GfxResourceUsage::SHADER_READ),
                &format!("{}-result", debug_name),
            )?,
        };
        let scratch = reuse_or_create_scratch(ctx, previous.map(|baked| baked.scratch), info.scratch_size, debug_name)?;

        scratch.resource().add_barrier(cmd, GfxResourceState::UNORDERED_ACCESS)?;
        cmd.retain_resource(result.resource());
        log::debug!(
            "building {} ({} primitives, {} bytes)",
            debug_name,
            inputs.primitive_count(),
            info.result_size
        );
        cmd.record(GfxCommand::BuildAccelerationStructure(GfxAccelerationBuild {
            inputs,
            mode: vk::BuildAccelerationStructureModeKHR::BUILD,
            flags,
            dst: result.resource().memory(),
            src: None,
            scratch: scratch.resource().memory(),
        }))?;
        cmd.record(GfxCommand::Barrier(GfxBarrier::UnorderedAccess {
            memory: Some(result.resource().memory()),
        }))?;

        self.baked = Some(GfxBakedAcceleration {
            versions: self.live,
            allows_update: options.allow_update,
            options,
            result,
            scratch,
        });
        Ok(())
    }

    fn update(
        &mut self,
        ctx: &Arc<GfxContext>,
        cmd: &mut GfxCommandList,
        inputs: GfxAccelerationInputs,
        debug_name: &str,
    ) -> GfxResult<()> {
        let live = self.live;
        let baked = self
            .baked
            .as_mut()
            .ok_or_else(|| GfxError::invalid(format!("{} cannot be updated before it is built", debug_name)))?;

        let flags = baked.options.flags();
        let info = ctx.device().acceleration_structure_prebuild_info(&inputs, flags);
        check_scratch_budget(ctx, info.update_scratch_size, debug_name)?;
        if baked.scratch.resource().size() < info.update_scratch_size {
            baked.scratch = reuse_or_create_scratch(ctx, None, info.update_scratch_size, debug_name)?;
        }

        baked.scratch.resource().add_barrier(cmd, GfxResourceState::UNORDERED_ACCESS)?;
        cmd.retain_resource(baked.result.resource());
        let result = baked.result.resource().memory();
        cmd.record(GfxCommand::BuildAccelerationStructure(GfxAccelerationBuild {
            inputs,
            mode: vk::BuildAccelerationStructureModeKHR::UPDATE,
            flags,
            dst: result,
            src: Some(result),
            scratch: baked.scratch.resource().memory(),
        }))?;
        cmd.record(GfxCommand::Barrier(GfxBarrier::UnorderedAccess { memory: Some(result) }))?;

        baked.versions = live;
        Ok(())
    }
}

fn check_scratch_budget(ctx: &GfxContext, required: u64, debug_name: &str) -> GfxResult<()> {
    let budget = ctx.limits().max_scratch_bytes;
    if required > budget {
        log::error!("{} needs {} bytes of scratch, budget is {}", debug_name, required, budget);
        return Err(GfxError::exhausted(format!(
            "acceleration structure scratch exhausted: {} needs {} bytes, budget is {}",
            debug_name, required, budget
        )));
    }
    Ok(())
}

fn reuse_or_create_scratch(
    ctx: &Arc<GfxContext>,
    existing: Option<GfxView>,
    required: u64,
    debug_name: &str,
) -> GfxResult<GfxView> {
    match existing {
        Some(scratch) if scratch.resource().size() >= required => Ok(scratch),
        _ => GfxView::create(
            ctx,
            GfxResourceDesc::buffer(required.max(1), 1).with_usage(GfxResourceUsage::UNORDERED_ACCESS),
            &format!("{}-scratch", debug_name),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        basic::engine::GfxEngine,
        commands::command_allocator::GfxCommandAllocator,
        descriptors::heaps::GfxHeapSettings,
        foundation::{
            device::{GfxDevice, GfxMemoryId},
            soft_device::GfxSoftDevice,
        },
        gfx_context::GfxLimits,
        raytracing::inputs::{GfxBoxesInput, GfxGeometryInput},
    };

    fn setup(limits: GfxLimits) -> (Arc<GfxContext>, GfxCommandList) {
        prism_crate_tools::init_log::init_test_log();
        let device: Arc<dyn GfxDevice> = Arc::new(GfxSoftDevice::new());
        let settings = GfxHeapSettings {
            gpu_csu_capacity: 64,
            gpu_csu_persistent: 4,
            ..Default::default()
        };
        let ctx = GfxContext::new(device.clone(), &settings, limits, 2).unwrap();
        let allocator = Arc::new(GfxCommandAllocator::new(device, GfxEngine::Compute, "alloc").unwrap());
        let mut cmd = GfxCommandList::new(GfxEngine::Compute, "cmd");
        cmd.begin(allocator).unwrap();
        (ctx, cmd)
    }

    fn boxes(count: u32) -> GfxAccelerationInputs {
        GfxAccelerationInputs::BottomLevel {
            geometries: vec![GfxGeometryInput::Boxes(GfxBoxesInput {
                aabbs: GfxMemoryId::default(),
                offset: 0,
                count,
                stride: 24,
                opaque: true,
            })],
        }
    }

    fn last_build(cmd: &GfxCommandList) -> GfxAccelerationBuild {
        cmd.commands()
            .iter()
            .rev()
            .find_map(|c| match c {
                GfxCommand::BuildAccelerationStructure(build) => Some(build.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let (ctx, mut cmd) = setup(GfxLimits::default());
        let mut tracker = GfxVersionTracker::default();
        assert_eq!(tracker.state(), GfxCollectionState::NotBuilt);

        tracker.bump_structural();
        let before = tracker.build(&ctx, &mut cmd, boxes(4), GfxBuildOptions::default(), "blas").unwrap();
        assert_eq!(before, GfxCollectionState::NotBuilt);
        assert_eq!(tracker.state(), GfxCollectionState::UpToDate);

        tracker.bump_updating();
        assert_eq!(tracker.state(), GfxCollectionState::NeedsUpdate);
        tracker.bump_structural();
        assert_eq!(tracker.state(), GfxCollectionState::NeedsRebuilt);

        tracker.build(&ctx, &mut cmd, boxes(5), GfxBuildOptions::default(), "blas").unwrap();
        assert_eq!(tracker.state(), GfxCollectionState::UpToDate);

        tracker.bump_updating();
        let before = tracker.build(&ctx, &mut cmd, boxes(5), GfxBuildOptions::default(), "blas").unwrap();
        assert_eq!(before, GfxCollectionState::NeedsUpdate);
        assert_eq!(tracker.baked().unwrap().versions, tracker.live());
        assert_eq!(tracker.state(), GfxCollectionState::UpToDate);

        let build = last_build(&cmd);
        assert_eq!(build.mode, vk::BuildAccelerationStructureModeKHR::UPDATE);
        assert_eq!(build.src, Some(build.dst));
        assert!(matches!(
            cmd.commands().last(),
            Some(GfxCommand::Barrier(GfxBarrier::UnorderedAccess { memory: Some(m) })) if *m == build.dst
        ));
    }

    #[test]
    fn test_up_to_date_build_records_nothing() {
        let (ctx, mut cmd) = setup(GfxLimits::default());
        let mut tracker = GfxVersionTracker::default();
        tracker.build(&ctx, &mut cmd, boxes(2), GfxBuildOptions::default(), "blas").unwrap();
        let recorded = cmd.commands().len();

        let before = tracker.build(&ctx, &mut cmd, boxes(2), GfxBuildOptions::default(), "blas").unwrap();
        assert_eq!(before, GfxCollectionState::UpToDate);
        assert_eq!(cmd.commands().len(), recorded);
    }

    #[test]
    fn test_without_update_support_attribute_edits_rebuild() {
        let (ctx, mut cmd) = setup(GfxLimits::default());
        let mut tracker = GfxVersionTracker::default();
        let options = GfxBuildOptions {
            allow_update: false,
            prefer_fast_trace: true,
        };
        tracker.build(&ctx, &mut cmd, boxes(3), options, "blas").unwrap();
        let result = tracker.baked().unwrap().result.clone();

        tracker.bump_updating();
        assert_eq!(tracker.state(), GfxCollectionState::NeedsRebuilt);

        // 同样大小的重建复用已有的 result
        tracker.build(&ctx, &mut cmd, boxes(3), options, "blas").unwrap();
        assert!(tracker.baked().unwrap().result.ptr_eq(&result));
        assert_eq!(last_build(&cmd).mode, vk::BuildAccelerationStructureModeKHR::BUILD);
    }

    #[test]
    fn test_scratch_budget_is_exhaustion() {
        let (ctx, mut cmd) = setup(GfxLimits { max_scratch_bytes: 1024 });
        let mut tracker = GfxVersionTracker::default();
        let result = tracker.build(&ctx, &mut cmd, boxes(10_000), GfxBuildOptions::default(), "huge");
        assert!(matches!(result, Err(GfxError::ConfigurationExhaustion(_))));
        assert_eq!(tracker.state(), GfxCollectionState::NotBuilt);
    }

    #[test]
    fn test_force_state() {
        let (ctx, mut cmd) = setup(GfxLimits::default());
        let mut tracker = GfxVersionTracker::default();
        assert!(tracker.force_state(GfxCollectionState::UpToDate).is_err());

        tracker.build(&ctx, &mut cmd, boxes(1), GfxBuildOptions::default(), "blas").unwrap();
        tracker.force_state(GfxCollectionState::NeedsUpdate).unwrap();
        assert_eq!(tracker.state(), GfxCollectionState::NeedsUpdate);
        tracker.force_state(GfxCollectionState::UpToDate).unwrap();
        assert_eq!(tracker.state(), GfxCollectionState::UpToDate);
        tracker.force_state(GfxCollectionState::NeedsRebuilt).unwrap();
        assert_eq!(tracker.state(), GfxCollectionState::NeedsRebuilt);
        tracker.force_state(GfxCollectionState::NotBuilt).unwrap();
        assert_eq!(tracker.state(), GfxCollectionState::NotBuilt);
    }

    #[test]
    fn test_options_flags() {
        let flags = GfxBuildOptions::default().flags();
        assert!(flags.contains(vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE));
        assert!(flags.contains(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE));

        let flags = GfxBuildOptions {
            allow_update: false,
            prefer_fast_trace: false,
        }
        .flags();
        assert_eq!(flags, vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD);
    }
}
