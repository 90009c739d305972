use std::sync::Arc;

use ash::vk;
use glam::Affine3A;
use itertools::Itertools;

use crate::{
    commands::command_list::GfxCommandList,
    error::{GfxError, GfxResult},
    gfx_context::GfxContext,
    pipelines::binding::GfxRootView,
    raytracing::{
        geometry::GfxSharedGeometry,
        inputs::{GfxAccelerationInputs, GfxInstanceRecord},
        versioning::{GfxBuildOptions, GfxCollectionState, GfxCollectionVersions, GfxVersionTracker},
    },
    resources::{desc::GfxCpuAccess, view::GfxView},
};

/// 场景中的一个 instance
#[derive(Clone)]
pub struct GfxInstance {
    pub geometry: GfxSharedGeometry,
    pub mask: u8,
    /// hit group 偏移
    pub contribution: u32,
    pub id: u32,
    pub transform: Affine3A,
    pub flags: vk::GeometryInstanceFlagsKHR,
}

/// 一个 TLAS 的内容
///
/// instance 记录写入一个持久 map 的 upload buffer，容量不足时按两倍扩容。
pub struct GfxInstanceCollection {
    ctx: Arc<GfxContext>,
    instances: Vec<GfxInstance>,
    instance_buffer: Option<GfxView>,
    /// 上一次写入的 BLAS 地址，BLAS 重新分配之后需要 update
    written_blas: Vec<u64>,
    tracker: GfxVersionTracker,

    debug_name: String,
}
// new & init
impl GfxInstanceCollection {
    pub fn new(ctx: &Arc<GfxContext>, debug_name: &str) -> Self {
        Self {
            ctx: ctx.clone(),
            instances: Vec::new(),
            instance_buffer: None,
            written_blas: Vec::new(),
            tracker: GfxVersionTracker::default(),
            debug_name: debug_name.to_string(),
        }
    }
}
// getters
impl GfxInstanceCollection {
    #[inline]
    pub fn instances(&self) -> &[GfxInstance] {
        &self.instances
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    #[inline]
    pub fn state(&self) -> GfxCollectionState {
        self.tracker.state()
    }

    #[inline]
    pub fn versions(&self) -> GfxCollectionVersions {
        self.tracker.live()
    }

    #[inline]
    pub fn baked_versions(&self) -> Option<GfxCollectionVersions> {
        self.tracker.baked().map(|baked| baked.versions)
    }

    #[inline]
    pub fn result(&self) -> Option<&GfxView> {
        self.tracker.baked().map(|baked| &baked.result)
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// 作为 root view 绑定到 raytracing pipeline
    pub fn as_root_view(&self) -> GfxRootView {
        GfxRootView::Scene {
            state: self.state(),
            result: self.result().cloned(),
        }
    }
}
// 修改
impl GfxInstanceCollection {
    /// 添加一个 instance，返回它的下标；`id` 缺省时使用下标
    ///
    /// 引用的几何体集合必须已经构建过。
    pub fn add_instance(
        &mut self,
        geometry: &GfxSharedGeometry,
        mask: u8,
        contribution: u32,
        id: Option<u32>,
        transform: Affine3A,
    ) -> GfxResult<usize> {
        self.check_geometry_built(geometry)?;

        let index = self.instances.len();
        self.instances.push(GfxInstance {
            geometry: geometry.clone(),
            mask,
            contribution,
            id: id.unwrap_or(index as u32),
            transform,
            flags: vk::GeometryInstanceFlagsKHR::empty(),
        });
        self.tracker.bump_structural();
        Ok(index)
    }

    pub fn remove_instance(&mut self, index: usize) -> GfxResult<GfxInstance> {
        self.check_index(index)?;
        self.tracker.bump_structural();
        Ok(self.instances.remove(index))
    }

    pub fn clear(&mut self) {
        self.instances.clear();
        self.tracker.bump_structural();
    }

    pub fn set_geometry(&mut self, index: usize, geometry: &GfxSharedGeometry) -> GfxResult<()> {
        self.check_geometry_built(geometry)?;
        self.instance_mut(index)?.geometry = geometry.clone();
        self.tracker.bump_updating();
        Ok(())
    }

    pub fn set_mask(&mut self, index: usize, mask: u8) -> GfxResult<()> {
        self.instance_mut(index)?.mask = mask;
        self.tracker.bump_updating();
        Ok(())
    }

    pub fn set_contribution(&mut self, index: usize, contribution: u32) -> GfxResult<()> {
        self.instance_mut(index)?.contribution = contribution;
        self.tracker.bump_updating();
        Ok(())
    }

    pub fn set_id(&mut self, index: usize, id: u32) -> GfxResult<()> {
        self.instance_mut(index)?.id = id;
        self.tracker.bump_updating();
        Ok(())
    }

    pub fn set_transform(&mut self, index: usize, transform: Affine3A) -> GfxResult<()> {
        self.instance_mut(index)?.transform = transform;
        self.tracker.bump_updating();
        Ok(())
    }

    pub fn set_flags(&mut self, index: usize, flags: vk::GeometryInstanceFlagsKHR) -> GfxResult<()> {
        self.instance_mut(index)?.flags = flags;
        self.tracker.bump_updating();
        Ok(())
    }

    pub fn force_state(&mut self, state: GfxCollectionState) -> GfxResult<()> {
        self.tracker.force_state(state)
    }

    fn check_geometry_built(&self, geometry: &GfxSharedGeometry) -> GfxResult<()> {
        let geometry = geometry.read()?;
        if geometry.state() == GfxCollectionState::NotBuilt {
            return Err(GfxError::invalid(format!(
                "{}: geometry collection {} must be built before it is instanced",
                self.debug_name,
                geometry.debug_name()
            )));
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> GfxResult<()> {
        if index >= self.instances.len() {
            return Err(GfxError::invalid(format!(
                "{}: instance {} out of range ({} instances)",
                self.debug_name,
                index,
                self.instances.len()
            )));
        }
        Ok(())
    }

    fn instance_mut(&mut self, index: usize) -> GfxResult<&mut GfxInstance> {
        self.check_index(index)?;
        Ok(&mut self.instances[index])
    }
}
// 构建
impl GfxInstanceCollection {
    /// 写入 instance 记录并按当前状态构建或 update，返回构建之前的状态
    pub fn build(&mut self, cmd: &mut GfxCommandList, options: GfxBuildOptions) -> GfxResult<GfxCollectionState> {
        let records = self.records()?;

        let blas = records.iter().map(|record| record.acceleration_structure).collect_vec();
        if blas != self.written_blas && self.state() == GfxCollectionState::UpToDate {
            log::debug!("{}: referenced BLAS moved, refitting", self.debug_name);
            self.tracker.bump_updating();
        }
        if self.state() == GfxCollectionState::UpToDate {
            return Ok(GfxCollectionState::UpToDate);
        }

        let instance_buffer = self.ensure_instance_buffer(records.len())?;
        instance_buffer.resource().mapped()?.write_bytes(0, bytemuck::cast_slice(&records))?;
        self.written_blas = blas;

        // 记录中只有 BLAS 的地址，BLAS 的 result 与 instance buffer 由 cmd 持有
        for instance in &self.instances {
            if let Some(blas) = instance.geometry.read()?.result() {
                cmd.retain_resource(blas.resource());
            }
        }
        cmd.retain_view(&instance_buffer);

        let (instance_offset, _) = instance_buffer.buffer_range()?;
        let inputs = GfxAccelerationInputs::TopLevel {
            instances: instance_buffer.resource().memory(),
            instance_offset,
            instance_count: records.len() as u32,
        };
        let ctx = self.ctx.clone();
        self.tracker.build(&ctx, cmd, inputs, options, &self.debug_name)
    }

    fn records(&self) -> GfxResult<Vec<GfxInstanceRecord>> {
        self.instances
            .iter()
            .map(|instance| {
                let geometry = instance.geometry.read()?;
                let blas = geometry.result().ok_or_else(|| {
                    GfxError::invalid(format!(
                        "{}: instance {} references unbuilt geometry {}",
                        self.debug_name,
                        instance.id,
                        geometry.debug_name()
                    ))
                })?;
                Ok(GfxInstanceRecord::new(
                    &instance.transform,
                    instance.id,
                    instance.mask,
                    instance.contribution,
                    instance.flags,
                    blas.resource().memory(),
                ))
            })
            .collect()
    }

    fn ensure_instance_buffer(&mut self, count: usize) -> GfxResult<GfxView> {
        let capacity = self.instance_buffer.as_ref().map_or(0, |buffer| buffer.slice().element_count as usize);
        if capacity >= count.max(1) {
            if let Some(buffer) = &self.instance_buffer {
                return Ok(buffer.clone());
            }
        }

        let new_capacity = count.max(1).next_power_of_two().max(capacity * 2);
        let buffer = GfxView::create_buffer(
            &self.ctx,
            new_capacity as u64,
            GfxInstanceRecord::SIZE as u32,
            GfxCpuAccess::Write,
            &format!("{}-instances", self.debug_name),
        )?;
        log::debug!("{}: instance buffer grown to {} records", self.debug_name, new_capacity);
        self.instance_buffer = Some(buffer.clone());
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::{
        basic::engine::GfxEngine,
        commands::{command::GfxCommand, command_allocator::GfxCommandAllocator},
        descriptors::heaps::GfxHeapSettings,
        foundation::{device::GfxDevice, soft_device::GfxSoftDevice},
        gfx_context::GfxLimits,
        raytracing::geometry::{AABB_STRIDE, GfxGeometryCollection},
    };

    fn setup() -> (Arc<GfxContext>, GfxCommandList) {
        let device: Arc<dyn GfxDevice> = Arc::new(GfxSoftDevice::new());
        let settings = GfxHeapSettings {
            gpu_csu_capacity: 64,
            gpu_csu_persistent: 4,
            ..Default::default()
        };
        let ctx = GfxContext::new(device.clone(), &settings, GfxLimits::default(), 2).unwrap();
        let allocator = Arc::new(GfxCommandAllocator::new(device, GfxEngine::Compute, "alloc").unwrap());
        let mut cmd = GfxCommandList::new(GfxEngine::Compute, "cmd");
        cmd.begin(allocator).unwrap();
        (ctx, cmd)
    }

    fn built_geometry(ctx: &Arc<GfxContext>, cmd: &mut GfxCommandList) -> GfxSharedGeometry {
        let mut geometry = GfxGeometryCollection::new(ctx, "blas");
        let aabbs = GfxView::create_buffer(ctx, 2, AABB_STRIDE, GfxCpuAccess::None, "aabbs").unwrap();
        geometry.add_boxes(aabbs, true).unwrap();
        geometry.build(cmd, GfxBuildOptions::default()).unwrap();
        geometry.into_shared()
    }

    #[test]
    fn test_instancing_requires_built_geometry() {
        let (ctx, mut cmd) = setup();
        let mut scene = GfxInstanceCollection::new(&ctx, "tlas");
        let unbuilt = GfxGeometryCollection::new(&ctx, "unbuilt").into_shared();
        assert!(matches!(
            scene.add_instance(&unbuilt, 0xFF, 0, None, Affine3A::IDENTITY),
            Err(GfxError::InvalidOperation(_))
        ));

        let geometry = built_geometry(&ctx, &mut cmd);
        assert_eq!(scene.add_instance(&geometry, 0xFF, 0, None, Affine3A::IDENTITY).unwrap(), 0);
        assert_eq!(scene.add_instance(&geometry, 0xFF, 0, Some(42), Affine3A::IDENTITY).unwrap(), 1);
        assert_eq!(scene.instances()[0].id, 0);
        assert_eq!(scene.instances()[1].id, 42);
    }

    #[test]
    fn test_scene_state_transitions() {
        let (ctx, mut cmd) = setup();
        let geometry = built_geometry(&ctx, &mut cmd);
        let mut scene = GfxInstanceCollection::new(&ctx, "tlas");
        scene.add_instance(&geometry, 0xFF, 0, None, Affine3A::IDENTITY).unwrap();
        assert_eq!(scene.state(), GfxCollectionState::NotBuilt);
        assert!(matches!(scene.as_root_view(), GfxRootView::Scene { result: None, .. }));

        scene.build(&mut cmd, GfxBuildOptions::default()).unwrap();
        assert_eq!(scene.state(), GfxCollectionState::UpToDate);

        scene.set_transform(0, Affine3A::from_translation(Vec3::X)).unwrap();
        assert_eq!(scene.state(), GfxCollectionState::NeedsUpdate);
        scene.add_instance(&geometry, 0x01, 0, None, Affine3A::IDENTITY).unwrap();
        assert_eq!(scene.state(), GfxCollectionState::NeedsRebuilt);

        scene.build(&mut cmd, GfxBuildOptions::default()).unwrap();
        scene.set_mask(1, 0x0F).unwrap();
        let before = scene.build(&mut cmd, GfxBuildOptions::default()).unwrap();
        assert_eq!(before, GfxCollectionState::NeedsUpdate);
        assert_eq!(scene.baked_versions(), Some(scene.versions()));

        let builds = cmd
            .commands()
            .iter()
            .filter(|c| matches!(c, GfxCommand::BuildAccelerationStructure(b) if b.inputs.is_top_level()))
            .count();
        assert_eq!(builds, 3);
    }

    #[test]
    fn test_records_are_written_to_instance_buffer() {
        let (ctx, mut cmd) = setup();
        let geometry = built_geometry(&ctx, &mut cmd);
        let mut scene = GfxInstanceCollection::new(&ctx, "tlas");
        for i in 0..3 {
            scene.add_instance(&geometry, 0xFF, i, None, Affine3A::IDENTITY).unwrap();
        }
        scene.build(&mut cmd, GfxBuildOptions::default()).unwrap();

        let buffer = scene.instance_buffer.clone().unwrap();
        assert_eq!(buffer.slice().element_count, 4);
        let mut bytes = vec![0u8; GfxInstanceRecord::SIZE as usize];
        buffer.resource().mapped().unwrap().read_bytes(2 * GfxInstanceRecord::SIZE, &mut bytes).unwrap();
        let record: GfxInstanceRecord = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(record.contribution(), 2);
        assert_eq!(record.id(), 2);
        let blas = geometry.read().unwrap().result().unwrap().resource().memory();
        assert_eq!(record.blas(), blas);
    }

    #[test]
    fn test_moved_blas_triggers_update() {
        let (ctx, mut cmd) = setup();
        let geometry = built_geometry(&ctx, &mut cmd);
        let mut scene = GfxInstanceCollection::new(&ctx, "tlas");
        scene.add_instance(&geometry, 0xFF, 0, None, Affine3A::IDENTITY).unwrap();
        scene.build(&mut cmd, GfxBuildOptions::default()).unwrap();

        // 更多的图元使 BLAS 重新分配
        {
            let mut geometry = geometry.write().unwrap();
            let aabbs = GfxView::create_buffer(&ctx, 512, AABB_STRIDE, GfxCpuAccess::None, "more").unwrap();
            geometry.add_boxes(aabbs, true).unwrap();
            geometry.build(&mut cmd, GfxBuildOptions::default()).unwrap();
        }
        let before = scene.build(&mut cmd, GfxBuildOptions::default()).unwrap();
        assert_eq!(before, GfxCollectionState::NeedsUpdate);
        assert_eq!(scene.state(), GfxCollectionState::UpToDate);
        assert_eq!(scene.baked_versions().unwrap().updating, 1);
    }
}
