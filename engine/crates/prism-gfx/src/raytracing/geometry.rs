use std::sync::{Arc, RwLock};

use ash::vk;

use crate::{
    commands::{barrier::GfxResourceState, command_list::GfxCommandList},
    error::{GfxError, GfxResult},
    gfx_context::GfxContext,
    raytracing::{
        inputs::{GfxAccelerationInputs, GfxBoxesInput, GfxGeometryInput, GfxTrianglesInput},
        versioning::{GfxBuildOptions, GfxCollectionState, GfxCollectionVersions, GfxVersionTracker},
    },
    resources::view::GfxView,
};

/// 变换 buffer 中每一项是一个 3x4 的 f32 矩阵
pub const TRANSFORM_STRIDE: u64 = 48;
/// AABB 是 min、max 两个 float3
pub const AABB_STRIDE: u32 = 24;

#[derive(Clone, Debug)]
pub struct GfxTriangleGeometry {
    pub vertices: GfxView,
    pub vertex_format: vk::Format,
    pub indices: Option<GfxView>,
    /// 在绑定的变换 buffer 中的下标
    pub transform_index: Option<u32>,
    pub opaque: bool,
}

#[derive(Clone, Debug)]
pub struct GfxBoxGeometry {
    pub aabbs: GfxView,
    pub opaque: bool,
}

#[derive(Clone, Debug)]
pub enum GfxGeometry {
    Triangles(GfxTriangleGeometry),
    Boxes(GfxBoxGeometry),
}

/// instance 集合引用的几何体集合
pub type GfxSharedGeometry = Arc<RwLock<GfxGeometryCollection>>;

/// 一个 BLAS 的内容
///
/// 所有修改都只改变版本号，真正的构建发生在 `build` 中。
pub struct GfxGeometryCollection {
    ctx: Arc<GfxContext>,
    geometries: Vec<GfxGeometry>,
    transforms: Option<GfxView>,
    tracker: GfxVersionTracker,

    debug_name: String,
}
// new & init
impl GfxGeometryCollection {
    pub fn new(ctx: &Arc<GfxContext>, debug_name: &str) -> Self {
        Self {
            ctx: ctx.clone(),
            geometries: Vec::new(),
            transforms: None,
            tracker: GfxVersionTracker::default(),
            debug_name: debug_name.to_string(),
        }
    }

    #[inline]
    pub fn into_shared(self) -> GfxSharedGeometry {
        Arc::new(RwLock::new(self))
    }
}
// getters
impl GfxGeometryCollection {
    #[inline]
    pub fn geometries(&self) -> &[GfxGeometry] {
        &self.geometries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
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

    /// 最近一次构建的结果
    #[inline]
    pub fn result(&self) -> Option<&GfxView> {
        self.tracker.baked().map(|baked| &baked.result)
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}
// 修改
impl GfxGeometryCollection {
    pub fn add_triangles(
        &mut self,
        vertices: GfxView,
        vertex_format: vk::Format,
        indices: Option<GfxView>,
        transform_index: Option<u32>,
        opaque: bool,
    ) -> GfxResult<usize> {
        check_buffer(&vertices, "vertex")?;
        if let Some(indices) = &indices {
            check_buffer(indices, "index")?;
            if !matches!(indices.element_stride(), 2 | 4) {
                return Err(GfxError::invalid(format!(
                    "{}: index stride must be 2 or 4, got {}",
                    indices.debug_name(),
                    indices.element_stride()
                )));
            }
        }

        self.geometries.push(GfxGeometry::Triangles(GfxTriangleGeometry {
            vertices,
            vertex_format,
            indices,
            transform_index,
            opaque,
        }));
        self.tracker.bump_structural();
        Ok(self.geometries.len() - 1)
    }

    pub fn add_boxes(&mut self, aabbs: GfxView, opaque: bool) -> GfxResult<usize> {
        check_aabbs(&aabbs)?;
        self.geometries.push(GfxGeometry::Boxes(GfxBoxGeometry { aabbs, opaque }));
        self.tracker.bump_structural();
        Ok(self.geometries.len() - 1)
    }

    pub fn remove_geometry(&mut self, index: usize) -> GfxResult<GfxGeometry> {
        self.check_index(index)?;
        self.tracker.bump_structural();
        Ok(self.geometries.remove(index))
    }

    pub fn clear(&mut self) {
        self.geometries.clear();
        self.tracker.bump_structural();
    }

    /// 顶点数量不变时是属性变化，否则是拓扑变化
    pub fn set_vertices(&mut self, index: usize, vertices: GfxView) -> GfxResult<()> {
        check_buffer(&vertices, "vertex")?;
        let triangles = self.triangles_mut(index)?;
        let same_count = triangles.vertices.slice().element_count == vertices.slice().element_count;
        triangles.vertices = vertices;
        if same_count {
            self.tracker.bump_updating();
        } else {
            self.tracker.bump_structural();
        }
        Ok(())
    }

    /// 在有/无之间切换是拓扑变化，只改下标是属性变化
    pub fn set_transform_index(&mut self, index: usize, transform_index: Option<u32>) -> GfxResult<()> {
        let triangles = self.triangles_mut(index)?;
        let toggled = triangles.transform_index.is_some() != transform_index.is_some();
        let changed = triangles.transform_index != transform_index;
        triangles.transform_index = transform_index;
        if toggled {
            self.tracker.bump_structural();
        } else if changed {
            self.tracker.bump_updating();
        }
        Ok(())
    }

    /// 数量变化是拓扑变化，否则是属性变化
    pub fn set_boxes(&mut self, index: usize, aabbs: GfxView) -> GfxResult<()> {
        check_aabbs(&aabbs)?;
        self.check_index(index)?;
        let GfxGeometry::Boxes(boxes) = &mut self.geometries[index] else {
            return Err(GfxError::invalid(format!("{}: geometry {} is not boxes", self.debug_name, index)));
        };
        let same_count = boxes.aabbs.slice().element_count == aabbs.slice().element_count;
        boxes.aabbs = aabbs;
        if same_count {
            self.tracker.bump_updating();
        } else {
            self.tracker.bump_structural();
        }
        Ok(())
    }

    /// 绑定变换 buffer；内容的变化属于属性变化
    pub fn bind_transforms(&mut self, transforms: Option<GfxView>) -> GfxResult<()> {
        if let Some(transforms) = &transforms {
            check_buffer(transforms, "transform")?;
        }
        self.transforms = transforms;
        self.tracker.bump_updating();
        Ok(())
    }

    /// 调用方已经修改了绑定的 buffer 的内容
    #[inline]
    pub fn mark_updated(&mut self) {
        self.tracker.bump_updating();
    }

    pub fn force_state(&mut self, state: GfxCollectionState) -> GfxResult<()> {
        self.tracker.force_state(state)
    }

    fn check_index(&self, index: usize) -> GfxResult<()> {
        if index >= self.geometries.len() {
            return Err(GfxError::invalid(format!(
                "{}: geometry {} out of range ({} geometries)",
                self.debug_name,
                index,
                self.geometries.len()
            )));
        }
        Ok(())
    }

    fn triangles_mut(&mut self, index: usize) -> GfxResult<&mut GfxTriangleGeometry> {
        self.check_index(index)?;
        match &mut self.geometries[index] {
            GfxGeometry::Triangles(triangles) => Ok(triangles),
            GfxGeometry::Boxes(_) => {
                Err(GfxError::invalid(format!("{}: geometry {} is not triangles", self.debug_name, index)))
            }
        }
    }
}
// 构建
impl GfxGeometryCollection {
    /// 按当前状态构建或 update，返回构建之前的状态
    pub fn build(&mut self, cmd: &mut GfxCommandList, options: GfxBuildOptions) -> GfxResult<GfxCollectionState> {
        if self.geometries.is_empty() {
            return Err(GfxError::invalid(format!("{}: cannot build an empty geometry collection", self.debug_name)));
        }
        if self.state() == GfxCollectionState::UpToDate {
            return Ok(GfxCollectionState::UpToDate);
        }

        let inputs = self.inputs()?;
        for view in self.input_views() {
            view.resource().add_barrier(cmd, GfxResourceState::BUILD_INPUT)?;
        }
        let ctx = self.ctx.clone();
        self.tracker.build(&ctx, cmd, inputs, options, &self.debug_name)
    }

    fn input_views(&self) -> impl Iterator<Item = &GfxView> {
        self.geometries
            .iter()
            .flat_map(|geometry| match geometry {
                GfxGeometry::Triangles(triangles) => [Some(&triangles.vertices), triangles.indices.as_ref()],
                GfxGeometry::Boxes(boxes) => [Some(&boxes.aabbs), None],
            })
            .chain([self.transforms.as_ref()])
            .flatten()
    }

    fn inputs(&self) -> GfxResult<GfxAccelerationInputs> {
        let geometries = self
            .geometries
            .iter()
            .map(|geometry| -> GfxResult<GfxGeometryInput> {
                match geometry {
                    GfxGeometry::Triangles(triangles) => {
                        let (vertex_offset, _) = triangles.vertices.buffer_range()?;
                        let indices = match &triangles.indices {
                            Some(indices) => {
                                let (offset, _) = indices.buffer_range()?;
                                let index_type =
                                    if indices.element_stride() == 2 { vk::IndexType::UINT16 } else { vk::IndexType::UINT32 };
                                Some((indices.resource().memory(), offset, indices.slice().element_count, index_type))
                            }
                            None => None,
                        };
                        let transform = match (triangles.transform_index, &self.transforms) {
                            (None, _) => None,
                            (Some(transform_index), Some(transforms)) => {
                                let (offset, size) = transforms.buffer_range()?;
                                let entry = offset + transform_index as u64 * TRANSFORM_STRIDE;
                                if entry + TRANSFORM_STRIDE > offset + size {
                                    return Err(GfxError::invalid(format!(
                                        "{}: transform {} is outside the bound transform buffer",
                                        self.debug_name, transform_index
                                    )));
                                }
                                Some((transforms.resource().memory(), entry))
                            }
                            (Some(_), None) => {
                                return Err(GfxError::invalid(format!(
                                    "{}: geometry uses a transform but no transform buffer is bound",
                                    self.debug_name
                                )));
                            }
                        };
                        Ok(GfxGeometryInput::Triangles(GfxTrianglesInput {
                            vertices: triangles.vertices.resource().memory(),
                            vertex_offset,
                            vertex_count: triangles.vertices.slice().element_count,
                            vertex_stride: triangles.vertices.element_stride(),
                            vertex_format: triangles.vertex_format,
                            indices,
                            transform,
                            opaque: triangles.opaque,
                        }))
                    }
                    GfxGeometry::Boxes(boxes) => {
                        let (offset, _) = boxes.aabbs.buffer_range()?;
                        Ok(GfxGeometryInput::Boxes(GfxBoxesInput {
                            aabbs: boxes.aabbs.resource().memory(),
                            offset,
                            count: boxes.aabbs.slice().element_count,
                            stride: boxes.aabbs.element_stride(),
                            opaque: boxes.opaque,
                        }))
                    }
                }
            })
            .collect::<GfxResult<Vec<_>>>()?;

        Ok(GfxAccelerationInputs::BottomLevel { geometries })
    }
}

fn check_buffer(view: &GfxView, what: &str) -> GfxResult<()> {
    if !view.is_buffer() {
        return Err(GfxError::invalid(format!("{} view {} must be a buffer", what, view.debug_name())));
    }
    Ok(())
}

fn check_aabbs(view: &GfxView) -> GfxResult<()> {
    check_buffer(view, "aabb")?;
    if view.element_stride() < AABB_STRIDE {
        return Err(GfxError::invalid(format!(
            "aabb view {} has stride {}, at least {} is required",
            view.debug_name(),
            view.element_stride(),
            AABB_STRIDE
        )));
    }
    Ok(())
}
