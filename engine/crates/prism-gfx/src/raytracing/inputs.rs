use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::foundation::device::GfxMemoryId;

/// 三角形几何体的输入
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxTrianglesInput {
    pub vertices: GfxMemoryId,
    pub vertex_offset: u64,
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub vertex_format: vk::Format,

    /// (memory, offset, index_count, index_type)
    pub indices: Option<(GfxMemoryId, u64, u32, vk::IndexType)>,
    /// 3x4 行主序变换矩阵所在的位置
    pub transform: Option<(GfxMemoryId, u64)>,
    pub opaque: bool,
}

/// 程序化几何体：一组 AABB
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxBoxesInput {
    pub aabbs: GfxMemoryId,
    pub offset: u64,
    pub count: u32,
    pub stride: u32,
    pub opaque: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GfxGeometryInput {
    Triangles(GfxTrianglesInput),
    Boxes(GfxBoxesInput),
}

impl GfxGeometryInput {
    pub fn primitive_count(&self) -> u32 {
        match self {
            Self::Triangles(triangles) => match triangles.indices {
                Some((_, _, index_count, _)) => index_count / 3,
                None => triangles.vertex_count / 3,
            },
            Self::Boxes(boxes) => boxes.count,
        }
    }
}

/// 一次加速结构构建的输入
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GfxAccelerationInputs {
    BottomLevel {
        geometries: Vec<GfxGeometryInput>,
    },
    TopLevel {
        /// `GfxInstanceRecord` 数组
        instances: GfxMemoryId,
        instance_offset: u64,
        instance_count: u32,
    },
}

impl GfxAccelerationInputs {
    #[inline]
    pub fn is_top_level(&self) -> bool {
        matches!(self, Self::TopLevel { .. })
    }

    pub fn level(&self) -> vk::AccelerationStructureTypeKHR {
        match self {
            Self::BottomLevel { .. } => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            Self::TopLevel { .. } => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        }
    }

    pub fn primitive_count(&self) -> u32 {
        match self {
            Self::BottomLevel { geometries } => geometries.iter().map(GfxGeometryInput::primitive_count).sum(),
            Self::TopLevel { instance_count, .. } => *instance_count,
        }
    }
}

/// TLAS 中的一个 instance，布局与 `VkAccelerationStructureInstanceKHR` 一致
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GfxInstanceRecord {
    /// 3x4 行主序
    pub transform: [f32; 12],
    /// 低 24 位是 instance id，高 8 位是 mask
    pub id_and_mask: u32,
    /// 低 24 位是 hit group 偏移，高 8 位是 flags
    pub contribution_and_flags: u32,
    /// BLAS 的地址
    pub acceleration_structure: u64,
}

impl GfxInstanceRecord {
    pub const SIZE: u64 = size_of::<Self>() as u64;

    pub fn new(
        transform: &glam::Affine3A,
        id: u32,
        mask: u8,
        contribution: u32,
        flags: vk::GeometryInstanceFlagsKHR,
        blas: GfxMemoryId,
    ) -> Self {
        let m = &transform.matrix3;
        let t = transform.translation;
        Self {
            transform: [
                m.x_axis.x, m.y_axis.x, m.z_axis.x, t.x, //
                m.x_axis.y, m.y_axis.y, m.z_axis.y, t.y, //
                m.x_axis.z, m.y_axis.z, m.z_axis.z, t.z,
            ],
            id_and_mask: (id & 0x00FF_FFFF) | ((mask as u32) << 24),
            contribution_and_flags: (contribution & 0x00FF_FFFF) | ((flags.as_raw() & 0xFF) << 24),
            acceleration_structure: blas.to_raw(),
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id_and_mask & 0x00FF_FFFF
    }

    #[inline]
    pub fn mask(&self) -> u8 {
        (self.id_and_mask >> 24) as u8
    }

    #[inline]
    pub fn contribution(&self) -> u32 {
        self.contribution_and_flags & 0x00FF_FFFF
    }

    #[inline]
    pub fn blas(&self) -> GfxMemoryId {
        GfxMemoryId::from_raw(self.acceleration_structure)
    }
}
