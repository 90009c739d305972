//! 线性内存中的子资源布局
//!
//! staging 资源与 CPU 参考设备上的纹理都使用同一种布局：每行按 256 字节对齐，
//! 每个子资源的起点按 512 字节对齐。

use crate::{
    error::{GfxError, GfxResult},
    resources::desc::{GfxResourceDesc, GfxResourceDimension},
};

pub const ROW_PITCH_ALIGNMENT: u64 = 256;
pub const SUBRESOURCE_PLACEMENT_ALIGNMENT: u64 = 512;

#[inline]
fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// 一个子资源在线性内存中的位置与形状
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxPlacedFootprint {
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub row_pitch: u64,
    pub texel_size: u32,
}

impl GfxPlacedFootprint {
    #[inline]
    pub fn row_bytes(&self) -> u64 {
        self.width as u64 * self.texel_size as u64
    }

    #[inline]
    pub fn slice_pitch(&self) -> u64 {
        self.row_pitch * self.height as u64
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.slice_pitch() * self.depth as u64
    }

    /// texel (x, y, z) 的字节偏移
    #[inline]
    pub fn texel_offset(&self, x: u32, y: u32, z: u32) -> u64 {
        self.offset + z as u64 * self.slice_pitch() + y as u64 * self.row_pitch + x as u64 * self.texel_size as u64
    }
}

/// 资源所有子资源的布局，按子资源编号排列
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxFootprints {
    pub subresources: Vec<GfxPlacedFootprint>,
    pub total_size: u64,
}

impl GfxFootprints {
    pub fn compute(desc: &GfxResourceDesc) -> GfxResult<Self> {
        desc.validate()?;

        if desc.dimension == GfxResourceDimension::Buffer {
            let footprint = GfxPlacedFootprint {
                offset: 0,
                width: desc.element_count() as u32,
                height: 1,
                depth: 1,
                row_pitch: desc.width,
                texel_size: desc.element_stride,
            };
            return Ok(Self {
                subresources: vec![footprint],
                total_size: desc.width,
            });
        }

        let mut subresources = Vec::with_capacity(desc.subresource_count() as usize);
        let mut cursor = 0u64;
        for _array in 0..desc.array_size() {
            for mip in 0..desc.mip_levels {
                let (width, height, depth) = desc.mip_extent(mip);
                let offset = align_up(cursor, SUBRESOURCE_PLACEMENT_ALIGNMENT);
                let footprint = GfxPlacedFootprint {
                    offset,
                    width,
                    height,
                    depth,
                    row_pitch: align_up(width as u64 * desc.element_stride as u64, ROW_PITCH_ALIGNMENT),
                    texel_size: desc.element_stride,
                };
                cursor = offset + footprint.size();
                subresources.push(footprint);
            }
        }

        Ok(Self {
            subresources,
            total_size: cursor,
        })
    }

    pub fn get(&self, subresource: u32) -> GfxResult<GfxPlacedFootprint> {
        self.subresources
            .get(subresource as usize)
            .copied()
            .ok_or_else(|| GfxError::invalid(format!("subresource {} out of range", subresource)))
    }
}

/// texel 为单位的区域；buffer 只使用 x 与 width（元素为单位）
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxRegion {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl GfxRegion {
    pub fn new(origin: [u32; 3], extent: [u32; 3]) -> Self {
        Self {
            x: origin[0],
            y: origin[1],
            z: origin[2],
            width: extent[0],
            height: extent[1],
            depth: extent[2],
        }
    }

    /// 覆盖整个子资源
    pub fn whole(footprint: &GfxPlacedFootprint) -> Self {
        Self::new([0, 0, 0], [footprint.width, footprint.height, footprint.depth])
    }

    #[inline]
    pub fn origin(&self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }

    #[inline]
    pub fn extent(&self) -> [u32; 3] {
        [self.width, self.height, self.depth]
    }

    #[inline]
    pub fn texel_count(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }

    pub fn check_within(&self, footprint: &GfxPlacedFootprint) -> GfxResult<()> {
        let fits = self.x as u64 + self.width as u64 <= footprint.width as u64
            && self.y as u64 + self.height as u64 <= footprint.height as u64
            && self.z as u64 + self.depth as u64 <= footprint.depth as u64;
        if fits {
            Ok(())
        } else {
            Err(GfxError::invalid(format!(
                "region {:?} exceeds subresource extent {}x{}x{}",
                self, footprint.width, footprint.height, footprint.depth
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;

    #[test]
    fn test_texture_footprints_are_aligned() {
        let desc = GfxResourceDesc::texture2d(vk::Format::R8G8B8A8_UNORM, 10, 4, 2, 2);
        let footprints = GfxFootprints::compute(&desc).unwrap();
        assert_eq!(footprints.subresources.len(), 4);

        let mip0 = footprints.subresources[0];
        assert_eq!(mip0.row_pitch, 256);
        assert_eq!(mip0.size(), 1024);

        let mip1 = footprints.subresources[1];
        assert_eq!((mip1.offset, mip1.width, mip1.height), (1024, 5, 2));

        // 第二个 array slice 从 512 对齐的位置开始
        let slice1 = footprints.subresources[2];
        assert_eq!(slice1.offset, 1536);
        assert_eq!(footprints.total_size, 1536 + 1024 + 512);
    }

    #[test]
    fn test_volume_footprint_has_depth() {
        let desc = GfxResourceDesc::texture3d(vk::Format::R32_SFLOAT, 4, 4, 3, 1);
        let footprints = GfxFootprints::compute(&desc).unwrap();
        let fp = footprints.get(0).unwrap();
        assert_eq!(fp.depth, 3);
        assert_eq!(fp.texel_offset(1, 2, 1), 1024 + 2 * 256 + 4);
        assert!(footprints.get(1).is_err());
    }

    #[test]
    fn test_region_bounds() {
        let fp = GfxPlacedFootprint {
            offset: 0,
            width: 8,
            height: 8,
            depth: 1,
            row_pitch: 256,
            texel_size: 4,
        };
        assert!(GfxRegion::new([4, 4, 0], [4, 4, 1]).check_within(&fp).is_ok());
        assert!(GfxRegion::new([5, 0, 0], [4, 1, 1]).check_within(&fp).is_err());
    }
}
