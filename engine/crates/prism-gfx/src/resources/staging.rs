//! view 与 staging 资源之间的数据搬运
//!
//! staging 与资源使用相同的 placed footprint 布局，CPU 侧的数据则是紧密排列的。
//! 搬运按资源维度分三种情况：
//! - buffer：一段连续的字节
//! - 3D texture：每个 mip 是 depth 个 slice，每个 slice 由 row pitch 对齐的行组成
//! - 1D/2D（数组）texture：array × mip 个 subresource，每个都有自己的偏移与 row pitch
//!
//! `flip` 会在搬运时颠倒每个 slice 内行的顺序，用于协调生产者与消费者的坐标约定。

use bytemuck::Pod;

use crate::{
    commands::{
        barrier::GfxResourceState,
        command::{GfxBufferCopy, GfxCommand, GfxTextureCopy},
        command_list::GfxCommandList,
    },
    error::{GfxError, GfxResult},
    foundation::device::GfxMemoryId,
    resources::{
        footprint::{GfxPlacedFootprint, GfxRegion},
        view::GfxView,
    },
};

/// 搬运的方向
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum GfxStagingDirection {
    CpuToStaging,
    StagingToCpu,
}

// CPU <-> staging
impl GfxView {
    /// 把紧密排列的数据写入 upload staging
    pub fn write_to_staging(&self, data: &[u8], flip: bool) -> GfxResult<()> {
        let expected = self.packed_size()?;
        if data.len() as u64 != expected {
            return Err(GfxError::invalid(format!(
                "{}: {} bytes written, view holds {} bytes",
                self.debug_name(),
                data.len(),
                expected
            )));
        }

        let staging = self.resource().resolve_upload()?;
        let mapped = staging.mapped()?;
        let mut cursor = 0usize;
        for footprint in self.footprints()? {
            cursor += self.transfer_rows(&footprint, &GfxRegion::whole(&footprint), flip, |offset, range| {
                mapped.write_bytes(offset, &data[range])
            })?;
        }
        debug_assert_eq!(cursor, data.len());
        Ok(())
    }

    /// 从 download staging 读出紧密排列的数据
    pub fn read_from_staging(&self, out: &mut [u8], flip: bool) -> GfxResult<()> {
        let expected = self.packed_size()?;
        if out.len() as u64 != expected {
            return Err(GfxError::invalid(format!(
                "{}: {} bytes requested, view holds {} bytes",
                self.debug_name(),
                out.len(),
                expected
            )));
        }

        let staging = self.resource().resolve_download()?;
        let mapped = staging.mapped()?;
        let mut cursor = 0usize;
        for footprint in self.footprints()? {
            cursor += self.transfer_rows(&footprint, &GfxRegion::whole(&footprint), flip, |offset, range| {
                mapped.read_bytes(offset, &mut out[range])
            })?;
        }
        debug_assert_eq!(cursor, out.len());
        Ok(())
    }

    /// 写入 view 第一个 subresource 中的一个区域
    pub fn write_region_to_staging(&self, data: &[u8], region: GfxRegion, flip: bool) -> GfxResult<()> {
        let footprint = self.region_footprint(&region, data.len(), GfxStagingDirection::CpuToStaging)?;
        let mapped = self.resource().resolve_upload()?.mapped()?;
        self.transfer_rows(&footprint, &region, flip, |offset, range| mapped.write_bytes(offset, &data[range]))?;
        Ok(())
    }

    /// 读出 view 第一个 subresource 中的一个区域
    pub fn read_region_from_staging(&self, out: &mut [u8], region: GfxRegion, flip: bool) -> GfxResult<()> {
        let footprint = self.region_footprint(&region, out.len(), GfxStagingDirection::StagingToCpu)?;
        let mapped = self.resource().resolve_download()?.mapped()?;
        self.transfer_rows(&footprint, &region, flip, |offset, range| mapped.read_bytes(offset, &mut out[range]))?;
        Ok(())
    }

    fn region_footprint(
        &self,
        region: &GfxRegion,
        len: usize,
        direction: GfxStagingDirection,
    ) -> GfxResult<GfxPlacedFootprint> {
        let footprint = self.footprints()?[0];
        region.check_within(&footprint)?;
        let expected = region.texel_count() * footprint.texel_size as u64;
        if len as u64 != expected {
            return Err(GfxError::invalid(format!(
                "{}: {:?} of {} bytes for a region of {} bytes",
                self.debug_name(),
                direction,
                len,
                expected
            )));
        }
        Ok(footprint)
    }

    /// 逐行搬运一个区域，返回搬运的字节数
    ///
    /// `op(staging_offset, packed_range)`
    fn transfer_rows(
        &self,
        footprint: &GfxPlacedFootprint,
        region: &GfxRegion,
        flip: bool,
        mut op: impl FnMut(u64, std::ops::Range<usize>) -> GfxResult<()>,
    ) -> GfxResult<usize> {
        let row_bytes = region.width as usize * footprint.texel_size as usize;

        // buffer 只有一行，不需要 flip
        if self.is_buffer() {
            op(footprint.texel_offset(region.x, 0, 0), 0..row_bytes)?;
            return Ok(row_bytes);
        }

        let mut packed = 0usize;
        for z in 0..region.depth {
            for y in 0..region.height {
                let src_row = if flip { region.height - 1 - y } else { y };
                let offset = footprint.texel_offset(region.x, region.y + src_row, region.z + z);
                op(offset, packed..packed + row_bytes)?;
                packed += row_bytes;
            }
        }
        Ok(packed)
    }
}

// staging <-> GPU
impl GfxView {
    /// 录制 upload staging -> 资源 的拷贝
    ///
    /// 资源本身 CPU 可写时不需要拷贝。
    pub fn flush_staging_to_resource(&self, cmd: &mut GfxCommandList) -> GfxResult<()> {
        let resource = self.resource();
        if resource.is_cpu_writable() {
            return Ok(());
        }
        let staging = resource.resolve_upload()?;
        resource.add_barrier(cmd, GfxResourceState::COPY_DST)?;

        if self.covers_whole_resource() {
            return cmd.record(GfxCommand::CopyResource {
                src: staging.memory(),
                dst: resource.memory(),
                size: resource.size(),
            });
        }
        self.record_view_copies(cmd, staging.memory(), resource.memory())
    }

    /// 录制 资源 -> download staging 的拷贝
    pub fn flush_resource_to_staging(&self, cmd: &mut GfxCommandList) -> GfxResult<()> {
        let resource = self.resource();
        if resource.is_cpu_readable() {
            return Ok(());
        }
        let staging = resource.resolve_download()?;
        resource.add_barrier(cmd, GfxResourceState::COPY_SRC)?;

        if self.covers_whole_resource() {
            return cmd.record(GfxCommand::CopyResource {
                src: resource.memory(),
                dst: staging.memory(),
                size: resource.size(),
            });
        }
        self.record_view_copies(cmd, resource.memory(), staging.memory())
    }

    pub fn flush_staging_region_to_resource(&self, cmd: &mut GfxCommandList, region: GfxRegion) -> GfxResult<()> {
        let resource = self.resource();
        if resource.is_cpu_writable() {
            return Ok(());
        }
        let staging = resource.resolve_upload()?;
        resource.add_barrier(cmd, GfxResourceState::COPY_DST)?;
        self.record_region_copy(cmd, staging.memory(), resource.memory(), region)
    }

    pub fn flush_resource_region_to_staging(&self, cmd: &mut GfxCommandList, region: GfxRegion) -> GfxResult<()> {
        let resource = self.resource();
        if resource.is_cpu_readable() {
            return Ok(());
        }
        let staging = resource.resolve_download()?;
        resource.add_barrier(cmd, GfxResourceState::COPY_SRC)?;
        self.record_region_copy(cmd, resource.memory(), staging.memory(), region)
    }

    fn record_view_copies(
        &self,
        cmd: &mut GfxCommandList,
        src: GfxMemoryId,
        dst: GfxMemoryId,
    ) -> GfxResult<()> {
        for footprint in self.footprints()? {
            self.record_footprint_copy(cmd, src, dst, &footprint, GfxRegion::whole(&footprint))?;
        }
        Ok(())
    }

    fn record_region_copy(
        &self,
        cmd: &mut GfxCommandList,
        src: GfxMemoryId,
        dst: GfxMemoryId,
        region: GfxRegion,
    ) -> GfxResult<()> {
        let footprint = self.footprints()?[0];
        region.check_within(&footprint)?;
        self.record_footprint_copy(cmd, src, dst, &footprint, region)
    }

    fn record_footprint_copy(
        &self,
        cmd: &mut GfxCommandList,
        src: GfxMemoryId,
        dst: GfxMemoryId,
        footprint: &GfxPlacedFootprint,
        region: GfxRegion,
    ) -> GfxResult<()> {
        if self.is_buffer() {
            let offset = footprint.texel_offset(region.x, 0, 0);
            return cmd.record(GfxCommand::CopyBuffer(GfxBufferCopy {
                src,
                src_offset: offset,
                dst,
                dst_offset: offset,
                size: region.width as u64 * footprint.texel_size as u64,
            }));
        }

        cmd.record(GfxCommand::CopyTexture(GfxTextureCopy {
            src,
            src_footprint: *footprint,
            src_origin: region.origin(),
            dst,
            dst_footprint: *footprint,
            dst_origin: region.origin(),
            extent: region.extent(),
        }))
    }
}

// 带类型的数据
impl GfxView {
    /// 写入整个 view；要求 `T` 的大小与 view 的 texel/element 大小一致
    pub fn write_slice<T: Pod>(&self, values: &[T]) -> GfxResult<()> {
        self.check_element_type::<T>()?;
        self.write_to_staging(bytemuck::cast_slice(values), false)
    }

    pub fn read_vec<T: Pod>(&self) -> GfxResult<Vec<T>> {
        self.check_element_type::<T>()?;
        let count = self.packed_size()? as usize / size_of::<T>();
        let mut values = vec![T::zeroed(); count];
        self.read_from_staging(bytemuck::cast_slice_mut(&mut values), false)?;
        Ok(values)
    }

    /// 写入 buffer view 的第 `index` 个 element
    pub fn write_element<T: Pod>(&self, index: u32, value: &T) -> GfxResult<()> {
        self.check_element_type::<T>()?;
        let region = self.element_region(index)?;
        self.write_region_to_staging(bytemuck::bytes_of(value), region, false)
    }

    pub fn read_element<T: Pod>(&self, index: u32) -> GfxResult<T> {
        self.check_element_type::<T>()?;
        let region = self.element_region(index)?;
        let mut value = T::zeroed();
        self.read_region_from_staging(bytemuck::bytes_of_mut(&mut value), region, false)?;
        Ok(value)
    }

    fn element_region(&self, index: u32) -> GfxResult<GfxRegion> {
        if !self.is_buffer() {
            return Err(GfxError::invalid(format!("{}: element access needs a buffer view", self.debug_name())));
        }
        Ok(GfxRegion::new([index, 0, 0], [1, 1, 1]))
    }

    fn check_element_type<T>(&self) -> GfxResult<()> {
        if size_of::<T>() != self.element_stride() as usize {
            return Err(GfxError::invalid(format!(
                "{}: element type of {} bytes, view stride is {}",
                self.debug_name(),
                size_of::<T>(),
                self.element_stride()
            )));
        }
        Ok(())
    }
}
