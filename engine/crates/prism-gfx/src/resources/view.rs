use std::{
    ops::Deref,
    sync::{Arc, Mutex},
};

use ash::vk;

use crate::{
    commands::command::GfxFillRegion,
    descriptors::descriptor::{GfxDescriptor, GfxDescriptorKind},
    error::{GfxError, GfxResult},
    gfx_context::GfxContext,
    resources::{
        desc::{GfxCpuAccess, GfxResourceDesc, GfxResourceDimension, GfxResourceUsage},
        footprint::GfxPlacedFootprint,
        resource::GfxResource,
    },
};

/// view 覆盖的范围
///
/// buffer 使用 element 范围；texture 使用 array × mip 范围（3D texture 的 array 范围固定为 0..1）。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxViewSlice {
    pub array_start: u32,
    pub array_count: u32,
    pub mip_start: u32,
    pub mip_count: u32,
    pub element_start: u32,
    pub element_count: u32,
}

impl GfxViewSlice {
    pub fn whole(desc: &GfxResourceDesc) -> Self {
        Self {
            array_start: 0,
            array_count: desc.array_size(),
            mip_start: 0,
            mip_count: desc.mip_levels,
            element_start: 0,
            element_count: if desc.is_buffer() { desc.element_count() as u32 } else { 0 },
        }
    }
}

struct GfxViewInner {
    resource: GfxResource,
    slice: GfxViewSlice,
    format: vk::Format,
    element_stride: u32,

    /// 每种描述符至多创建一次，保存 CPU 描述符堆中的下标
    descriptors: Mutex<[Option<u32>; GfxDescriptorKind::COUNT]>,

    debug_name: String,
}

impl Drop for GfxViewInner {
    fn drop(&mut self) {
        let heaps = self.resource.ctx().heaps();
        let Ok(descriptors) = self.descriptors.get_mut() else {
            log::warn!("view {} dropped with a poisoned descriptor cache", self.debug_name);
            return;
        };
        for kind in GfxDescriptorKind::ALL {
            if let Some(index) = descriptors[kind.index()].take() {
                if let Err(e) = heaps.cpu(kind.heap_kind()).free(index) {
                    log::warn!("failed to free {:?} descriptor of view {}: {}", kind, self.debug_name, e);
                }
            }
        }
    }
}

/// 资源的一个带类型的切片
///
/// clone 只增加引用计数，多个 view 可以共享同一个资源。
#[derive(Clone)]
pub struct GfxView {
    inner: Arc<GfxViewInner>,
}
// new & init
impl GfxView {
    /// 覆盖整个资源的 view
    pub fn whole(resource: GfxResource) -> Self {
        let slice = GfxViewSlice::whole(resource.desc());
        let debug_name = resource.debug_name().to_string();
        Self::from_parts(resource, slice, debug_name)
    }

    pub fn create(ctx: &Arc<GfxContext>, desc: GfxResourceDesc, debug_name: &str) -> GfxResult<Self> {
        Ok(Self::whole(GfxResource::new(ctx, desc, debug_name)?))
    }

    pub fn create_buffer(
        ctx: &Arc<GfxContext>,
        element_count: u64,
        element_stride: u32,
        cpu_access: GfxCpuAccess,
        debug_name: &str,
    ) -> GfxResult<Self> {
        let desc = GfxResourceDesc::buffer(element_count, element_stride).with_cpu_access(cpu_access);
        Self::create(ctx, desc, debug_name)
    }

    pub fn create_texture2d(
        ctx: &Arc<GfxContext>,
        format: vk::Format,
        width: u32,
        height: u32,
        debug_name: &str,
    ) -> GfxResult<Self> {
        Self::create(ctx, GfxResourceDesc::texture2d(format, width, height, 1, 1), debug_name)
    }

    fn from_parts(resource: GfxResource, slice: GfxViewSlice, debug_name: String) -> Self {
        let desc = resource.desc();
        let (format, element_stride) = (desc.format, desc.element_stride);
        Self {
            inner: Arc::new(GfxViewInner {
                resource,
                slice,
                format,
                element_stride,
                descriptors: Mutex::new([None; GfxDescriptorKind::COUNT]),
                debug_name,
            }),
        }
    }

    /// 共享同一个资源的子 view，范围相对于当前 view
    pub fn create_sliced_clone(
        &self,
        mip_start: u32,
        mip_count: u32,
        array_start: u32,
        array_count: u32,
    ) -> GfxResult<Self> {
        if self.is_buffer() {
            return Err(GfxError::invalid(format!("{}: mip/array slices need a texture", self.debug_name())));
        }
        let slice = self.slice();
        if mip_count == 0
            || array_count == 0
            || mip_start + mip_count > slice.mip_count
            || array_start + array_count > slice.array_count
        {
            return Err(GfxError::invalid(format!(
                "{}: slice mips {}+{} arrays {}+{} exceeds view ({} mips, {} arrays)",
                self.debug_name(),
                mip_start,
                mip_count,
                array_start,
                array_count,
                slice.mip_count,
                slice.array_count
            )));
        }

        let sub = GfxViewSlice {
            array_start: slice.array_start + array_start,
            array_count,
            mip_start: slice.mip_start + mip_start,
            mip_count,
            ..slice
        };
        let name = format!(
            "{}[mip {}..{}, array {}..{}]",
            self.resource().debug_name(),
            sub.mip_start,
            sub.mip_start + mip_count,
            sub.array_start,
            sub.array_start + array_count
        );
        Ok(Self::from_parts(self.resource().clone(), sub, name))
    }

    /// buffer 的 element 子范围，相对于当前 view
    pub fn create_element_slice(&self, element_start: u32, element_count: u32) -> GfxResult<Self> {
        let slice = self.slice();
        if !self.is_buffer() || element_count == 0 || element_start + element_count > slice.element_count {
            return Err(GfxError::invalid(format!(
                "{}: element slice {}+{} is not within the view",
                self.debug_name(),
                element_start,
                element_count
            )));
        }

        let sub = GfxViewSlice {
            element_start: slice.element_start + element_start,
            element_count,
            ..slice
        };
        let name = format!("{}[{}..{}]", self.resource().debug_name(), sub.element_start, sub.element_start + element_count);
        Ok(Self::from_parts(self.resource().clone(), sub, name))
    }
}
// getters
impl GfxView {
    #[inline]
    pub fn resource(&self) -> &GfxResource {
        &self.inner.resource
    }

    #[inline]
    pub fn slice(&self) -> GfxViewSlice {
        self.inner.slice
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.inner.format
    }

    #[inline]
    pub fn element_stride(&self) -> u32 {
        self.inner.element_stride
    }

    #[inline]
    pub fn dimension(&self) -> GfxResourceDimension {
        self.inner.resource.dimension()
    }

    #[inline]
    pub fn is_buffer(&self) -> bool {
        self.dimension() == GfxResourceDimension::Buffer
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.inner.debug_name
    }

    #[inline]
    pub fn ptr_eq(&self, other: &GfxView) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// 共享同一个 inner 的 view 返回相同的值，只在 view 存活期间唯一
    #[inline]
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    #[inline]
    pub fn covers_whole_resource(&self) -> bool {
        self.inner.slice == GfxViewSlice::whole(self.inner.resource.desc())
    }
}
// 类型转换
impl GfxView {
    pub fn as_buffer(&self) -> Option<GfxBufferView> {
        self.is_buffer().then(|| GfxBufferView(self.clone()))
    }

    /// 任意维度的 texture
    pub fn as_texture(&self) -> Option<GfxTextureView> {
        (!self.is_buffer()).then(|| GfxTextureView(self.clone()))
    }

    pub fn as_texture2d(&self) -> Option<GfxTextureView> {
        (self.dimension() == GfxResourceDimension::Texture2D).then(|| GfxTextureView(self.clone()))
    }

    pub fn as_texture3d(&self) -> Option<GfxTextureView> {
        (self.dimension() == GfxResourceDimension::Texture3D).then(|| GfxTextureView(self.clone()))
    }
}
// 描述符
impl GfxView {
    /// 返回 kind 对应的 CPU 描述符下标，第一次调用时创建并缓存
    pub fn descriptor(&self, kind: GfxDescriptorKind) -> GfxResult<u32> {
        let mut cache = self.inner.descriptors.lock()?;
        if let Some(index) = cache[kind.index()] {
            return Ok(index);
        }

        self.check_descriptor_kind(kind)?;
        let heap = self.resource().ctx().heaps().cpu(kind.heap_kind());
        let index = heap.allocate()?;
        heap.write(
            index,
            GfxDescriptor::View {
                kind,
                memory: self.resource().memory(),
                format: self.format(),
                slice: self.slice(),
                element_stride: self.element_stride(),
            },
        )?;

        cache[kind.index()] = Some(index);
        Ok(index)
    }

    fn check_descriptor_kind(&self, kind: GfxDescriptorKind) -> GfxResult<()> {
        let usage = self.resource().desc().usage;
        let supported = match kind {
            GfxDescriptorKind::ShaderRead => usage.contains(GfxResourceUsage::SHADER_READ),
            GfxDescriptorKind::UnorderedAccess => {
                usage.contains(GfxResourceUsage::UNORDERED_ACCESS) && !self.resource().heap().is_cpu_visible()
            }
            GfxDescriptorKind::Constant => self.is_buffer(),
            GfxDescriptorKind::RenderTarget => !self.is_buffer() && usage.contains(GfxResourceUsage::RENDER_TARGET),
            GfxDescriptorKind::DepthStencil => !self.is_buffer() && usage.contains(GfxResourceUsage::DEPTH_STENCIL),
        };
        if supported {
            Ok(())
        } else {
            Err(GfxError::invalid(format!(
                "{:?} descriptor is not supported by view {} ({:?}, usage {:?})",
                kind,
                self.debug_name(),
                self.dimension(),
                usage
            )))
        }
    }
}
// 布局
impl GfxView {
    /// view 覆盖的 subresource 下标，按 array 优先、mip 其次的顺序
    pub fn subresources(&self) -> Vec<u32> {
        let desc = self.resource().desc();
        let slice = self.slice();
        match desc.dimension {
            GfxResourceDimension::Buffer => vec![0],
            GfxResourceDimension::Texture3D => (slice.mip_start..slice.mip_start + slice.mip_count).collect(),
            GfxResourceDimension::Texture1D | GfxResourceDimension::Texture2D => {
                let mut indices = Vec::with_capacity((slice.array_count * slice.mip_count) as usize);
                for array in slice.array_start..slice.array_start + slice.array_count {
                    for mip in slice.mip_start..slice.mip_start + slice.mip_count {
                        indices.push(desc.subresource_index(mip, array));
                    }
                }
                indices
            }
        }
    }

    /// view 覆盖的 footprint；buffer 的 footprint 被裁剪到 element 范围
    pub fn footprints(&self) -> GfxResult<Vec<GfxPlacedFootprint>> {
        if self.is_buffer() {
            let (offset, size) = self.buffer_range()?;
            return Ok(vec![GfxPlacedFootprint {
                offset,
                width: self.slice().element_count,
                height: 1,
                depth: 1,
                row_pitch: size,
                texel_size: self.element_stride(),
            }]);
        }

        let footprints = self.resource().footprints();
        self.subresources().into_iter().map(|index| footprints.get(index)).collect()
    }

    /// buffer view 的字节偏移与大小
    pub fn buffer_range(&self) -> GfxResult<(u64, u64)> {
        if !self.is_buffer() {
            return Err(GfxError::invalid(format!("{} is not a buffer view", self.debug_name())));
        }
        let slice = self.slice();
        let stride = self.element_stride() as u64;
        Ok((slice.element_start as u64 * stride, slice.element_count as u64 * stride))
    }

    /// clear 命令使用的行区域
    pub fn fill_regions(&self) -> GfxResult<Vec<GfxFillRegion>> {
        Ok(self
            .footprints()?
            .iter()
            .map(|fp| GfxFillRegion {
                offset: fp.offset,
                row_bytes: fp.row_bytes(),
                rows: fp.height * fp.depth,
                row_pitch: fp.row_pitch,
            })
            .collect())
    }

    /// 紧密排列时 view 的数据大小
    pub fn packed_size(&self) -> GfxResult<u64> {
        Ok(self
            .footprints()?
            .iter()
            .map(|fp| fp.row_bytes() * fp.height as u64 * fp.depth as u64)
            .sum())
    }
}

impl std::fmt::Debug for GfxView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GfxView")
            .field("name", &self.inner.debug_name)
            .field("resource", &self.inner.resource)
            .field("slice", &self.inner.slice)
            .finish()
    }
}

/// 确认为 buffer 的 view
#[derive(Clone, Debug)]
pub struct GfxBufferView(GfxView);

impl GfxBufferView {
    #[inline]
    pub fn element_count(&self) -> u32 {
        self.0.slice().element_count
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.element_count() as u64 * self.0.element_stride() as u64
    }

    #[inline]
    pub fn into_view(self) -> GfxView {
        self.0
    }
}

impl Deref for GfxBufferView {
    type Target = GfxView;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// 确认为 texture 的 view
#[derive(Clone, Debug)]
pub struct GfxTextureView(GfxView);

impl GfxTextureView {
    /// 第一个 mip 的尺寸
    pub fn extent(&self) -> (u32, u32, u32) {
        self.0.resource().desc().mip_extent(self.0.slice().mip_start)
    }

    #[inline]
    pub fn into_view(self) -> GfxView {
        self.0
    }
}

impl Deref for GfxTextureView {
    type Target = GfxView;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
