//! 资源状态追踪
//!
//! 每个资源记录最近一次录制的使用状态，录制时按需插入 barrier；
//! CPU 读写通过懒创建的 staging 资源完成。

use crate::{
    commands::{
        barrier::{GfxBarrier, GfxResourceState},
        command::GfxCommand,
        command_list::GfxCommandList,
    },
    error::GfxResult,
    resources::{
        desc::{GfxCpuAccess, GfxResourceDesc},
        resource::GfxResource,
    },
};

// barrier
impl GfxResource {
    pub fn last_state(&self) -> GfxResult<GfxResourceState> {
        Ok(*self.inner.last_state.lock()?)
    }

    /// 录制将资源迁移到 `target` 的 barrier
    ///
    /// - 上一次的使用包含 unordered access 时，先插入 UAV barrier
    /// - 只有状态不同时才插入 transition barrier，并更新记录的状态
    /// - upload 与 readback heap 上的资源状态固定，不插入任何 barrier
    ///
    /// 无论是否插入 barrier，cmd 都会持有资源直到执行完毕。
    pub fn add_barrier(&self, cmd: &mut GfxCommandList, target: GfxResourceState) -> GfxResult<()> {
        cmd.retain_resource(self);
        if self.heap().is_cpu_visible() {
            return Ok(());
        }

        let mut last_state = self.inner.last_state.lock()?;
        if last_state.is_unordered_access() {
            cmd.record(GfxCommand::Barrier(GfxBarrier::UnorderedAccess {
                memory: Some(self.memory()),
            }))?;
        }
        if *last_state != target {
            cmd.record(GfxCommand::Barrier(GfxBarrier::Transition {
                memory: self.memory(),
                before: *last_state,
                after: target,
            }))?;
            *last_state = target;
        }
        Ok(())
    }
}

// staging
impl GfxResource {
    #[inline]
    pub fn is_cpu_writable(&self) -> bool {
        self.cpu_access() == GfxCpuAccess::Write
    }

    #[inline]
    pub fn is_cpu_readable(&self) -> bool {
        self.cpu_access() == GfxCpuAccess::Read
    }

    /// CPU 写入使用的资源：自身可写时返回自身，否则返回（必要时创建）upload staging
    pub fn resolve_upload(&self) -> GfxResult<GfxResource> {
        if self.is_cpu_writable() {
            return Ok(self.clone());
        }
        self.resolve_staging(GfxCpuAccess::Write)
    }

    /// CPU 读取使用的资源：自身可读时返回自身，否则返回（必要时创建）download staging
    pub fn resolve_download(&self) -> GfxResult<GfxResource> {
        if self.is_cpu_readable() {
            return Ok(self.clone());
        }
        self.resolve_staging(GfxCpuAccess::Read)
    }

    fn resolve_staging(&self, access: GfxCpuAccess) -> GfxResult<GfxResource> {
        let mut twins = self.inner.staging.lock()?;
        let slot = match access {
            GfxCpuAccess::Read => &mut twins.download,
            _ => &mut twins.upload,
        };
        if let Some(staging) = slot {
            return Ok(staging.clone());
        }

        // staging 与资源使用相同的线性布局，按字节 buffer 创建
        let suffix = if access == GfxCpuAccess::Read { "download" } else { "upload" };
        let desc = GfxResourceDesc::buffer(self.size(), 1).with_cpu_access(access);
        let staging = GfxResource::new(self.ctx(), desc, &format!("{}-{}", self.debug_name(), suffix))?;
        log::debug!("{} staging created for {} ({} bytes)", suffix, self.debug_name(), self.size());

        *slot = Some(staging.clone());
        Ok(staging)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ash::vk;

    use super::*;
    use crate::{
        basic::engine::GfxEngine,
        commands::command_allocator::GfxCommandAllocator,
        descriptors::heaps::GfxHeapSettings,
        foundation::{device::GfxDevice, soft_device::GfxSoftDevice},
        gfx_context::{GfxContext, GfxLimits},
    };

    fn setup() -> (Arc<GfxContext>, GfxCommandList) {
        prism_crate_tools::init_log::init_test_log();
        let device: Arc<dyn GfxDevice> = Arc::new(GfxSoftDevice::new());
        let settings = GfxHeapSettings {
            gpu_csu_capacity: 64,
            gpu_csu_persistent: 4,
            ..Default::default()
        };
        let ctx = GfxContext::new(device.clone(), &settings, GfxLimits::default(), 2).unwrap();
        let allocator = Arc::new(GfxCommandAllocator::new(device, GfxEngine::Graphics, "alloc").unwrap());
        let mut cmd = GfxCommandList::new(GfxEngine::Graphics, "cmd");
        cmd.begin(allocator).unwrap();
        (ctx, cmd)
    }

    fn count(cmd: &GfxCommandList, pred: impl Fn(&GfxBarrier) -> bool) -> usize {
        cmd.commands()
            .iter()
            .filter(|c| matches!(c, GfxCommand::Barrier(b) if pred(b)))
            .count()
    }

    fn is_transition(b: &GfxBarrier) -> bool {
        matches!(b, GfxBarrier::Transition { .. })
    }

    fn is_uav(b: &GfxBarrier) -> bool {
        matches!(b, GfxBarrier::UnorderedAccess { .. })
    }

    #[test]
    fn test_repeated_barrier_is_idempotent() {
        let (ctx, mut cmd) = setup();
        let resource = GfxResource::new(&ctx, GfxResourceDesc::buffer(16, 4), "buffer").unwrap();

        resource.add_barrier(&mut cmd, GfxResourceState::SHADER_READ_ALL).unwrap();
        assert_eq!(count(&cmd, is_transition), 1);
        resource.add_barrier(&mut cmd, GfxResourceState::SHADER_READ_ALL).unwrap();
        assert_eq!(count(&cmd, is_transition), 1);
        assert_eq!(resource.last_state().unwrap(), GfxResourceState::SHADER_READ_ALL);
    }

    #[test]
    fn test_unordered_access_inserts_hazard_barrier() {
        let (ctx, mut cmd) = setup();
        let resource = GfxResource::new(&ctx, GfxResourceDesc::buffer(16, 4), "uav").unwrap();

        resource.add_barrier(&mut cmd, GfxResourceState::UNORDERED_ACCESS).unwrap();
        assert_eq!(count(&cmd, is_uav), 0);

        // 持续作为 UAV 使用：每次都有 UAV barrier，但没有新的 transition
        resource.add_barrier(&mut cmd, GfxResourceState::UNORDERED_ACCESS).unwrap();
        resource.add_barrier(&mut cmd, GfxResourceState::UNORDERED_ACCESS).unwrap();
        assert_eq!(count(&cmd, is_uav), 2);
        assert_eq!(count(&cmd, is_transition), 1);

        // 离开 UAV 状态时，UAV barrier 排在 transition 之前
        resource.add_barrier(&mut cmd, GfxResourceState::COPY_SRC).unwrap();
        let tail = &cmd.commands()[cmd.commands().len() - 2..];
        assert!(matches!(tail[0], GfxCommand::Barrier(GfxBarrier::UnorderedAccess { .. })));
        assert!(matches!(
            tail[1],
            GfxCommand::Barrier(GfxBarrier::Transition {
                after: GfxResourceState::COPY_SRC,
                ..
            })
        ));
    }

    #[test]
    fn test_staging_is_created_once() {
        let (ctx, _cmd) = setup();
        let texture = GfxResource::new(
            &ctx,
            GfxResourceDesc::texture2d(vk::Format::R8G8B8A8_UNORM, 4, 4, 1, 1),
            "texture",
        )
        .unwrap();

        let first = texture.resolve_upload().unwrap();
        let second = texture.resolve_upload().unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(first.size(), texture.size());
        assert!(first.is_cpu_writable());

        let download = texture.resolve_download().unwrap();
        assert!(!download.ptr_eq(&first));
        assert!(download.is_cpu_readable());
    }

    #[test]
    fn test_cpu_accessible_resource_is_its_own_staging() {
        let (ctx, mut cmd) = setup();
        let upload = GfxResource::new(
            &ctx,
            GfxResourceDesc::buffer(4, 4).with_cpu_access(GfxCpuAccess::Write),
            "upload",
        )
        .unwrap();
        assert!(upload.resolve_upload().unwrap().ptr_eq(&upload));

        // upload heap 的状态固定
        upload.add_barrier(&mut cmd, GfxResourceState::COPY_SRC).unwrap();
        assert!(cmd.commands().is_empty());
        assert_eq!(upload.last_state().unwrap(), GfxResourceState::GENERIC_READ);

        let mapped = upload.mapped().unwrap();
        assert!(Arc::ptr_eq(&mapped, &upload.mapped().unwrap()));
    }
}
