use std::sync::{Arc, Mutex};

use crate::{
    basic::engine::GfxEngine,
    commands::command_list::GfxRecordedList,
    error::{GfxError, GfxResult},
    foundation::device::{GfxDevice, GfxFenceId},
};

/// 当 fence 到达 value 时满足
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxWaitHandle {
    pub fence: GfxFenceId,
    pub value: u64,
}

/// 一个硬件提交通道，以及它的完成计数器
///
/// 计数器从 0 开始，每次 `signal_completion` 加一；返回值可以交给 `wait_handle`。
pub struct GfxQueueChannel {
    engine: GfxEngine,
    device: Arc<dyn GfxDevice>,
    fence: GfxFenceId,

    /// 最近一次 signal 的值，同时串行化 signal 的顺序
    last_signaled: Mutex<u64>,
}
// new & init
impl GfxQueueChannel {
    pub fn new(device: Arc<dyn GfxDevice>, engine: GfxEngine) -> GfxResult<Self> {
        let fence = device.create_fence(0, &format!("{}-queue-fence", engine))?;
        log::info!("queue channel created: {} on {}", engine, device.adapter_name());
        Ok(Self {
            engine,
            device,
            fence,
            last_signaled: Mutex::new(0),
        })
    }
}
// getters
impl GfxQueueChannel {
    #[inline]
    pub fn engine(&self) -> GfxEngine {
        self.engine
    }

    #[inline]
    pub fn fence(&self) -> GfxFenceId {
        self.fence
    }

    pub fn last_signaled(&self) -> GfxResult<u64> {
        Ok(*self.last_signaled.lock()?)
    }

    pub fn completed_value(&self) -> GfxResult<u64> {
        self.device.fence_completed_value(self.fence)
    }
}
// tools
impl GfxQueueChannel {
    /// 按顺序执行 lists；失败不会重试
    pub fn submit(&self, lists: &[Arc<GfxRecordedList>]) -> GfxResult<()> {
        if lists.is_empty() {
            return Ok(());
        }
        if let Some(list) = lists.iter().find(|list| list.engine != self.engine) {
            return Err(GfxError::invalid(format!(
                "list {} was recorded for {} but submitted to {}",
                list.debug_name, list.engine, self.engine
            )));
        }

        self.device.execute_command_lists(self.engine, lists).inspect_err(|e| {
            log::error!("submit on {} failed: {}", self.engine, e);
        })
    }

    /// 计数器加一，并在 queue 上排入对应的 signal，返回新的计数值
    pub fn signal_completion(&self) -> GfxResult<u64> {
        let mut last = self.last_signaled.lock()?;
        let value = *last + 1;
        self.device.signal_fence(self.engine, self.fence, value)?;
        *last = value;
        Ok(value)
    }

    #[inline]
    pub fn wait_handle(&self, value: u64) -> GfxWaitHandle {
        GfxWaitHandle {
            fence: self.fence,
            value,
        }
    }

    /// 等待 queue 上已经提交的所有工作
    pub fn wait_idle(&self) -> GfxResult<()> {
        let value = self.signal_completion()?;
        self.device.wait_fences(&[self.wait_handle(value)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::soft_device::GfxSoftDevice;

    #[test]
    fn test_signal_values_are_monotonic() {
        let device: Arc<dyn GfxDevice> = Arc::new(GfxSoftDevice::new());
        let queue = GfxQueueChannel::new(device.clone(), GfxEngine::Copy).unwrap();

        let first = queue.signal_completion().unwrap();
        let second = queue.signal_completion().unwrap();
        assert_eq!((first, second), (1, 2));

        device.wait_fences(&[queue.wait_handle(second)]).unwrap();
        assert!(queue.completed_value().unwrap() >= second);
    }

    #[test]
    fn test_lost_device_fails_submission() {
        let soft = Arc::new(GfxSoftDevice::new());
        let device: Arc<dyn GfxDevice> = soft.clone();
        let queue = GfxQueueChannel::new(device, GfxEngine::Graphics).unwrap();

        soft.lose_device("unit test");
        assert!(matches!(queue.signal_completion(), Err(GfxError::DeviceLost(_))));
    }
}
