use prism_gfx::{
    GfxError, GfxResult, descriptors::heaps::GfxHeapSettings, gfx_context::GfxLimits,
};
use serde::{Deserialize, Serialize};

/// 调度器的配置
///
/// 可以从 TOML 加载，缺省字段使用默认值：
///
/// ```toml
/// buffering = 2
/// worker_count = 4
///
/// [heaps]
/// gpu_csu_capacity = 4096
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuSchedulerSettings {
    /// 同时在飞的帧数，也是每帧资源（allocator、描述符区域）的份数
    pub buffering: u32,
    /// 录制槽位数；槽位 0 属于 submitter 线程，其余每个对应一个 worker 线程
    pub worker_count: u32,
    /// 关闭时 `finish_frame` 会立即等待 GPU 完成
    pub frame_buffering: bool,

    pub heaps: GfxHeapSettings,
    pub limits: GfxLimits,
}

impl Default for GpuSchedulerSettings {
    fn default() -> Self {
        Self {
            buffering: 3,
            worker_count: 8,
            frame_buffering: true,
            heaps: GfxHeapSettings::default(),
            limits: GfxLimits::default(),
        }
    }
}

impl GpuSchedulerSettings {
    pub fn from_toml_str(text: &str) -> GfxResult<Self> {
        let settings: Self = toml::from_str(text)
            .map_err(|e| GfxError::construction(format!("invalid scheduler settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> GfxResult<()> {
        if self.buffering == 0 {
            return Err(GfxError::construction("buffering must be at least 1"));
        }
        if self.worker_count < 2 {
            return Err(GfxError::construction(format!(
                "worker_count must be at least 2 (submitter + one worker), got {}",
                self.worker_count
            )));
        }

        let heaps = &self.heaps;
        for (name, persistent, capacity) in [
            ("csu", heaps.gpu_csu_persistent, heaps.gpu_csu_capacity),
            ("sampler", heaps.gpu_sampler_persistent, heaps.gpu_sampler_capacity),
        ] {
            if persistent > capacity {
                return Err(GfxError::construction(format!(
                    "gpu {name} heap: persistent region {persistent} is larger than the heap ({capacity})"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = GpuSchedulerSettings::default();
        assert_eq!(settings.buffering, 3);
        assert_eq!(settings.worker_count, 8);
        assert!(settings.frame_buffering);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_toml_keeps_defaults_for_missing_fields() {
        let settings = GpuSchedulerSettings::from_toml_str(
            r#"
            buffering = 2
            frame_buffering = false

            [heaps]
            gpu_csu_capacity = 4096
            gpu_csu_persistent = 64

            [limits]
            max_scratch_bytes = 1048576
            "#,
        )
        .unwrap();

        assert_eq!(settings.buffering, 2);
        assert_eq!(settings.worker_count, 8);
        assert!(!settings.frame_buffering);
        assert_eq!(settings.heaps.gpu_csu_capacity, 4096);
        assert_eq!(settings.heaps.gpu_sampler_capacity, GfxHeapSettings::default().gpu_sampler_capacity);
        assert_eq!(settings.limits.max_scratch_bytes, 1 << 20);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(matches!(
            GpuSchedulerSettings::from_toml_str("buffering = 0"),
            Err(GfxError::ConstructionFailure(_))
        ));
        assert!(matches!(
            GpuSchedulerSettings::from_toml_str("worker_count = 1"),
            Err(GfxError::ConstructionFailure(_))
        ));
        assert!(matches!(
            GpuSchedulerSettings::from_toml_str("[heaps]\ngpu_csu_capacity = 10\ngpu_csu_persistent = 20"),
            Err(GfxError::ConstructionFailure(_))
        ));
        assert!(matches!(
            GpuSchedulerSettings::from_toml_str("buffering = \"three\""),
            Err(GfxError::ConstructionFailure(_))
        ));
    }
}
