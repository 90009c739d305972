use ash::vk;

use crate::{
    basic::format::{GfxComponentKind, format_info},
    error::{GfxError, GfxResult},
};

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum GfxClearValue {
    Uint([u32; 4]),
    Float([f32; 4]),
}

impl GfxClearValue {
    fn as_u32(&self, component: usize) -> u32 {
        match self {
            Self::Uint(v) => v[component % 4],
            Self::Float(v) => v[component % 4] as u32,
        }
    }

    fn as_f32(&self, component: usize) -> f32 {
        match self {
            Self::Uint(v) => v[component % 4] as f32,
            Self::Float(v) => v[component % 4],
        }
    }

    /// 原样保留 bit pattern，用于 buffer 的 clear
    fn raw_bits(&self, component: usize) -> u32 {
        match self {
            Self::Uint(v) => v[component % 4],
            Self::Float(v) => v[component % 4].to_bits(),
        }
    }
}

/// 计算一个元素（buffer）或一个 texel（纹理）的 clear 字节序列
///
/// - buffer：`format` 为 `UNDEFINED`，元素按 32 位分量依次取 `value` 的四个分量
/// - 纹理：按格式的分量类型转换
pub fn encode_clear_pattern(format: vk::Format, element_stride: u32, value: GfxClearValue) -> GfxResult<Vec<u8>> {
    if format == vk::Format::UNDEFINED {
        if element_stride == 0 || element_stride % 4 != 0 {
            return Err(GfxError::invalid(format!(
                "buffer clear requires a stride that is a multiple of 4, got {element_stride}"
            )));
        }
        return Ok((0..(element_stride / 4) as usize).flat_map(|c| value.raw_bits(c).to_le_bytes()).collect());
    }

    let info = format_info(format).ok_or_else(|| GfxError::invalid(format!("format {format:?} can not be cleared")))?;
    let mut pattern = Vec::with_capacity(info.texel_size as usize);
    for c in 0..info.components as usize {
        match (info.kind, info.component_size()) {
            (GfxComponentKind::Unorm, 1) => {
                let byte = match value {
                    GfxClearValue::Float(_) => (value.as_f32(c).clamp(0.0, 1.0) * 255.0).round() as u8,
                    GfxClearValue::Uint(_) => value.as_u32(c) as u8,
                };
                pattern.push(byte);
            }
            (GfxComponentKind::Uint | GfxComponentKind::Sint, 1) => pattern.push(value.as_u32(c) as u8),
            (GfxComponentKind::Uint | GfxComponentKind::Sint, 2) => {
                pattern.extend_from_slice(&(value.as_u32(c) as u16).to_le_bytes())
            }
            (GfxComponentKind::Uint | GfxComponentKind::Sint, 4) => pattern.extend_from_slice(&value.as_u32(c).to_le_bytes()),
            (GfxComponentKind::Float, 4) => pattern.extend_from_slice(&value.as_f32(c).to_le_bytes()),
            (kind, size) => {
                return Err(GfxError::invalid(format!(
                    "unsupported clear component {kind:?} x {size} bytes for {format:?}"
                )));
            }
        }
    }
    Ok(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pattern_repeats_components() {
        let pattern = encode_clear_pattern(vk::Format::UNDEFINED, 8, GfxClearValue::Uint([7, 9, 0, 0])).unwrap();
        assert_eq!(pattern, [7u32.to_le_bytes(), 9u32.to_le_bytes()].concat());

        assert!(encode_clear_pattern(vk::Format::UNDEFINED, 6, GfxClearValue::Uint([0; 4])).is_err());
    }

    #[test]
    fn test_texture_pattern_by_format() {
        let rgba8 = encode_clear_pattern(vk::Format::R8G8B8A8_UNORM, 4, GfxClearValue::Float([1.0, 0.0, 0.5, 2.0]))
            .unwrap();
        assert_eq!(rgba8, vec![255, 0, 128, 255]);

        let r32f = encode_clear_pattern(vk::Format::R32_SFLOAT, 4, GfxClearValue::Float([0.25, 0.0, 0.0, 0.0])).unwrap();
        assert_eq!(r32f, 0.25f32.to_le_bytes().to_vec());

        assert!(encode_clear_pattern(vk::Format::BC1_RGB_UNORM_BLOCK, 8, GfxClearValue::Uint([0; 4])).is_err());
    }
}
