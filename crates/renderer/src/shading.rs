//! Composition pass.
//!
//! Clears the acquired image, lets the caller draw into it (the overlay, in
//! practice) and leaves it ready for presentation.

use ash::vk;

use kiln_rhi::RhiResult;
use kiln_rhi::backend::DrawDevice;

use crate::target::TargetImage;

/// Whether writes to `format` are sRGB-encoded by the hardware.
pub fn is_srgb_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::R8_SRGB
            | vk::Format::R8G8_SRGB
            | vk::Format::R8G8B8_SRGB
            | vk::Format::B8G8R8_SRGB
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::B8G8R8A8_SRGB
            | vk::Format::A8B8G8R8_SRGB_PACK32
    )
}

/// Converts one sRGB-encoded channel in `[0, 1]` to linear.
pub fn srgb_to_linear(value: f32) -> f32 {
    if value <= 0.04045 {
        value / 12.92
    } else {
        ((value + 0.055) / 1.055).powf(2.4)
    }
}

/// Converts the colour channels of an sRGB colour, keeping alpha.
pub fn srgb_color_to_linear(color: [f32; 4]) -> [f32; 4] {
    [
        srgb_to_linear(color[0]),
        srgb_to_linear(color[1]),
        srgb_to_linear(color[2]),
        color[3],
    ]
}

/// Single-attachment pass drawn into the presentable image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadingPass {
    clear_color: [f32; 4],
}

impl Default for ShadingPass {
    fn default() -> Self {
        Self::new([0.0, 0.0, 0.0, 1.0])
    }
}

impl ShadingPass {
    /// `clear_color` is given in sRGB.
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self { clear_color }
    }

    /// Clear value to use for an attachment of `format`.
    pub fn clear_color_for(&self, format: vk::Format) -> [f32; 4] {
        if is_srgb_format(format) {
            srgb_color_to_linear(self.clear_color)
        } else {
            self.clear_color
        }
    }

    /// Records the pass into `cmd`, calling `draw` inside rendering.
    ///
    /// If `draw` fails, rendering is still ended so the buffer can be closed,
    /// and the error is returned.
    pub fn record<D, F>(
        &self,
        device: &D,
        cmd: vk::CommandBuffer,
        target: &TargetImage,
        draw: F,
    ) -> RhiResult<()>
    where
        D: DrawDevice + ?Sized,
        F: FnOnce(vk::CommandBuffer) -> RhiResult<()>,
    {
        device.transition_image(
            cmd,
            target.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        device.begin_rendering(
            cmd,
            target.view,
            target.extent,
            self.clear_color_for(target.format),
        );
        device.set_viewport(cmd, target.extent.width as f32, target.extent.height as f32);
        device.set_scissor(
            cmd,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            },
        );

        let result = draw(cmd);

        device.end_rendering(cmd);
        device.transition_image(
            cmd,
            target.image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDevice};
    use ash::vk::Handle;
    use kiln_rhi::RhiError;

    fn target(format: vk::Format) -> TargetImage {
        TargetImage {
            image: vk::Image::from_raw(10),
            view: vk::ImageView::from_raw(11),
            extent: vk::Extent2D {
                width: 320,
                height: 240,
            },
            format,
        }
    }

    #[test]
    fn test_srgb_conversion() {
        assert_eq!(srgb_to_linear(0.0), 0.0);
        assert!((srgb_to_linear(1.0) - 1.0).abs() < 1e-6);
        assert!((srgb_to_linear(0.5) - 0.214).abs() < 1e-3);
        assert!(is_srgb_format(vk::Format::B8G8R8A8_SRGB));
        assert!(!is_srgb_format(vk::Format::B8G8R8A8_UNORM));
    }

    #[test]
    fn test_clear_color_depends_on_format() {
        let pass = ShadingPass::new([0.5, 0.5, 0.5, 0.5]);
        assert_eq!(pass.clear_color_for(vk::Format::B8G8R8A8_UNORM), [0.5; 4]);
        let linear = pass.clear_color_for(vk::Format::B8G8R8A8_SRGB);
        assert!(linear[0] < 0.5);
        assert_eq!(linear[3], 0.5);
    }

    #[test]
    fn test_record_order() {
        let device = MockDevice::new();
        let pass = ShadingPass::default();
        pass.record(&*device, vk::CommandBuffer::null(), &target(vk::Format::B8G8R8A8_UNORM), |_| Ok(()))
            .unwrap();

        let calls = device.calls();
        assert_eq!(
            calls.first(),
            Some(&Call::Transition(
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            ))
        );
        assert_eq!(calls[1], Call::BeginRendering([0.0, 0.0, 0.0, 1.0]));
        assert_eq!(calls[2], Call::Viewport(320.0, 240.0));
        assert_eq!(calls[calls.len() - 2], Call::EndRendering);
        assert_eq!(
            calls.last(),
            Some(&Call::Transition(
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR
            ))
        );
    }

    #[test]
    fn test_failed_draw_still_ends_rendering() {
        let device = MockDevice::new();
        let pass = ShadingPass::default();
        let result = pass.record(&*device, vk::CommandBuffer::null(), &target(vk::Format::R8G8B8A8_UNORM), |_| {
            Err(RhiError::BufferError("lost".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(device.count(|call| *call == Call::EndRendering), 1);
    }
}
