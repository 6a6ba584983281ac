//! Per-frame context and the stock sub-recorders.
//!
//! [`register_frame_recorders`] installs the three sub-passes every frame
//! runs, in order:
//!
//! 1. `staging`: queued buffer uploads
//! 2. `process`: the application's per-frame hook, if any
//! 3. `shading`: the composition pass, with the overlay drawn inside it
//!
//! The hook runs after uploads are recorded and before composition, so
//! whatever it changes is visible to the shading pass of the same frame.

use std::sync::Arc;

use ash::vk;

use kiln_rhi::backend::{BufferAllocator, CommandDevice, DrawDevice};
use kiln_rhi::{RhiError, RhiResult};

use crate::FrameSlot;
use crate::block::{CommandBlock, CommandId};
use crate::overlay::Overlay;
use crate::shading::ShadingPass;
use crate::staging::Staging;
use crate::target::TargetImage;

/// Application logic run between staging and composition.
pub type ProcessHook<A> =
    Box<dyn FnMut(vk::CommandBuffer, FrameSlot, &mut FrameContext<A>) -> RhiResult<()>>;

/// State the stock sub-recorders borrow each frame.
pub struct FrameContext<A: BufferAllocator> {
    /// Swapchain image acquired for the current frame.
    pub image: Option<TargetImage>,
    pub staging: Staging<A>,
    pub shading: ShadingPass,
    pub overlay: Option<Overlay<A>>,
    on_process: Option<ProcessHook<A>>,
}

impl<A: BufferAllocator> FrameContext<A> {
    /// Staging starts without slots; size it once the target exists.
    pub fn new(allocator: A, shading: ShadingPass) -> Self {
        Self {
            image: None,
            staging: Staging::new(allocator, 0),
            shading,
            overlay: None,
            on_process: None,
        }
    }

    /// Installs the per-frame hook, replacing any previous one.
    pub fn set_on_process(
        &mut self,
        hook: impl FnMut(vk::CommandBuffer, FrameSlot, &mut FrameContext<A>) -> RhiResult<()> + 'static,
    ) {
        self.on_process = Some(Box::new(hook));
    }

    pub fn has_on_process(&self) -> bool {
        self.on_process.is_some()
    }

    fn run_on_process(&mut self, cmd: vk::CommandBuffer, slot: FrameSlot) -> RhiResult<()> {
        let Some(mut hook) = self.on_process.take() else {
            return Ok(());
        };
        let result = hook(cmd, slot, self);
        // A hook installed from inside the hook wins.
        if self.on_process.is_none() {
            self.on_process = Some(hook);
        }
        result
    }
}

/// Registers `staging`, `process` and `shading` on `block`, in that order.
pub fn register_frame_recorders<D, A>(
    block: &mut CommandBlock<D, FrameContext<A>>,
    device: Arc<D>,
) -> [CommandId; 3]
where
    D: CommandDevice + DrawDevice + 'static,
    A: BufferAllocator + 'static,
{
    let staging_device = device.clone();
    let staging = block.add("staging", move |cmd, slot, frame: &mut FrameContext<A>| {
        frame.staging.stage(&*staging_device, cmd, slot)
    });

    let process = block.add("process", |cmd, slot, frame: &mut FrameContext<A>| {
        frame.run_on_process(cmd, slot)
    });

    let shading = block.add("shading", move |cmd, slot, frame: &mut FrameContext<A>| {
        let image = frame
            .image
            .ok_or_else(|| RhiError::InvalidHandle("no acquired image".to_string()))?;
        let FrameContext {
            shading, overlay, ..
        } = frame;
        shading.record(&*device, cmd, &image, |cmd| {
            if let Some(overlay) = overlay.as_mut() {
                overlay.record(&*device, cmd, slot);
            }
            Ok(())
        })
    });

    [staging, process, shading]
}
