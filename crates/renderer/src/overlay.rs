//! Immediate-mode overlay.
//!
//! The overlay does not build widgets. It accepts per-frame draw data (lists
//! of 2D vertices, 16-bit indices and clipped draw commands) through an
//! explicit [`OverlayContext`], uploads it into the slot's draw buffers and
//! records one scissored indexed draw per command inside the composition
//! pass.
//!
//! # Example
//!
//! ```
//! use glam::Vec2;
//! use kiln_renderer::overlay::{OverlayContext, pack_color};
//!
//! let mut context = OverlayContext::new();
//! context.new_frame(Vec2::new(1280.0, 720.0));
//! let list = context.list_mut();
//! list.push_rect(Vec2::new(10.0, 10.0), Vec2::new(200.0, 60.0), pack_color([255, 255, 255, 200]));
//! assert_eq!(context.draw_data().total_index_count(), 6);
//! ```

use std::mem::offset_of;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use tracing::{debug, warn};

use kiln_rhi::backend::{BufferAllocator, DrawDevice};

use crate::FrameSlot;
use crate::draw_buffer::{DrawBufferPool, PoolStats};

/// Index type of overlay draw lists.
pub type OverlayIndex = u16;

/// Size in bytes of [`OverlayPushConstants`].
pub const OVERLAY_PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<OverlayPushConstants>() as u32;

/// Overlay vertex: position in pixels, texture coordinate, packed RGBA8.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct OverlayVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    pub color: u32,
}

impl OverlayVertex {
    /// Binding 0, per-vertex.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Locations 0 (pos), 1 (uv), 2 (color).
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, uv) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R8G8B8A8_UNORM,
                offset: offset_of!(Self, color) as u32,
            },
        ]
    }
}

/// Packs `[r, g, b, a]` into the vertex colour layout.
pub fn pack_color(rgba: [u8; 4]) -> u32 {
    u32::from_le_bytes(rgba)
}

/// Maps pixel coordinates to clip space: `clip = pos * scale + translate`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct OverlayPushConstants {
    pub scale: Vec2,
    pub translate: Vec2,
}

impl OverlayPushConstants {
    pub fn new(display_pos: Vec2, display_size: Vec2) -> Self {
        let scale = Vec2::splat(2.0) / display_size;
        Self {
            scale,
            translate: Vec2::splat(-1.0) - display_pos * scale,
        }
    }
}

/// A run of indices drawn with one clip rectangle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCommand {
    /// `[min_x, min_y, max_x, max_y]` in display coordinates.
    pub clip_rect: [f32; 4],
    pub elem_count: u32,
}

/// One list of vertices, indices and commands. Indices are local to the list.
#[derive(Clone, Debug, Default)]
pub struct DrawList {
    pub vertices: Vec<OverlayVertex>,
    pub indices: Vec<OverlayIndex>,
    pub commands: Vec<DrawCommand>,
}

impl DrawList {
    /// Appends a solid axis-aligned rectangle clipped to itself.
    ///
    /// Returns false if the list cannot address four more vertices.
    pub fn push_rect(&mut self, min: Vec2, max: Vec2, color: u32) -> bool {
        self.push_rect_clipped(min, max, color, [min.x, min.y, max.x, max.y])
    }

    /// Appends a solid rectangle drawn with `clip_rect`.
    pub fn push_rect_clipped(&mut self, min: Vec2, max: Vec2, color: u32, clip_rect: [f32; 4]) -> bool {
        let base = self.vertices.len();
        if base + 4 > OverlayIndex::MAX as usize + 1 {
            return false;
        }
        let base = base as OverlayIndex;

        let corner = |x: f32, y: f32| OverlayVertex {
            pos: [x, y],
            uv: [0.0, 0.0],
            color,
        };
        self.vertices.extend([
            corner(min.x, min.y),
            corner(max.x, min.y),
            corner(max.x, max.y),
            corner(min.x, max.y),
        ]);
        self.indices
            .extend([0, 1, 2, 0, 2, 3].map(|i: OverlayIndex| base + i));

        match self.commands.last_mut() {
            Some(last) if last.clip_rect == clip_rect => last.elem_count += 6,
            _ => self.commands.push(DrawCommand {
                clip_rect,
                elem_count: 6,
            }),
        }
        true
    }
}

/// Everything the overlay draws in one frame.
#[derive(Clone, Debug, Default)]
pub struct DrawData {
    pub display_pos: Vec2,
    pub display_size: Vec2,
    pub lists: Vec<DrawList>,
}

impl DrawData {
    pub fn total_vertex_count(&self) -> usize {
        self.lists.iter().map(|list| list.vertices.len()).sum()
    }

    pub fn total_index_count(&self) -> usize {
        self.lists.iter().map(|list| list.indices.len()).sum()
    }

    /// Nothing to draw: no indices or no display area.
    pub fn is_empty(&self) -> bool {
        self.total_index_count() == 0 || self.display_size.x <= 0.0 || self.display_size.y <= 0.0
    }
}

/// Overlay state for one frame, owned by the overlay and handed to callers
/// by reference.
#[derive(Debug)]
pub struct OverlayContext {
    draw_data: DrawData,
    active: bool,
}

impl Default for OverlayContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayContext {
    pub fn new() -> Self {
        Self {
            draw_data: DrawData::default(),
            active: true,
        }
    }

    /// Starts a frame: clears previous draw data and sets the display size.
    pub fn new_frame(&mut self, display_size: Vec2) {
        self.draw_data.display_pos = Vec2::ZERO;
        self.draw_data.display_size = display_size;
        self.draw_data.lists.clear();
    }

    /// The last draw list, created on first use this frame.
    pub fn list_mut(&mut self) -> &mut DrawList {
        if self.draw_data.lists.is_empty() {
            self.draw_data.lists.push(DrawList::default());
        }
        let last = self.draw_data.lists.len() - 1;
        &mut self.draw_data.lists[last]
    }

    /// Appends a complete list.
    pub fn push_list(&mut self, list: DrawList) {
        self.draw_data.lists.push(list);
    }

    pub fn draw_data(&self) -> &DrawData {
        &self.draw_data
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Flips activation and returns the new state.
    pub fn toggle_active(&mut self) -> bool {
        self.active = !self.active;
        self.active
    }
}

/// Pipeline handles the overlay draws with.
///
/// The objects behind these handles are owned elsewhere and must outlive the
/// overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// Overlay renderer: context, per-slot draw buffers and pipeline.
pub struct Overlay<A: BufferAllocator> {
    context: OverlayContext,
    pool: DrawBufferPool<A>,
    pipeline: Option<OverlayPipeline>,
    vertex_bytes: Vec<u8>,
    index_bytes: Vec<u8>,
    warned_no_pipeline: bool,
}

impl<A: BufferAllocator> Overlay<A> {
    /// Creates an overlay with one draw-buffer slot per frame.
    ///
    /// Without a pipeline the overlay keeps accepting draw data but draws
    /// nothing.
    pub fn new(
        allocator: A,
        frame_count: usize,
        alignment: vk::DeviceSize,
        pipeline: Option<OverlayPipeline>,
    ) -> Self {
        debug!(frame_count, has_pipeline = pipeline.is_some(), "Overlay created");
        Self {
            context: OverlayContext::new(),
            pool: DrawBufferPool::new(allocator, frame_count, alignment),
            pipeline,
            vertex_bytes: Vec::new(),
            index_bytes: Vec::new(),
            warned_no_pipeline: false,
        }
    }

    pub fn context(&self) -> &OverlayContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut OverlayContext {
        &mut self.context
    }

    pub fn pool(&self) -> &DrawBufferPool<A> {
        &self.pool
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn frame_count(&self) -> usize {
        self.pool.slot_count()
    }

    /// Records this frame's draw data for `slot` into `cmd`.
    ///
    /// Must be called inside dynamic rendering. Returns whether anything was
    /// drawn. Inactive overlays, empty draw data, a missing pipeline and
    /// failed uploads all skip the draw without creating buffers.
    pub fn record<D: DrawDevice + ?Sized>(
        &mut self,
        device: &D,
        cmd: vk::CommandBuffer,
        slot: FrameSlot,
    ) -> bool {
        let Self {
            context,
            pool,
            pipeline,
            vertex_bytes,
            index_bytes,
            warned_no_pipeline,
        } = self;

        let data = &context.draw_data;
        if !context.active || data.is_empty() {
            return false;
        }

        let Some(pipeline) = *pipeline else {
            if !*warned_no_pipeline {
                warn!("Overlay has no pipeline; draw data is ignored");
                *warned_no_pipeline = true;
            }
            return false;
        };

        vertex_bytes.clear();
        index_bytes.clear();
        for list in &data.lists {
            vertex_bytes.extend_from_slice(bytemuck::cast_slice(&list.vertices));
            index_bytes.extend_from_slice(bytemuck::cast_slice(&list.indices));
        }

        let Some(draw) = pool.upload(slot, vertex_bytes, index_bytes) else {
            return false;
        };

        device.bind_pipeline(cmd, pipeline.pipeline);
        device.bind_vertex_buffer(cmd, draw.vertex_buffer);
        device.bind_index_buffer(cmd, draw.index_buffer, vk::IndexType::UINT16);
        device.set_viewport(cmd, data.display_size.x, data.display_size.y);

        let push = OverlayPushConstants::new(data.display_pos, data.display_size);
        device.push_constants(cmd, pipeline.layout, 0, bytemuck::bytes_of(&push));

        let mut vertex_offset = 0usize;
        let mut list_start = 0u32;
        for list in &data.lists {
            let list_len = list.indices.len() as u32;
            let mut used = 0u32;
            for command in &list.commands {
                // Never read past the indices this list uploaded.
                let count = command.elem_count.min(list_len - used);
                if count < command.elem_count {
                    debug!(
                        requested = command.elem_count,
                        available = count,
                        "Overlay draw command clamped to list indices"
                    );
                }
                if count == 0 {
                    continue;
                }
                if let Some(scissor) = scissor_rect(command.clip_rect, data.display_pos, data.display_size) {
                    device.set_scissor(cmd, scissor);
                    device.draw_indexed(cmd, count, list_start + used, vertex_offset as i32);
                }
                used += count;
            }
            list_start += list_len;
            vertex_offset += list.vertices.len();
        }

        true
    }
}

/// Converts a clip rectangle to a framebuffer scissor, or `None` if nothing
/// of it is visible.
fn scissor_rect(clip_rect: [f32; 4], display_pos: Vec2, display_size: Vec2) -> Option<vk::Rect2D> {
    let min = (Vec2::new(clip_rect[0], clip_rect[1]) - display_pos).max(Vec2::ZERO);
    let max = (Vec2::new(clip_rect[2], clip_rect[3]) - display_pos).min(display_size);
    if max.x <= min.x || max.y <= min.y {
        return None;
    }

    Some(vk::Rect2D {
        offset: vk::Offset2D {
            x: min.x as i32,
            y: min.y as i32,
        },
        extent: vk::Extent2D {
            width: (max.x - min.x) as u32,
            height: (max.y - min.y) as u32,
        },
    })
}
