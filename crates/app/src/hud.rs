//! Frame-time graph drawn through the overlay.

use std::collections::VecDeque;

use glam::Vec2;

use kiln_renderer::OverlayContext;
use kiln_renderer::overlay::pack_color;
use kiln_renderer::shading::srgb_to_linear;

const HISTORY: usize = 120;
const BAR_WIDTH: f32 = 3.0;
const PANEL_ORIGIN: Vec2 = Vec2::new(12.0, 12.0);
const PANEL_HEIGHT: f32 = 90.0;
/// Pixels per millisecond of frame time.
const MS_SCALE: f32 = 3.0;
/// 60 Hz budget line.
const BUDGET_MS: f32 = 1000.0 / 60.0;

/// Rolling frame-time history and the draw lists built from it.
pub struct Hud {
    frame_times: VecDeque<f32>,
    vsync: bool,
}

impl Hud {
    pub fn new() -> Self {
        Self {
            frame_times: VecDeque::with_capacity(HISTORY),
            vsync: false,
        }
    }

    pub fn push_frame_time(&mut self, seconds: f32) {
        if self.frame_times.len() == HISTORY {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(seconds * 1000.0);
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
    }

    /// Rebuilds this frame's draw data.
    pub fn build(&self, context: &mut OverlayContext, display_size: Vec2, srgb_target: bool) {
        context.new_frame(display_size);
        if !context.is_active() {
            return;
        }

        let color = |rgba: [u8; 4]| encode(rgba, srgb_target);
        let panel_size = Vec2::new(BAR_WIDTH * HISTORY as f32, PANEL_HEIGHT);
        let panel_max = PANEL_ORIGIN + panel_size;
        let clip = [PANEL_ORIGIN.x, PANEL_ORIGIN.y, panel_max.x, panel_max.y];

        let list = context.list_mut();
        list.push_rect(PANEL_ORIGIN, panel_max, color([16, 16, 20, 200]));

        for (i, &ms) in self.frame_times.iter().enumerate() {
            let height = (ms * MS_SCALE).min(PANEL_HEIGHT);
            let x = PANEL_ORIGIN.x + i as f32 * BAR_WIDTH;
            let bar_color = if ms > BUDGET_MS {
                color([230, 90, 60, 255])
            } else {
                color([90, 200, 120, 255])
            };
            list.push_rect_clipped(
                Vec2::new(x, panel_max.y - height),
                Vec2::new(x + BAR_WIDTH - 1.0, panel_max.y),
                bar_color,
                clip,
            );
        }

        let budget_y = panel_max.y - BUDGET_MS * MS_SCALE;
        list.push_rect_clipped(
            Vec2::new(PANEL_ORIGIN.x, budget_y),
            Vec2::new(panel_max.x, budget_y + 1.0),
            color([255, 255, 255, 120]),
            clip,
        );

        let indicator = if self.vsync {
            color([80, 160, 255, 255])
        } else {
            color([255, 200, 60, 255])
        };
        list.push_rect(
            Vec2::new(panel_max.x + 6.0, PANEL_ORIGIN.y),
            Vec2::new(panel_max.x + 18.0, PANEL_ORIGIN.y + 12.0),
            indicator,
        );
    }
}

/// Packs an sRGB colour, linearizing it when the target encodes on write.
fn encode(rgba: [u8; 4], srgb_target: bool) -> u32 {
    if !srgb_target {
        return pack_color(rgba);
    }
    let linear = |c: u8| (srgb_to_linear(c as f32 / 255.0) * 255.0).round() as u8;
    pack_color([linear(rgba[0]), linear(rgba[1]), linear(rgba[2]), rgba[3]])
}
