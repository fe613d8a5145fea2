//! Pan/zoom transform between world space and screen space.

use crate::error::{LayoutError, Result};
use crate::vector::Vec2;

/// Viewport handed to the renderer each frame.
///
/// `screen = world * zoom + offset + screen_center`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Viewport {
    /// Pan offset in screen units
    pub offset: Vec2,
    /// Scale factor, always positive
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            offset: Vec2::ZERO,
            zoom: 1.0,
        }
    }
}

impl Viewport {
    /// Create a viewport; `zoom` must be finite and positive.
    pub fn new(offset: Vec2, zoom: f64) -> Result<Self> {
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(LayoutError::InvalidZoom(zoom));
        }
        Ok(Self { offset, zoom })
    }

    pub fn world_to_screen(&self, world: Vec2, screen_center: Vec2) -> Vec2 {
        world * self.zoom + self.offset + screen_center
    }

    pub fn screen_to_world(&self, screen: Vec2, screen_center: Vec2) -> Vec2 {
        (screen - screen_center - self.offset) / self.zoom
    }

    /// Pan so that `world` lands on the screen center.
    pub fn focus(&mut self, world: Vec2) {
        self.offset = -(world * self.zoom);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transforms_are_inverse() {
        let viewport = Viewport::new(Vec2::new(15.0, -40.0), 2.0).unwrap();
        let center = Vec2::new(640.0, 400.0);
        let world = Vec2::new(-12.5, 300.0);

        let screen = viewport.world_to_screen(world, center);
        assert_eq!(screen, Vec2::new(630.0, 960.0));
        assert_eq!(viewport.screen_to_world(screen, center), world);
    }

    #[test]
    fn focus_centers_world_point() {
        let mut viewport = Viewport::new(Vec2::ZERO, 0.5).unwrap();
        let center = Vec2::new(100.0, 100.0);
        viewport.focus(Vec2::new(80.0, -20.0));

        assert_eq!(viewport.world_to_screen(Vec2::new(80.0, -20.0), center), center);
    }

    #[test]
    fn rejects_bad_zoom() {
        assert_eq!(Viewport::new(Vec2::ZERO, 0.0), Err(LayoutError::InvalidZoom(0.0)));
        assert!(Viewport::new(Vec2::ZERO, f64::NAN).is_err());
    }
}
