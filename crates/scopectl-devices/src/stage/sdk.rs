use scopectl_core::types::Position;

use crate::device::{Hardware, Result};

/// Stage controller seam (Ludl-style serial controller)
pub trait StageSdk: Hardware {
    /// Whether the controller answered when the link was opened
    fn status(&self) -> bool;

    /// Move to an absolute XY position in microns
    fn go_absolute(&mut self, x: f64, y: f64) -> Result<()>;

    /// Move by an XY offset in microns
    fn go_relative(&mut self, dx: f64, dy: f64) -> Result<()>;

    /// Maximum XY speed
    fn set_velocity(&mut self, vx: f64, vy: f64) -> Result<()>;

    /// Current position as reported by the controller
    fn position(&mut self) -> Result<Position>;

    /// Make the current position the origin
    fn zero(&mut self) -> Result<()>;

    /// Enable or disable the joystick
    fn joystick_on_off(&mut self, on: bool) -> Result<()>;
}
