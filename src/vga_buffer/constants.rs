//! Geometry of the standard VGA text-mode buffer.

/// Number of character rows on screen.
pub const BUFFER_HEIGHT: usize = 25;
/// Number of character columns on screen.
pub const BUFFER_WIDTH: usize = 80;
