//! Quadtile keys for node coordinates.
//!
//! Each axis is quantised to 16 bits and the two values are Morton-coded
//! into a single `u32`, longitude in the odd bits and latitude in the even
//! bits. Stored keys and the bounding-box read path depend on this exact
//! bit pattern, so the arithmetic must not be reordered.

/// Largest quantised axis value.
const AXIS_MAX: f64 = 65535.0;

/// Fixed-point scale used to store coordinates as integers.
pub const COORDINATE_SCALE: f64 = 10_000_000.0;

/// Compute the tile key for a WGS84 coordinate in degrees.
///
/// Inputs are expected to be within `[-90, 90]` and `[-180, 180]`; the
/// diff parser rejects anything else before it reaches this function.
///
/// # Examples
/// ```
/// use mapdiff_core::tile_for_point;
///
/// assert_eq!(tile_for_point(0.0, 0.0), 0xC000_0000);
/// assert_eq!(tile_for_point(-90.0, -180.0), 0);
/// ```
#[must_use]
#[expect(
    clippy::float_arithmetic,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "quantising degrees to 16-bit axis values requires float maths"
)]
pub fn tile_for_point(lat: f64, lon: f64) -> u32 {
    let x = ((lon + 180.0) * AXIS_MAX / 360.0).round() as u32;
    let y = ((lat + 90.0) * AXIS_MAX / 180.0).round() as u32;
    tile_for_xy(x, y)
}

/// Interleave two 16-bit axis values, `x` taking the higher bit of each pair.
#[must_use]
pub const fn tile_for_xy(x: u32, y: u32) -> u32 {
    (spread_bits(x) << 1) | spread_bits(y)
}

const fn spread_bits(value: u32) -> u32 {
    let mut v = value & 0xFFFF;
    v = (v | (v << 8)) & 0x00FF_00FF;
    v = (v | (v << 4)) & 0x0F0F_0F0F;
    v = (v | (v << 2)) & 0x3333_3333;
    (v | (v << 1)) & 0x5555_5555
}

/// Convert degrees to the fixed-point integer stored in the database.
///
/// # Examples
/// ```
/// use mapdiff_core::scale_coordinate;
///
/// assert_eq!(scale_coordinate(51.5), 515_000_000);
/// assert_eq!(scale_coordinate(-0.1234567), -1_234_567);
/// ```
#[must_use]
#[expect(
    clippy::float_arithmetic,
    clippy::cast_possible_truncation,
    reason = "fixed-point conversion requires float maths"
)]
pub fn scale_coordinate(degrees: f64) -> i64 {
    (degrees * COORDINATE_SCALE).round() as i64
}

/// Convert a stored fixed-point coordinate back to degrees.
#[must_use]
#[expect(
    clippy::float_arithmetic,
    clippy::cast_precision_loss,
    reason = "fixed-point conversion requires float maths"
)]
pub fn unscale_coordinate(scaled: i64) -> f64 {
    scaled as f64 / COORDINATE_SCALE
}
