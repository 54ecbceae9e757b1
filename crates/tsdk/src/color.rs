//! Color tables for streamed and rendered geometry.

use foxglove_ws::schemas::Color;

const fn rgba(r: f64, g: f64, b: f64, a: f64) -> Color {
    Color { r, g, b, a }
}

/// Box color per category taxonomy name; unknown categories get gray.
pub fn category_color(name: &str) -> Color {
    match name {
        "vehicle.car" => rgba(0.0, 0.5, 1.0, 0.7),
        "vehicle.truck" => rgba(1.0, 0.0, 0.0, 0.7),
        "vehicle.bus" => rgba(1.0, 0.5, 0.0, 0.7),
        "vehicle.bicycle" => rgba(0.0, 1.0, 0.0, 0.7),
        "vehicle.motorcycle" => rgba(0.5, 0.0, 1.0, 0.7),
        "vehicle.trailer" => rgba(0.8, 0.4, 0.0, 0.7),
        "human.pedestrian.adult" => rgba(1.0, 1.0, 0.0, 0.7),
        "human.pedestrian.child" => rgba(1.0, 0.8, 0.0, 0.7),
        "movable_object" => rgba(0.5, 0.5, 0.5, 0.7),
        _ => rgba(0.5, 0.5, 0.5, 0.7),
    }
}

/// Lidar points are a single green.
pub const LIDAR_COLOR: Color = rgba(0.0, 1.0, 0.0, 1.0);

/// Map radar cross-section (dBsm) onto a blue -> yellow -> red ramp.
///
/// The working range is -20..+30 dBsm; values outside clamp to the ramp
/// ends. Red is monotonic in RCS and blue anti-monotonic, so stronger
/// returns always look hotter.
pub fn rcs_color(rcs_dbsm: f32) -> Color {
    let t = f64::from((rcs_dbsm + 20.0) / 50.0).clamp(0.0, 1.0);
    if t < 0.5 {
        rgba(t * 2.0, t * 2.0, 1.0 - t * 2.0, 1.0)
    } else {
        rgba(1.0, 1.0 - (t - 0.5) * 2.0, 0.0, 1.0)
    }
}

/// Height ramp for the bird's-eye-view renderer: dark blue near the
/// ground through green to yellow, over roughly -2..+4 m.
pub fn height_color(z_m: f32) -> Color {
    let t = f64::from((z_m + 2.0) / 6.0).clamp(0.0, 1.0);
    if t < 0.5 {
        rgba(0.1, 0.2 + t * 1.6, 0.8 - t * 1.2, 1.0)
    } else {
        rgba((t - 0.5) * 1.8, 1.0, 0.2 - (t - 0.5) * 0.4, 1.0)
    }
}
