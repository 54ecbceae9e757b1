//! Static visualization: bird's-eye-view PNG rendering of a sample's
//! point clouds and annotation boxes in the vehicle frame.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use foxglove_ws::schemas::Color;
use glam::DVec3;
use image::{Rgb, RgbImage};
use truckscenes::{Sample, TruckScenes};

use crate::color;
use crate::config::Config;
use crate::metrics::DevkitMetrics;
use crate::transform;

/// Output image edge, pixels.
const IMAGE_SIZE: u32 = 800;
/// Half-width of the rendered window, meters around the ego vehicle.
const VIEW_RANGE_M: f64 = 60.0;
const BACKGROUND: Rgb<u8> = Rgb([18, 18, 24]);
const EGO_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

pub fn run(ts: &TruckScenes, config: &Config, metrics: Arc<DevkitMetrics>) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.out)
        .with_context(|| format!("creating output dir {}", config.out.display()))?;

    if let Some(token) = &config.sample {
        tracing::info!(sample = %token, "rendering sample");
        let path = render_sample(ts, token, &config.out)?;
        metrics.renders_written_total.inc();
        tracing::info!(path = %path.display(), "render written");
        return Ok(());
    }

    let scene = match config.scene {
        Some(index) => ts.scene_at(index)?,
        None => match ts.scenes.first() {
            Some(scene) => scene,
            None => bail!("dataset has no scenes"),
        },
    };
    tracing::info!(scene = %scene.name, "rendering scene");
    for sample in ts.scene_samples(&scene.token)? {
        let path = render_sample(ts, &sample.token, &config.out)?;
        metrics.renders_written_total.inc();
        tracing::info!(path = %path.display(), "render written");
    }
    Ok(())
}

/// Render one sample to `<out>/<sample_token>.png`.
pub fn render_sample(ts: &TruckScenes, sample_token: &str, out: &Path) -> anyhow::Result<PathBuf> {
    let sample = ts.sample(sample_token)?;
    let mut img = RgbImage::from_pixel(IMAGE_SIZE, IMAGE_SIZE, BACKGROUND);

    draw_pointclouds(ts, sample, &mut img);
    draw_annotations(ts, sample, &mut img);
    draw_ego_marker(&mut img);

    let path = out.join(format!("{sample_token}.png"));
    img.save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn draw_pointclouds(ts: &TruckScenes, sample: &Sample, img: &mut RgbImage) {
    for (channel, sd_token) in &sample.data {
        let modality = match channel_modality(ts, sd_token) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "cannot resolve sensor, skipping");
                continue;
            }
        };
        let is_lidar = match modality.as_str() {
            "lidar" => true,
            "radar" => false,
            _ => continue,
        };
        if let Err(e) = draw_cloud(ts, sd_token, is_lidar, img) {
            tracing::warn!(channel = %channel, error = %e, "point cloud render failed");
        }
    }
}

fn channel_modality(ts: &TruckScenes, sd_token: &str) -> anyhow::Result<String> {
    let sd = ts.sample_data(sd_token)?;
    let cal = ts.calibrated_sensor(&sd.calibrated_sensor_token)?;
    Ok(ts.sensor(&cal.sensor_token)?.modality.clone())
}

fn draw_cloud(
    ts: &TruckScenes,
    sd_token: &str,
    is_lidar: bool,
    img: &mut RgbImage,
) -> anyhow::Result<()> {
    let path = ts.sample_data_path(sd_token)?;
    let sd = ts.sample_data(sd_token)?;
    let cal = ts.calibrated_sensor(&sd.calibrated_sensor_token)?;

    let cloud = if is_lidar {
        pointcloud::read_lidar_file(&path)
    } else {
        pointcloud::read_radar_file(&path)
    }
    .with_context(|| format!("decoding {}", path.display()))?;

    for p in 0..cloud.points() {
        let pos = cloud.position(p);
        // Sensor frame into the vehicle frame via the extrinsics.
        let ego = transform::sensor_to_ego(
            cal.translation,
            cal.rotation,
            DVec3::new(f64::from(pos[0]), f64::from(pos[1]), f64::from(pos[2])),
        );
        let Some((u, v)) = project(ego.x, ego.y) else {
            continue;
        };
        let c = if is_lidar {
            color::height_color(ego.z as f32)
        } else {
            color::rcs_color(cloud.get(pointcloud::RCS_CHANNEL, p))
        };
        img.put_pixel(u, v, to_rgb(c));
    }
    Ok(())
}

fn draw_annotations(ts: &TruckScenes, sample: &Sample, img: &mut RgbImage) {
    // Ego pose from any of the sample's sensor readings.
    let Some(sd_token) = sample.data.values().next() else {
        return;
    };
    let ego = match ts
        .sample_data(sd_token)
        .and_then(|sd| ts.ego_pose(&sd.ego_pose_token))
    {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "no ego pose for sample, skipping annotations");
            return;
        }
    };

    for ann_token in &sample.anns {
        let (ann, category) = match ts
            .sample_annotation(ann_token)
            .and_then(|ann| ts.annotation_category(ann).map(|c| (ann, c)))
        {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(annotation = %ann_token, error = %e, "annotation lookup failed");
                continue;
            }
        };
        let rel = transform::ego_relative(ego.translation, ego.rotation, ann.translation, ann.rotation);
        let rgb = to_rgb(color::category_color(&category.name));
        draw_box_outline(img, rel, ann.size, rgb);
    }
}

/// Draw a box footprint: the four ground-plane corners, yaw applied.
fn draw_box_outline(
    img: &mut RgbImage,
    rel: transform::RelativePose,
    size: [f64; 3],
    rgb: Rgb<u8>,
) {
    let [width, length, _height] = size;
    let half_l = length / 2.0;
    let half_w = width / 2.0;
    let corners = [
        DVec3::new(half_l, half_w, 0.0),
        DVec3::new(half_l, -half_w, 0.0),
        DVec3::new(-half_l, -half_w, 0.0),
        DVec3::new(-half_l, half_w, 0.0),
    ];
    let projected: Vec<Option<(u32, u32)>> = corners
        .iter()
        .map(|&c| {
            let p = rel.orientation * c + rel.position;
            project(p.x, p.y)
        })
        .collect();
    for i in 0..4 {
        if let (Some(a), Some(b)) = (projected[i], projected[(i + 1) % 4]) {
            draw_line(img, a, b, rgb);
        }
    }
}

fn draw_ego_marker(img: &mut RgbImage) {
    let c = IMAGE_SIZE / 2;
    for du in 0..3u32 {
        for dv in 0..3u32 {
            img.put_pixel(c + du - 1, c + dv - 1, EGO_COLOR);
        }
    }
}

/// Vehicle-frame meters to pixel coordinates: x forward is up, y left is
/// image-left. Returns None outside the window.
fn project(x_m: f64, y_m: f64) -> Option<(u32, u32)> {
    if !x_m.is_finite() || !y_m.is_finite() {
        return None;
    }
    let scale = f64::from(IMAGE_SIZE) / (2.0 * VIEW_RANGE_M);
    let u = f64::from(IMAGE_SIZE) / 2.0 - y_m * scale;
    let v = f64::from(IMAGE_SIZE) / 2.0 - x_m * scale;
    if u < 0.0 || v < 0.0 || u >= f64::from(IMAGE_SIZE) || v >= f64::from(IMAGE_SIZE) {
        return None;
    }
    Some((u as u32, v as u32))
}

fn to_rgb(c: Color) -> Rgb<u8> {
    Rgb([
        (c.r.clamp(0.0, 1.0) * 255.0) as u8,
        (c.g.clamp(0.0, 1.0) * 255.0) as u8,
        (c.b.clamp(0.0, 1.0) * 255.0) as u8,
    ])
}

/// Integer line plot, no antialiasing.
fn draw_line(img: &mut RgbImage, a: (u32, u32), b: (u32, u32), rgb: Rgb<u8>) {
    let (mut x0, mut y0) = (a.0 as i64, a.1 as i64);
    let (x1, y1) = (b.0 as i64, b.1 as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if x0 >= 0 && y0 >= 0 && (x0 as u32) < IMAGE_SIZE && (y0 as u32) < IMAGE_SIZE {
            img.put_pixel(x0 as u32, y0 as u32, rgb);
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_centers_the_ego() {
        assert_eq!(project(0.0, 0.0), Some((IMAGE_SIZE / 2, IMAGE_SIZE / 2)));
    }

    #[test]
    fn project_forward_moves_up() {
        let (_, v) = project(10.0, 0.0).unwrap();
        assert!(v < IMAGE_SIZE / 2);
        let (u, _) = project(0.0, 10.0).unwrap();
        assert!(u < IMAGE_SIZE / 2); // left is image-left
    }

    #[test]
    fn project_rejects_out_of_window() {
        assert_eq!(project(VIEW_RANGE_M + 1.0, 0.0), None);
        assert_eq!(project(f64::NAN, 0.0), None);
    }

    #[test]
    fn draw_line_stays_in_bounds() {
        let mut img = RgbImage::from_pixel(IMAGE_SIZE, IMAGE_SIZE, BACKGROUND);
        draw_line(&mut img, (0, 0), (IMAGE_SIZE - 1, IMAGE_SIZE - 1), Rgb([255, 0, 0]));
        assert_eq!(*img.get_pixel(0, 0), Rgb([255, 0, 0]));
        assert_eq!(
            *img.get_pixel(IMAGE_SIZE - 1, IMAGE_SIZE - 1),
            Rgb([255, 0, 0])
        );
    }

    #[test]
    fn color_conversion_clamps() {
        let rgb = to_rgb(Color {
            r: 2.0,
            g: -1.0,
            b: 0.5,
            a: 1.0,
        });
        assert_eq!(rgb, Rgb([255, 0, 127]));
    }
}
