//! Built-in off-screen mesh renderer.
//!
//! Reads an STL mesh (binary or ASCII) and draws a flat-shaded isometric
//! view into a PNG: camera on the `(1, 1, 1)` diagonal looking at the
//! model's center, Z up, light at the camera, tan model on a white
//! background, fitted to 90% of the frame.

use std::path::Path;

use image::{Rgb, RgbImage};

use crate::error::ConversionError;

const BACKGROUND: [u8; 3] = [255, 255, 255];
const MODEL_COLOR: [f32; 3] = [210.0, 180.0, 140.0];
const AMBIENT: f32 = 0.3;
const FILL: f32 = 0.9;

type Vec3 = [f32; 3];

/// Triangle soup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub triangles: Vec<[Vec3; 3]>,
}

pub fn read_stl(path: &Path) -> Result<Mesh, ConversionError> {
    let bytes = std::fs::read(path)?;
    parse_stl(&bytes)
}

pub fn parse_stl(bytes: &[u8]) -> Result<Mesh, ConversionError> {
    if is_binary_stl(bytes) {
        parse_binary_stl(bytes)
    } else if starts_with_solid(bytes) {
        parse_ascii_stl(bytes)
    } else {
        Err(ConversionError::Mesh("not an STL file".to_string()))
    }
}

/// Binary STL: 80-byte header, u32 triangle count, 50 bytes per triangle.
/// Some exporters write binary files whose header starts with `solid`, so
/// the size check decides.
fn is_binary_stl(bytes: &[u8]) -> bool {
    if bytes.len() < 84 {
        return false;
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    count
        .checked_mul(50)
        .and_then(|n| n.checked_add(84))
        .is_some_and(|expected| expected == bytes.len())
}

fn starts_with_solid(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes[start..].starts_with(b"solid")
}

fn parse_binary_stl(bytes: &[u8]) -> Result<Mesh, ConversionError> {
    let read_f32 = |at: usize| {
        f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    };
    let triangles = bytes[84..]
        .chunks_exact(50)
        .enumerate()
        .map(|(i, _)| {
            // Skip the 12-byte normal; vertices follow.
            let base = 84 + i * 50 + 12;
            let vertex = |k: usize| {
                let at = base + k * 12;
                [read_f32(at), read_f32(at + 4), read_f32(at + 8)]
            };
            [vertex(0), vertex(1), vertex(2)]
        })
        .collect();
    Ok(Mesh { triangles })
}

fn parse_ascii_stl(bytes: &[u8]) -> Result<Mesh, ConversionError> {
    let text = String::from_utf8_lossy(bytes);
    let mut triangles = Vec::new();
    let mut pending: Vec<Vec3> = Vec::with_capacity(3);

    for (lineno, line) in text.lines().enumerate() {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("vertex") => {
                let coords: Vec<f32> = words
                    .map(|w| w.parse::<f32>())
                    .collect::<Result<_, _>>()
                    .map_err(|e| ConversionError::Mesh(format!("line {}: {}", lineno + 1, e)))?;
                if coords.len() != 3 {
                    return Err(ConversionError::Mesh(format!(
                        "line {}: vertex needs 3 coordinates",
                        lineno + 1
                    )));
                }
                pending.push([coords[0], coords[1], coords[2]]);
            }
            Some("endloop") => {
                if pending.len() == 3 {
                    triangles.push([pending[0], pending[1], pending[2]]);
                }
                pending.clear();
            }
            _ => {}
        }
    }
    Ok(Mesh { triangles })
}

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: Vec3, b: Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: Vec3) -> Vec3 {
    let len = dot(v, v).sqrt();
    if len < f32::EPSILON {
        v
    } else {
        [v[0] / len, v[1] / len, v[2] / len]
    }
}

/// Orthonormal isometric view basis: (right, up, toward-viewer).
fn iso_basis() -> (Vec3, Vec3, Vec3) {
    let toward_viewer = normalize([1.0, 1.0, 1.0]);
    let world_up = [0.0, 0.0, 1.0];
    let right = normalize(cross(world_up, toward_viewer));
    let up = cross(toward_viewer, right);
    (right, up, toward_viewer)
}

/// Render `mesh` to an RGB image of `width` × `height`.
pub fn render_isometric(mesh: &Mesh, width: u32, height: u32) -> Result<RgbImage, ConversionError> {
    let triangles: Vec<&[Vec3; 3]> = mesh
        .triangles
        .iter()
        .filter(|t| t.iter().flatten().all(|c| c.is_finite()))
        .collect();
    if triangles.is_empty() {
        return Err(ConversionError::Render("mesh has no triangles".to_string()));
    }

    let (right, up, toward) = iso_basis();
    let project = |p: Vec3| (dot(p, right), dot(p, up), dot(p, toward));

    let (mut min_x, mut max_x) = (f32::MAX, f32::MIN);
    let (mut min_y, mut max_y) = (f32::MAX, f32::MIN);
    for tri in &triangles {
        for &v in tri.iter() {
            let (x, y, _) = project(v);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
    }
    let extent_x = max_x - min_x;
    let extent_y = max_y - min_y;
    if extent_x <= f32::EPSILON && extent_y <= f32::EPSILON {
        return Err(ConversionError::Render("mesh is degenerate".to_string()));
    }

    let (w, h) = (width as f32, height as f32);
    let scale = FILL * (w / extent_x.max(f32::EPSILON)).min(h / extent_y.max(f32::EPSILON));
    let (cx, cy) = ((min_x + max_x) / 2.0, (min_y + max_y) / 2.0);
    let to_screen = |x: f32, y: f32| (w / 2.0 + (x - cx) * scale, h / 2.0 - (y - cy) * scale);

    let mut image = RgbImage::from_pixel(width, height, Rgb(BACKGROUND));
    // Larger depth = closer to the viewer.
    let mut depth = vec![f32::MIN; (width as usize) * (height as usize)];

    for tri in triangles {
        let normal = normalize(cross(sub(tri[1], tri[0]), sub(tri[2], tri[0])));
        // Winding in STL exports is unreliable; shade both sides.
        let intensity = AMBIENT + (1.0 - AMBIENT) * dot(normal, toward).abs();
        let color = Rgb(MODEL_COLOR.map(|c| (c * intensity).round().clamp(0.0, 255.0) as u8));

        let pts: Vec<(f32, f32, f32)> = tri
            .iter()
            .map(|&v| {
                let (x, y, z) = project(v);
                let (sx, sy) = to_screen(x, y);
                (sx, sy, z)
            })
            .collect();
        fill_triangle(&mut image, &mut depth, [pts[0], pts[1], pts[2]], color);
    }

    Ok(image)
}

fn edge(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

fn fill_triangle(
    image: &mut RgbImage,
    depth: &mut [f32],
    pts: [(f32, f32, f32); 3],
    color: Rgb<u8>,
) {
    let (width, height) = (image.width() as i64, image.height() as i64);
    let [a, b, c] = pts.map(|(x, y, _)| (x, y));
    let area = edge(a, b, c);
    if area.abs() < 1e-9 {
        return;
    }

    let min_x = (a.0.min(b.0).min(c.0).floor() as i64).max(0);
    let max_x = (a.0.max(b.0).max(c.0).ceil() as i64).min(width - 1);
    let min_y = (a.1.min(b.1).min(c.1).floor() as i64).max(0);
    let max_y = (a.1.max(b.1).max(c.1).ceil() as i64).min(height - 1);

    for py in min_y..=max_y {
        for px in min_x..=max_x {
            let p = (px as f32 + 0.5, py as f32 + 0.5);
            let w0 = edge(b, c, p) / area;
            let w1 = edge(c, a, p) / area;
            let w2 = edge(a, b, p) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let z = w0 * pts[0].2 + w1 * pts[1].2 + w2 * pts[2].2;
            let idx = (py * width + px) as usize;
            if z > depth[idx] {
                depth[idx] = z;
                image.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}

/// Render an STL file to a PNG file.
pub fn render_stl_to_png(
    stl: &Path,
    png: &Path,
    width: u32,
    height: u32,
) -> Result<(), ConversionError> {
    let mesh = read_stl(stl)?;
    let image = render_isometric(&mesh, width, height)?;
    image
        .save_with_format(png, image::ImageFormat::Png)
        .map_err(|e| ConversionError::Render(e.to_string()))
}
