// src/image_utils.rs - Raster helpers: colors, sampling, smoothing kernels and overlays

use bresenham::Bresenham;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_circle_mut;
use ndarray::{Array2, Array3, Axis};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::errors::{CochleogramError, Result};

/// Convert a display color to RGB in the range 0..1
///
/// Accepts the basic named colors and `#rrggbb` hex strings.
pub fn parse_color(name: &str) -> Result<[f32; 3]> {
    let rgb = match name.trim().to_ascii_lowercase().as_str() {
        "red" => [1.0, 0.0, 0.0],
        "green" => [0.0, 0.5, 0.0],
        "lime" => [0.0, 1.0, 0.0],
        "blue" => [0.0, 0.0, 1.0],
        "white" => [1.0, 1.0, 1.0],
        "black" => [0.0, 0.0, 0.0],
        "cyan" => [0.0, 1.0, 1.0],
        "magenta" => [1.0, 0.0, 1.0],
        "yellow" => [1.0, 1.0, 0.0],
        "gray" | "grey" => [0.5, 0.5, 0.5],
        "orange" => [1.0, 0.647, 0.0],
        hex if hex.starts_with('#') && hex.len() == 7 => {
            let channel = |i: usize| {
                u8::from_str_radix(&hex[i..i + 2], 16)
                    .map(|v| v as f32 / 255.0)
                    .map_err(|_| CochleogramError::UnknownColor(name.to_string()))
            };
            [channel(1)?, channel(3)?, channel(5)?]
        }
        _ => return Err(CochleogramError::UnknownColor(name.to_string())),
    };

    Ok(rgb)
}

/// Bilinear sample of an (x, y) indexed image at fractional indices.
/// Positions outside the image read as zero.
pub fn sample_bilinear(image: &Array2<f32>, i: f64, j: f64) -> f64 {
    let (nx, ny) = image.dim();
    if nx == 0 || ny == 0 || !i.is_finite() || !j.is_finite() {
        return 0.0;
    }
    if i < 0.0 || j < 0.0 || i > (nx - 1) as f64 || j > (ny - 1) as f64 {
        return 0.0;
    }

    let i0 = i.floor() as usize;
    let j0 = j.floor() as usize;
    let i1 = (i0 + 1).min(nx - 1);
    let j1 = (j0 + 1).min(ny - 1);
    let fi = i - i0 as f64;
    let fj = j - j0 as f64;

    let v00 = image[[i0, j0]] as f64;
    let v10 = image[[i1, j0]] as f64;
    let v01 = image[[i0, j1]] as f64;
    let v11 = image[[i1, j1]] as f64;

    v00 * (1.0 - fi) * (1.0 - fj) + v10 * fi * (1.0 - fj) + v01 * (1.0 - fi) * fj + v11 * fi * fj
}

/// Flat spherical template of the given pixel radius in a cube of side
/// `3 * radius`, normalized to sum to one
pub fn sphere_template(pixel_radius: usize) -> Array3<f32> {
    if pixel_radius == 0 {
        return Array3::from_elem((1, 1, 1), 1.0);
    }

    let side = pixel_radius * 3;
    let center = (side - 1) as f64 / 2.0;
    let r2 = (pixel_radius * pixel_radius) as f64;

    let mut template = Array3::<f32>::zeros((side, side, side));
    for ((i, j, k), v) in template.indexed_iter_mut() {
        let d2 = (i as f64 - center).powi(2) + (j as f64 - center).powi(2) + (k as f64 - center).powi(2);
        if d2 <= r2 + 1e-6 {
            *v = 1.0;
        }
    }

    let total = template.sum();
    if total > 0.0 {
        template /= total;
    }
    template
}

/// Collapse a 3-D template to 2-D by averaging along z
pub fn collapse_template(template: &Array3<f32>) -> Array2<f32> {
    template
        .mean_axis(Axis(2))
        .unwrap_or_else(|| Array2::zeros((template.dim().0, template.dim().1)))
}

fn fft2(data: &mut Array2<Complex<f64>>, planner: &mut FftPlanner<f64>, inverse: bool) {
    let (rows, cols) = data.dim();
    let row_fft = if inverse { planner.plan_fft_inverse(cols) } else { planner.plan_fft_forward(cols) };
    let col_fft = if inverse { planner.plan_fft_inverse(rows) } else { planner.plan_fft_forward(rows) };

    let mut buffer = vec![Complex::new(0.0, 0.0); cols.max(rows)];
    for mut row in data.rows_mut() {
        let buf = &mut buffer[..cols];
        for (b, v) in buf.iter_mut().zip(row.iter()) {
            *b = *v;
        }
        row_fft.process(buf);
        for (v, b) in row.iter_mut().zip(buf.iter()) {
            *v = *b;
        }
    }
    for mut col in data.columns_mut() {
        let buf = &mut buffer[..rows];
        for (b, v) in buf.iter_mut().zip(col.iter()) {
            *b = *v;
        }
        col_fft.process(buf);
        for (v, b) in col.iter_mut().zip(buf.iter()) {
            *v = *b;
        }
    }
}

/// 2-D convolution with zero padding, cropped to the size of `image` and
/// centered on the full convolution output
pub fn convolve_same(image: &Array2<f32>, kernel: &Array2<f32>) -> Array2<f32> {
    let (nx, ny) = image.dim();
    let (kx, ky) = kernel.dim();
    if nx == 0 || ny == 0 || kx == 0 || ky == 0 {
        return image.clone();
    }

    let (fx, fy) = (nx + kx - 1, ny + ky - 1);
    let mut a = Array2::from_elem((fx, fy), Complex::new(0.0, 0.0));
    let mut b = Array2::from_elem((fx, fy), Complex::new(0.0, 0.0));
    for ((i, j), v) in image.indexed_iter() {
        a[[i, j]] = Complex::new(*v as f64, 0.0);
    }
    for ((i, j), v) in kernel.indexed_iter() {
        b[[i, j]] = Complex::new(*v as f64, 0.0);
    }

    let mut planner = FftPlanner::new();
    fft2(&mut a, &mut planner, false);
    fft2(&mut b, &mut planner, false);
    a.zip_mut_with(&b, |x, y| *x *= *y);
    fft2(&mut a, &mut planner, true);

    let scale = (fx * fy) as f64;
    let (ox, oy) = ((kx - 1) / 2, (ky - 1) / 2);
    Array2::from_shape_fn((nx, ny), |(i, j)| (a[[i + ox, j + oy]].re / scale) as f32)
}

/// Convert an (x, y, rgb) composite in the range 0..1 to an 8-bit image.
///
/// The x axis runs along image columns and y is flipped so the volume's
/// lower corner sits at the bottom left.
pub fn composite_to_rgb(composite: &Array3<f32>) -> RgbImage {
    let (nx, ny, _) = composite.dim();
    let mut img = RgbImage::new(nx as u32, ny as u32);

    for x in 0..nx {
        for y in 0..ny {
            let px: [u8; 3] = std::array::from_fn(|c| (composite[[x, y, c]].clamp(0.0, 1.0) * 255.0).round() as u8);
            img.put_pixel(x as u32, (ny - 1 - y) as u32, Rgb(px));
        }
    }

    img
}

/// Check if a point is inside the image bounds
#[inline]
pub fn in_bounds(x: i32, y: i32, width: u32, height: u32) -> bool {
    x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height
}

/// Draw a polyline given in (already flipped) pixel coordinates
pub fn draw_polyline(image: &mut RgbImage, points: &[(f64, f64)], color: [u8; 3]) {
    let (width, height) = image.dimensions();

    for w in points.windows(2) {
        let start = (w[0].0.round() as isize, w[0].1.round() as isize);
        let end = (w[1].0.round() as isize, w[1].1.round() as isize);
        for (x, y) in Bresenham::new(start, end) {
            if in_bounds(x as i32, y as i32, width, height) {
                image.put_pixel(x as u32, y as u32, Rgb(color));
            }
        }
    }
}

/// Mark points with hollow circles
pub fn draw_markers(image: &mut RgbImage, points: &[(f64, f64)], radius: i32, color: [u8; 3]) {
    for &(x, y) in points {
        draw_hollow_circle_mut(image, (x.round() as i32, y.round() as i32), radius, Rgb(color));
    }
}
