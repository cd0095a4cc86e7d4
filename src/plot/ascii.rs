//! ASCII/Unicode plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - measured amplitude: `o`
//! - fitted amplitude: `-` line
//! - optional resonance marker: `:` column at `f_res`

/// Render measured amplitude against the fitted curve.
pub fn render_ascii_plot(
    freq: &[f64],
    amp: &[f64],
    freq_fit: &[f64],
    amp_fit: &[f64],
    width: usize,
    height: usize,
    f_res: Option<f64>,
) -> String {
    let points = finite_pairs(freq, amp);
    let curve = finite_pairs(freq_fit, amp_fit);
    render_plot(&points, &curve, width, height, f_res)
}

fn finite_pairs(x: &[f64], y: &[f64]) -> Vec<(f64, f64)> {
    x.iter()
        .zip(y.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .collect()
}

fn render_plot(
    points: &[(f64, f64)],
    curve: &[(f64, f64)],
    width: usize,
    height: usize,
    f_res: Option<f64>,
) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let (f_min, f_max) = range(points.iter().chain(curve.iter()).map(|p| p.0)).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = range(points.iter().chain(curve.iter()).map(|p| p.1)).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    if let Some(f) = f_res.filter(|f| (f_min..=f_max).contains(f)) {
        let x = map_x(f, f_min, f_max, width);
        for row in grid.iter_mut() {
            row[x] = ':';
        }
    }

    // Curve before points so points overlay it.
    draw_curve(&mut grid, curve, f_min, f_max, y_min, y_max);

    for &(f, y) in points {
        let x = map_x(f, f_min, f_max, width);
        let y = map_y(y, y_min, y_max, height);
        grid[y][x] = 'o';
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Plot: f=[{f_min:.6e}, {f_max:.6e}] Hz | amp=[{y_min:.4}, {y_max:.4}]\n"
    ));

    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }

    out
}

fn range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if min.is_finite() && max.is_finite() && max > min {
        Some((min, max))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(t: f64, t_min: f64, t_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((t - t_min) / (t_max - t_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], f_min: f64, f_max: f64, y_min: f64, y_max: f64) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(f, y) in curve {
        let x = map_x(f, f_min, f_max, width);
        let yy = map_y(y, y_min, y_max, height);
        if let Some((x0, y0)) = prev {
            draw_line(grid, x0, y0, x, yy, '-');
        } else {
            grid[yy][x] = '-';
        }
        prev = Some((x, yy));
    }
}

/// Integer line drawing (Bresenham-ish). Only blank or marker cells are drawn over.
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0 && (y0 as usize) < grid.len() && x0 >= 0 && (x0 as usize) < grid[0].len() {
            let cell = &mut grid[y0 as usize][x0 as usize];
            if *cell == ' ' || *cell == ':' {
                *cell = ch;
            }
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
    fn plot_golden_snapshot_small() {
        let txt = render_ascii_plot(&[0.0, 10.0], &[1.0, 2.0], &[0.0, 10.0], &[1.0, 1.0], 10, 5, None);
        let expected = concat!(
            "Plot: f=[0.000000e0, 1.000000e1] Hz | amp=[0.9500, 2.0500]\n",
            "         o\n",
            "          \n",
            "          \n",
            "          \n",
            "o---------\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn resonance_marker_and_nan_curve() {
        let nan = [f64::NAN; 2];
        let txt = render_ascii_plot(&[0.0, 10.0], &[1.0, 2.0], &nan, &nan, 11, 5, Some(5.0));
        let rows: Vec<&str> = txt.lines().skip(1).collect();
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.chars().nth(5) == Some(':')));
        assert!(!txt.contains('-'));
    }
}
