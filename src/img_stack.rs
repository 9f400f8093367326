//! Stacks of 2D probability-density rasters over a shared coordinate grid.
//!
//! Axis 0 is distance modulus, axis 1 is reddening. Each raster is stored as
//! a `faer::Mat` with one column per distance bin, so that walking along the
//! reddening axis stays inside one contiguous column.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use faer::Mat;
use itertools::Itertools;

use crate::error::{LosError, Result};

/// Rectangular coordinate grid shared by every raster of a stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    min: [f64; 2],
    max: [f64; 2],
    n_bins: [usize; 2],
    dx: [f64; 2],
}

impl Rect {
    pub fn new(min: [f64; 2], max: [f64; 2], n_bins: [usize; 2]) -> Result<Self> {
        for axis in 0..2 {
            if n_bins[axis] == 0 {
                return Err(LosError::InvalidRect(format!("axis {} has no bins", axis)));
            }
            if !(min[axis].is_finite() && max[axis].is_finite() && max[axis] > min[axis]) {
                return Err(LosError::InvalidRect(format!(
                    "axis {} spans [{}, {}]",
                    axis, min[axis], max[axis]
                )));
            }
        }
        let dx = [
            (max[0] - min[0]) / n_bins[0] as f64,
            (max[1] - min[1]) / n_bins[1] as f64,
        ];
        Ok(Self {
            min,
            max,
            n_bins,
            dx,
        })
    }

    pub fn min(&self) -> [f64; 2] {
        self.min
    }

    pub fn max(&self) -> [f64; 2] {
        self.max
    }

    pub fn n_bins(&self) -> [usize; 2] {
        self.n_bins
    }

    pub fn dx(&self) -> [f64; 2] {
        self.dx
    }

    /// Build a raster of this shape from `f(distance_bin, reddening_bin)`.
    pub fn raster_from_fn(&self, mut f: impl FnMut(usize, usize) -> f64) -> Mat<f64> {
        Mat::from_fn(self.n_bins[1], self.n_bins[0], |y, x| f(x, y))
    }

    pub fn zero_raster(&self) -> Mat<f64> {
        Mat::zeros(self.n_bins[1], self.n_bins[0])
    }

    fn accepts(&self, image: &Mat<f64>) -> bool {
        image.nrows() == self.n_bins[1] && image.ncols() == self.n_bins[0]
    }
}

fn raster_shape(image: &Mat<f64>) -> [usize; 2] {
    [image.ncols(), image.nrows()]
}

/// A stack of equally shaped density rasters.
#[derive(Debug, Clone)]
pub struct ImgStack {
    rect: Rect,
    images: Vec<Mat<f64>>,
}

impl ImgStack {
    /// A stack of `n_images` zero rasters.
    pub fn new(rect: Rect, n_images: usize) -> Self {
        let images = (0..n_images).map(|_| rect.zero_raster()).collect();
        Self { rect, images }
    }

    pub fn from_images(rect: Rect, images: Vec<Mat<f64>>) -> Result<Self> {
        if let Some((index, image)) = images.iter().find_position(|img| !rect.accepts(img)) {
            return Err(LosError::ImageShape {
                index,
                found: raster_shape(image),
                expected: rect.n_bins,
            });
        }
        Ok(Self { rect, images })
    }

    /// Read a stack from a text file, see [`ImgStack::read_from`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::read_from(BufReader::new(file))
    }

    /// Parse the text representation written by [`ImgStack::write_to`].
    ///
    /// The first record is `rect min0 min1 max0 max1 n0 n1`; each raster
    /// follows as an `image` line and `n0` lines of `n1` densities. Blank
    /// lines and lines starting with `#` are skipped.
    pub fn read_from<R: BufRead>(reader: R) -> Result<Self> {
        let mut rect: Option<Rect> = None;
        let mut images = Vec::new();
        let mut current: Option<(Mat<f64>, usize)> = None;

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = idx + 1;
            let parse_err = |message: String| LosError::Parse {
                line: line_no,
                message,
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let mut fields = trimmed.split_whitespace();
            match fields.next() {
                Some("rect") => {
                    if rect.is_some() {
                        return Err(parse_err("duplicate rect record".into()));
                    }
                    let values: Vec<&str> = fields.collect();
                    if values.len() != 6 {
                        return Err(parse_err(format!(
                            "rect needs 6 values, found {}",
                            values.len()
                        )));
                    }
                    let float = |s: &str| {
                        s.parse::<f64>()
                            .map_err(|e| parse_err(format!("bad number {:?}: {}", s, e)))
                    };
                    let count = |s: &str| {
                        s.parse::<usize>()
                            .map_err(|e| parse_err(format!("bad bin count {:?}: {}", s, e)))
                    };
                    rect = Some(Rect::new(
                        [float(values[0])?, float(values[1])?],
                        [float(values[2])?, float(values[3])?],
                        [count(values[4])?, count(values[5])?],
                    )?);
                }
                Some("image") => {
                    let rect = rect.ok_or_else(|| parse_err("image before rect".into()))?;
                    if let Some((image, rows)) = current.take() {
                        if rows != rect.n_bins[0] {
                            return Err(parse_err(format!(
                                "previous image has {} distance bins, expected {}",
                                rows, rect.n_bins[0]
                            )));
                        }
                        images.push(image);
                    }
                    current = Some((rect.zero_raster(), 0));
                }
                Some(_) => {
                    let rect = rect.ok_or_else(|| parse_err("data before rect".into()))?;
                    let (image, x) = current
                        .as_mut()
                        .ok_or_else(|| parse_err("data before image".into()))?;
                    if *x >= rect.n_bins[0] {
                        return Err(parse_err("too many distance bins".into()));
                    }
                    let values: Vec<f64> = trimmed
                        .split_whitespace()
                        .map(|s| s.parse::<f64>())
                        .collect::<std::result::Result<_, _>>()
                        .map_err(|e| parse_err(format!("bad density: {}", e)))?;
                    if values.len() != rect.n_bins[1] {
                        return Err(parse_err(format!(
                            "{} densities, expected {}",
                            values.len(),
                            rect.n_bins[1]
                        )));
                    }
                    for (y, value) in values.into_iter().enumerate() {
                        image[(y, *x)] = value;
                    }
                    *x += 1;
                }
                None => unreachable!("blank lines are skipped"),
            }
        }

        let rect = rect.ok_or(LosError::Parse {
            line: 0,
            message: "missing rect record".into(),
        })?;
        if let Some((image, rows)) = current {
            if rows != rect.n_bins[0] {
                return Err(LosError::Parse {
                    line: 0,
                    message: format!(
                        "last image has {} distance bins, expected {}",
                        rows, rect.n_bins[0]
                    ),
                });
            }
            images.push(image);
        }
        Ok(Self { rect, images })
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        let r = &self.rect;
        writeln!(
            writer,
            "rect {} {} {} {} {} {}",
            r.min[0], r.min[1], r.max[0], r.max[1], r.n_bins[0], r.n_bins[1]
        )?;
        for image in &self.images {
            writeln!(writer, "image")?;
            for x in 0..r.n_bins[0] {
                writeln!(writer, "{}", image.col_as_slice(x).iter().join(" "))?;
            }
        }
        Ok(())
    }

    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    /// Replace the coordinate grid. The raster shape may only change while
    /// the stack is empty.
    pub fn set_rect(&mut self, rect: Rect) -> Result<()> {
        if !self.images.is_empty() && rect.n_bins != self.rect.n_bins {
            return Err(LosError::ImageShape {
                index: 0,
                found: self.rect.n_bins,
                expected: rect.n_bins,
            });
        }
        self.rect = rect;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn image(&self, index: usize) -> &Mat<f64> {
        &self.images[index]
    }

    pub fn image_mut(&mut self, index: usize) -> &mut Mat<f64> {
        &mut self.images[index]
    }

    pub fn push_image(&mut self, image: Mat<f64>) -> Result<()> {
        if !self.rect.accepts(&image) {
            return Err(LosError::ImageShape {
                index: self.images.len(),
                found: raster_shape(&image),
                expected: self.rect.n_bins,
            });
        }
        self.images.push(image);
        Ok(())
    }

    /// Density of raster `index` at distance bin `x` and reddening bin `y`.
    pub fn density(&self, index: usize, x: usize, y: usize) -> f64 {
        self.images[index].col_as_slice(x)[y]
    }

    /// Keep only the rasters flagged in `keep`; the others are dropped.
    pub fn cull(&mut self, keep: &[bool]) -> Result<()> {
        if keep.len() != self.images.len() {
            return Err(LosError::MaskLength {
                mask: keep.len(),
                images: self.images.len(),
            });
        }
        let images = std::mem::take(&mut self.images);
        self.images = images
            .into_iter()
            .zip(keep)
            .filter_map(|(image, &keep)| keep.then_some(image))
            .collect();
        Ok(())
    }

    /// Drop every raster and allocate `n_images` zero placeholders.
    pub fn resize(&mut self, n_images: usize) {
        self.images = (0..n_images).map(|_| self.rect.zero_raster()).collect();
    }

    pub fn line_integral(&self, profile: &[f64], n_regions: usize) -> Result<Vec<f64>> {
        let mut out = vec![0f64; self.images.len()];
        self.line_integral_into(profile, n_regions, &mut out)?;
        Ok(out)
    }

    /// Integrate every raster along the piecewise-linear path defined by
    /// `profile`, writing one value per raster into `out`.
    ///
    /// Each of the `n_regions` segments covers `n_bins[0] / n_regions`
    /// distance columns. The first column whose interpolation rows fall
    /// outside the grid ends the integral for all rasters.
    pub fn line_integral_into(
        &self,
        profile: &[f64],
        n_regions: usize,
        out: &mut [f64],
    ) -> Result<()> {
        let [n_x, n_y] = self.rect.n_bins;
        if n_regions == 0 || n_x % n_regions != 0 {
            return Err(LosError::RegionMismatch {
                bins: n_x,
                regions: n_regions,
            });
        }
        if profile.len() != n_regions + 1 {
            return Err(LosError::ProfileLength {
                found: profile.len(),
                expected: n_regions + 1,
            });
        }
        if out.len() != self.images.len() {
            return Err(LosError::OutputLength {
                found: out.len(),
                expected: self.images.len(),
            });
        }
        out.fill(0.);

        let samples = n_x / n_regions;
        let y_max = n_y as f64;
        let dy_cell = self.rect.dx[1];
        let mut y = (profile[0] - self.rect.min[1]) / dy_cell;
        let mut x = 0;

        for (start, end) in profile.iter().tuple_windows() {
            let dy = (end - start) / samples as f64 / dy_cell;
            for _ in 0..samples {
                let y_floor = y.floor();
                let y_ceil = y_floor + 1.;
                if y_ceil >= y_max || !(y_floor >= 0.) {
                    return Ok(());
                }
                let (lo, hi) = (y_floor as usize, y_ceil as usize);
                let (w_lo, w_hi) = (y_ceil - y, y - y_floor);
                for (acc, image) in out.iter_mut().zip(self.images.iter()) {
                    let column = image.col_as_slice(x);
                    *acc += w_lo * column[lo] + w_hi * column[hi];
                }
                x += 1;
                y += dy;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ImgStack, Rect};
    use crate::error::LosError;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn grid_4x4() -> ImgStack {
        let rect = Rect::new([0., 0.], [4., 4.], [4, 4]).unwrap();
        let ramp = rect.raster_from_fn(|x, y| 1. + x as f64 + 10. * y as f64);
        let flat = rect.raster_from_fn(|_, _| 1.);
        ImgStack::from_images(rect, vec![ramp, flat]).unwrap()
    }

    #[test]
    fn rect_spacing() {
        let rect = Rect::new([4., 0.], [19., 5.], [120, 500]).unwrap();
        assert_eq!(rect.dx(), [0.125, 0.01]);
        assert!(Rect::new([0., 0.], [1., 1.], [0, 4]).is_err());
        assert!(Rect::new([0., 1.], [1., 1.], [4, 4]).is_err());
    }

    #[test]
    fn integral_inside_grid() {
        let stack = grid_4x4();
        let out = stack.line_integral(&[0., 1., 3.], 2).unwrap();
        // columns: v(0,0) + (v(1,0) + v(1,1)) / 2 + v(2,1) + v(3,2)
        assert_abs_diff_eq!(out[0], 1. + 7. + 13. + 24.);
        assert_abs_diff_eq!(out[1], 4.);
    }

    #[test]
    fn integral_truncated_at_top() {
        let stack = grid_4x4();
        let out = stack.line_integral(&[0.5, 4.5], 1).unwrap();
        // rows 0.5, 1.5, 2.5 are inside; row 3.5 would need row 4
        assert_abs_diff_eq!(out[0], 6. + 17. + 28.);
        assert_abs_diff_eq!(out[1], 3.);
    }

    #[test]
    fn integral_truncated_at_bottom() {
        let stack = grid_4x4();
        let out = stack.line_integral(&[0.5, -3.5], 1).unwrap();
        assert_abs_diff_eq!(out[0], 6.);
        assert_abs_diff_eq!(out[1], 1.);

        let out = stack.line_integral(&[-0.5, 1.], 1).unwrap();
        assert_eq!(out, vec![0., 0.]);
    }

    #[test]
    fn integral_preconditions() {
        let stack = grid_4x4();
        assert!(matches!(
            stack.line_integral(&[0., 1., 2., 3.], 3),
            Err(LosError::RegionMismatch {
                bins: 4,
                regions: 3
            })
        ));
        assert!(matches!(
            stack.line_integral(&[0., 1.], 2),
            Err(LosError::ProfileLength { .. })
        ));
        let mut out = [0.; 3];
        assert!(matches!(
            stack.line_integral_into(&[0., 1.], 1, &mut out),
            Err(LosError::OutputLength {
                found: 3,
                expected: 2
            })
        ));
    }

    #[test]
    fn shapes_are_checked() {
        let rect = Rect::new([0., 0.], [4., 4.], [4, 4]).unwrap();
        let other = Rect::new([0., 0.], [4., 4.], [4, 5]).unwrap();
        let err = ImgStack::from_images(rect, vec![rect.zero_raster(), other.zero_raster()])
            .unwrap_err();
        assert!(matches!(
            err,
            LosError::ImageShape {
                index: 1,
                found: [4, 5],
                expected: [4, 4]
            }
        ));

        let mut stack = ImgStack::new(rect, 1);
        assert!(stack.push_image(other.zero_raster()).is_err());
        assert!(stack.set_rect(other).is_err());
        stack.resize(0);
        stack.set_rect(other).unwrap();
        assert_eq!(stack.rect().n_bins(), [4, 5]);
    }

    #[test]
    fn cull_and_resize() {
        let mut stack = grid_4x4();
        assert!(matches!(
            stack.cull(&[true]),
            Err(LosError::MaskLength { mask: 1, images: 2 })
        ));
        stack.cull(&[false, true]).unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.density(0, 3, 2), 1.);

        stack.resize(3);
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.density(2, 1, 1), 0.);
        stack.image_mut(2)[(1, 1)] = 5.;
        assert_eq!(stack.density(2, 1, 1), 5.);
    }

    #[test]
    fn text_store_round_trip() {
        let stack = grid_4x4();
        let mut buffer = Vec::new();
        stack.write_to(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let read = ImgStack::read_from(Cursor::new(format!("# stack\n\n{}", text))).unwrap();
        assert_eq!(read.rect(), stack.rect());
        assert_eq!(read.len(), 2);
        assert_eq!(read.density(0, 2, 3), 33.);
    }

    #[test]
    fn malformed_store() {
        let err = ImgStack::read_from(Cursor::new("image\n1 2\n")).unwrap_err();
        assert!(matches!(err, LosError::Parse { line: 1, .. }));

        let text = "rect 0 0 1 1 2 2\nimage\n1 2\n";
        let err = ImgStack::read_from(Cursor::new(text)).unwrap_err();
        assert!(matches!(err, LosError::Parse { .. }));

        let text = "rect 0 0 1 1 2 2\nimage\n1 2 3\n";
        let err = ImgStack::read_from(Cursor::new(text)).unwrap_err();
        assert!(matches!(err, LosError::Parse { line: 3, .. }));
    }

    #[test]
    fn missing_store() {
        let err = ImgStack::open("/nonexistent/los/stack.txt").unwrap_err();
        assert!(matches!(err, LosError::Io(_)));
    }
}
