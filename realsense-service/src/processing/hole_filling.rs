use serde::Deserialize;

use super::DepthFilter;
use crate::frames::DepthImage;

/// Which valid sample replaces a hole.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HoleFillingMode {
    /// The closest valid sample to the left on the same row.
    FillFromLeft,
    /// The furthest of the four direct neighbours.
    FarestFromAround,
    /// The nearest of the four direct neighbours.
    NearestFromAround,
}

#[derive(Clone, Copy, Debug)]
pub struct HoleFillingFilter {
    pub mode: HoleFillingMode,
}

impl HoleFillingFilter {
    pub fn new(mode: HoleFillingMode) -> Self {
        Self { mode }
    }

    fn fill_from_left(mut depth: DepthImage) -> DepthImage {
        for y in 0..depth.height() {
            let mut last = 0;
            for x in 0..depth.width() {
                let sample = &mut depth.pixels.get_pixel_mut(x, y).0[0];
                if *sample == 0 {
                    *sample = last;
                } else {
                    last = *sample;
                }
            }
        }
        depth
    }

    fn fill_from_around(depth: DepthImage, nearest: bool) -> DepthImage {
        let mut out = depth.clone();
        let (width, height) = (depth.width(), depth.height());

        for (x, y, pixel) in out.pixels.enumerate_pixels_mut() {
            if pixel.0[0] != 0 {
                continue;
            }
            let neighbours = [
                (x.checked_sub(1), Some(y)),
                (Some(x + 1).filter(|x| *x < width), Some(y)),
                (Some(x), y.checked_sub(1)),
                (Some(x), Some(y + 1).filter(|y| *y < height)),
            ];
            let valid = neighbours
                .into_iter()
                .filter_map(|(nx, ny)| Some(depth.raw(nx?, ny?)))
                .filter(|sample| *sample != 0);

            let chosen = if nearest { valid.min() } else { valid.max() };
            if let Some(sample) = chosen {
                pixel.0[0] = sample;
            }
        }
        out
    }
}

impl DepthFilter for HoleFillingFilter {
    fn name(&self) -> &'static str {
        "hole_filling"
    }

    fn process(&self, depth: DepthImage) -> DepthImage {
        match self.mode {
            HoleFillingMode::FillFromLeft => Self::fill_from_left(depth),
            HoleFillingMode::FarestFromAround => Self::fill_from_around(depth, false),
            HoleFillingMode::NearestFromAround => Self::fill_from_around(depth, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Luma};

    use super::{HoleFillingFilter, HoleFillingMode};
    use crate::{
        frames::{DepthImage, Intrinsics},
        processing::DepthFilter,
    };

    #[rustfmt::skip]
    const SAMPLES: [u16; 9] = [
        0,   800, 0,
        500, 0,   900,
        0,   700, 0,
    ];

    fn fill(mode: HoleFillingMode) -> Vec<u16> {
        let pixels = ImageBuffer::<Luma<u16>, _>::from_raw(3, 3, SAMPLES.to_vec()).unwrap();
        let depth = DepthImage::new(pixels, 0.001, Intrinsics::centered(3, 3, 1.0));
        HoleFillingFilter::new(mode).process(depth).pixels.into_raw()
    }

    #[test]
    fn from_left() {
        assert_eq!(
            fill(HoleFillingMode::FillFromLeft),
            [0, 800, 800, 500, 500, 900, 0, 700, 700]
        );
    }

    #[test]
    fn nearest_from_around() {
        assert_eq!(
            fill(HoleFillingMode::NearestFromAround),
            [500, 800, 800, 500, 500, 900, 500, 700, 700]
        );
    }

    #[test]
    fn farest_from_around() {
        assert_eq!(
            fill(HoleFillingMode::FarestFromAround),
            [800, 800, 900, 500, 900, 900, 700, 700, 900]
        );
    }
}
