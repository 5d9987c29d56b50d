//! Directional edge filters: Sobel, Prewitt, Scharr and Farid.
//!
//! Every family is separable into a derivative kernel applied along one
//! axis and a smoothing kernel applied along the other. Responses are
//! positive where intensity *increases* along the derivative axis, the
//! sign a convolution with `[1, 0, -1]` gives. The kernels below are
//! stored flipped so they can be applied by correlation. Samples outside
//! the image are mirrored about its edges.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::stack::reflect_index;
use crate::types::PipelineError;

const SOBEL_SMOOTH: [f64; 3] = [0.25, 0.5, 0.25];
const PREWITT_SMOOTH: [f64; 3] = [1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0];
const SCHARR_SMOOTH: [f64; 3] = [3.0 / 16.0, 10.0 / 16.0, 3.0 / 16.0];
const CENTRAL_DIFFERENCE: [f64; 3] = [-1.0, 0.0, 1.0];

// Farid & Simoncelli (2004) 5-tap pair.
const FARID_SMOOTH: [f64; 5] = [
    0.037_659_317_195_812_6,
    0.249_153_396_177_344,
    0.426_374_573_253_687,
    0.249_153_396_177_344,
    0.037_659_317_195_812_6,
];
const FARID_EDGE: [f64; 5] = [
    -0.109_603_762_960_254,
    -0.276_690_988_455_557,
    0.0,
    0.276_690_988_455_557,
    0.109_603_762_960_254,
];

/// Selects which directional filter family computes image gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeFilterKind {
    /// 3-tap central difference with `[1, 2, 1]` smoothing.
    #[default]
    Sobel,
    /// 3-tap central difference with box smoothing.
    Prewitt,
    /// 3-tap central difference with `[3, 10, 3]` smoothing.
    Scharr,
    /// 5-tap optimized derivative/smoothing pair.
    Farid,
}

impl EdgeFilterKind {
    /// All families, in documentation order.
    pub const ALL: [Self; 4] = [Self::Sobel, Self::Prewitt, Self::Scharr, Self::Farid];

    /// Lowercase family name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sobel => "sobel",
            Self::Prewitt => "prewitt",
            Self::Scharr => "scharr",
            Self::Farid => "farid",
        }
    }

    /// `(smoothing, derivative)` kernels of this family.
    const fn kernels(self) -> (&'static [f64], &'static [f64]) {
        match self {
            Self::Sobel => (&SOBEL_SMOOTH, &CENTRAL_DIFFERENCE),
            Self::Prewitt => (&PREWITT_SMOOTH, &CENTRAL_DIFFERENCE),
            Self::Scharr => (&SCHARR_SMOOTH, &CENTRAL_DIFFERENCE),
            Self::Farid => (&FARID_SMOOTH, &FARID_EDGE),
        }
    }

    /// Response to horizontal edges: derivative along rows (axis 0).
    #[must_use]
    pub fn horizontal(self, image: ArrayView2<'_, f64>) -> Array2<f64> {
        let (smooth, derivative) = self.kernels();
        let rows = correlate_1d(image, derivative, Axis(0));
        correlate_1d(rows.view(), smooth, Axis(1))
    }

    /// Response to vertical edges: derivative along columns (axis 1).
    #[must_use]
    pub fn vertical(self, image: ArrayView2<'_, f64>) -> Array2<f64> {
        let (smooth, derivative) = self.kernels();
        let cols = correlate_1d(image, derivative, Axis(1));
        correlate_1d(cols.view(), smooth, Axis(0))
    }
}

impl fmt::Display for EdgeFilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EdgeFilterKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| PipelineError::UnknownFilter(s.to_string()))
    }
}

/// Correlate every lane of `image` along `axis` with a centred kernel.
#[allow(clippy::cast_possible_wrap)]
fn correlate_1d(image: ArrayView2<'_, f64>, kernel: &[f64], axis: Axis) -> Array2<f64> {
    let len = image.len_of(axis);
    let mut out = Array2::<f64>::zeros(image.raw_dim());
    if len == 0 {
        return out;
    }
    let origin = (kernel.len() / 2) as isize;
    for (lane_in, mut lane_out) in image.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        for (i, out_value) in lane_out.iter_mut().enumerate() {
            *out_value = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * lane_in[reflect_index(i as isize + k as isize - origin, len)])
                .sum();
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// 6×6 image with a dark top half and a bright bottom half.
    fn horizontal_step() -> Array2<f64> {
        Array2::from_shape_fn((6, 6), |(r, _)| if r < 3 { 0.0 } else { 1.0 })
    }

    #[test]
    fn parse_known_names() {
        for kind in EdgeFilterKind::ALL {
            assert_eq!(kind.name().parse::<EdgeFilterKind>().unwrap(), kind);
        }
    }

    #[test]
    fn parse_unknown_name_fails() {
        let err = "laplace".parse::<EdgeFilterKind>().unwrap_err();
        assert_eq!(err, PipelineError::UnknownFilter("laplace".to_string()));
    }

    #[test]
    fn default_is_sobel() {
        assert_eq!(EdgeFilterKind::default(), EdgeFilterKind::Sobel);
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&EdgeFilterKind::Scharr).unwrap();
        assert_eq!(json, "\"scharr\"");
    }

    #[test]
    fn sobel_horizontal_responds_to_rising_step() {
        let response = EdgeFilterKind::Sobel.horizontal(horizontal_step().view());
        // in[r+1] - in[r-1] is 1 on both rows adjacent to the step.
        for c in 0..6 {
            assert!((response[[2, c]] - 1.0).abs() < 1e-12);
            assert!((response[[3, c]] - 1.0).abs() < 1e-12);
            assert!(response[[0, c]].abs() < 1e-12);
            assert!(response[[5, c]].abs() < 1e-12);
        }
    }

    #[test]
    fn vertical_ignores_horizontal_step() {
        for kind in EdgeFilterKind::ALL {
            let response = kind.vertical(horizontal_step().view());
            assert!(response.iter().all(|v| v.abs() < 1e-12), "{kind}");
        }
    }

    #[test]
    fn all_families_agree_in_sign() {
        let image = horizontal_step();
        for kind in EdgeFilterKind::ALL {
            let response = kind.horizontal(image.view());
            assert!(response[[2, 3]] > 0.0, "{kind}: {}", response[[2, 3]]);
        }
    }

    #[test]
    fn sobel_is_one_on_first_bright_row_and_column() {
        let rows = Array2::from_shape_fn((11, 11), |(r, _)| if r >= 5 { 1.0 } else { 0.0 });
        let cols = rows.t().to_owned();
        let horizontal = EdgeFilterKind::Sobel.horizontal(rows.view());
        let vertical = EdgeFilterKind::Sobel.vertical(cols.view());
        assert!((horizontal[[5, 5]] - 1.0).abs() < 1e-12, "{}", horizontal[[5, 5]]);
        assert!((vertical[[5, 5]] - 1.0).abs() < 1e-12, "{}", vertical[[5, 5]]);
    }

    #[test]
    fn falling_step_gives_negative_response() {
        let image = horizontal_step().slice(ndarray::s![..;-1, ..]).to_owned();
        for kind in EdgeFilterKind::ALL {
            let response = kind.horizontal(image.view());
            assert!(response[[2, 3]] < 0.0, "{kind}: {}", response[[2, 3]]);
        }
    }

    #[test]
    fn smoothing_kernels_sum_to_one() {
        for kind in EdgeFilterKind::ALL {
            let (smooth, derivative) = kind.kernels();
            assert!((smooth.iter().sum::<f64>() - 1.0).abs() < 1e-9, "{kind}");
            assert!(derivative.iter().sum::<f64>().abs() < 1e-12, "{kind}");
        }
    }

    #[test]
    fn constant_image_has_no_gradient() {
        let image = Array2::from_elem((4, 5), 3.0);
        for kind in EdgeFilterKind::ALL {
            assert!(kind.horizontal(image.view()).iter().all(|v| v.abs() < 1e-12));
            assert!(kind.vertical(image.view()).iter().all(|v| v.abs() < 1e-12));
        }
    }
}
