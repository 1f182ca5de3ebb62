//! # Fixed Spatial Poolings
//!
//! Parameter-free poolings; each reduces ``[batch, channels, h, w]`` to
//! ``[batch, channels, 1, 1]``.

use crate::layers::norm::l2_normalize;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// Sum-pooled convolutions; average pooling over the full map.
#[derive(Module, Clone, Debug, Default)]
pub struct Spoc;

impl Spoc {
    /// Forward Pass.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        input.mean_dim(2).mean_dim(3)
    }
}

/// Maximum activations of convolutions; global max pooling.
#[derive(Module, Clone, Debug, Default)]
pub struct Mac;

impl Mac {
    /// Forward Pass.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        input.max_dim(2).max_dim(3)
    }
}

/// A square region, ``(top, left, size)``.
pub type Region = (usize, usize, usize);

/// Target overlap between consecutive regions.
const RMAC_OVERLAP: f64 = 0.4;

/// The `R-MAC` region grid of a ``height x width`` map over `levels` scales.
///
/// At level ``l`` regions are squares of side ``floor(2 * min(h, w) / (l + 1))``,
/// laid out uniformly, with one extra region along the longer side chosen to
/// bring the overlap closest to 40%.
pub fn rmac_regions(
    height: usize,
    width: usize,
    levels: usize,
) -> Vec<Region> {
    let side = height.min(width) as f64;
    let long = height.max(width) as f64;

    let extra = (2..=7)
        .map(|steps: usize| {
            let b = (long - side) / (steps - 1) as f64;
            ((side * side - side * b) / (side * side) - RMAC_OVERLAP).abs()
        })
        .enumerate()
        .fold((0, f64::INFINITY), |best, (idx, err)| if err < best.1 { (idx, err) } else { best })
        .0
        + 1;
    let (extra_h, extra_w) = match height.cmp(&width) {
        std::cmp::Ordering::Less => (0, extra),
        std::cmp::Ordering::Greater => (extra, 0),
        std::cmp::Ordering::Equal => (0, 0),
    };

    let starts = |extent: usize, count: usize, wl: usize| -> Vec<usize> {
        let half = (wl as f64 / 2.0 - 1.0).floor();
        let b = if count == 1 {
            0.0
        } else {
            (extent - wl) as f64 / (count - 1) as f64
        };
        (0..count)
            .map(|i| ((half + i as f64 * b).floor() - half).max(0.0) as usize)
            .collect()
    };

    let mut regions = Vec::new();
    for l in 1..=levels {
        let wl = (2.0 * side / (l + 1) as f64).floor() as usize;
        if wl == 0 {
            continue;
        }
        let tops = starts(height, l + extra_h, wl);
        let lefts = starts(width, l + extra_w, wl);
        for &top in &tops {
            for &left in &lefts {
                regions.push((top, left, wl));
            }
        }
    }
    regions
}

/// Regional maximum activations of convolutions.
///
/// The L2-normalized global max, plus the L2-normalized max of every
/// [`rmac_regions`] region.
#[derive(Module, Clone, Debug)]
pub struct Rmac {
    /// Number of region scales.
    pub levels: usize,
}

impl Default for Rmac {
    fn default() -> Self {
        Self { levels: 3 }
    }
}

impl Rmac {
    /// Forward Pass.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [_, _, height, width] = input.dims();
        let pool = |x: Tensor<B, 4>| l2_normalize(Mac.forward(x), 1);

        rmac_regions(height, width, self.levels)
            .into_iter()
            .fold(pool(input.clone()), |acc, (top, left, size)| {
                let region = input.clone().narrow(2, top, size).narrow(3, left, size);
                acc + pool(region)
            })
    }
}
