//! # Output Dimension Probing
//!
//! Conv encoders do not declare their output width; it is read off a
//! single synthetic forward pass.

use crate::backbone::Backbone;
use crate::errors::{Error, Result, panic_message};
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Probe input resolution.
pub const PROBE_RESOLUTION: [usize; 2] = [224, 224];

/// A parameter-identical copy of `module` with independent state.
///
/// Round-tripping through the record re-creates running statistics, so a
/// forward pass on the twin never touches the original.
pub fn isolated_twin<B: Backend, M: Module<B>>(module: &M) -> M {
    module.clone().load_record(module.clone().into_record())
}

/// Infer the channel dimension of `backbone`'s features.
///
/// Runs one all-ones ``[1, 3, 224, 224]`` image through an isolated twin
/// and reads ``C`` of a map, or ``D`` of tokens and vectors.
///
/// # Errors
///
/// [`Error::ShapeInference`] if the forward pass panics.
pub fn infer_output_channels<B: Backend>(
    backbone: &Backbone<B>,
    device: &B::Device,
) -> Result<usize> {
    let twin = isolated_twin(backbone);
    let [h, w] = PROBE_RESOLUTION;
    let input: Tensor<B, 4> = Tensor::ones([1, 3, h, w], device);

    let channels = catch_unwind(AssertUnwindSafe(|| twin.forward(input).features.channels()))
        .map_err(|payload| Error::ShapeInference(panic_message(payload)))?;

    tracing::debug!(channels, "probed encoder output");
    Ok(channels)
}
