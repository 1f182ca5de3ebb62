//! Test helpers.

use burn::prelude::{Backend, Tensor};

/// Assert two tensors have the same shape and element-wise agree within `tolerance`.
pub fn assert_tensors_close<B: Backend, const D: usize>(
    actual: Tensor<B, D>,
    expected: Tensor<B, D>,
    tolerance: f32,
) {
    assert_eq!(actual.dims(), expected.dims());
    let actual = actual.to_data().to_vec::<f32>().unwrap();
    let expected = expected.to_data().to_vec::<f32>().unwrap();
    for (idx, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "element {idx}: {a} != {e} (tolerance {tolerance})"
        );
    }
}

/// Assert two tensors differ somewhere by more than `tolerance`.
pub fn assert_tensors_differ<B: Backend, const D: usize>(
    a: Tensor<B, D>,
    b: Tensor<B, D>,
    tolerance: f32,
) {
    let a = a.to_data().to_vec::<f32>().unwrap();
    let b = b.to_data().to_vec::<f32>().unwrap();
    assert!(
        a.iter().zip(b.iter()).any(|(x, y)| (x - y).abs() > tolerance),
        "tensors are equal within {tolerance}"
    );
}

/// Row-wise L2 norms of a ``[batch, dim]`` tensor.
pub fn row_norms<B: Backend>(x: Tensor<B, 2>) -> Vec<f32> {
    x.powf_scalar(2.0)
        .sum_dim(1)
        .sqrt()
        .to_data()
        .to_vec::<f32>()
        .unwrap()
}
