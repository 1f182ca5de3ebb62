//! # Multi-Head Self-Attention
//!
//! Two parameter layouts of the same operation:
//!
//! * [`FusedSelfAttention`] - one ``qkv`` projection (CCT, timm-style blocks).
//! * [`SplitSelfAttention`] - separate ``query`` / ``key`` / ``value``
//!   projections (HuggingFace `ViT`).
//!
//! The field names match the published checkpoints so that state
//! dictionaries load with little or no key remapping.

use bimm_contracts::unpack_shape_contract;
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::softmax;

/// Scaled dot-product attention over ``[batch, tokens, dim]`` projections.
pub fn multi_head_attention<B: Backend>(
    q: Tensor<B, 3>,
    k: Tensor<B, 3>,
    v: Tensor<B, 3>,
    num_heads: usize,
) -> Tensor<B, 3> {
    let [batch, tokens, dim] = unpack_shape_contract!(
        ["batch", "tokens", "dim" = "heads" * "head_dim"],
        &q,
        &["batch", "tokens", "dim"],
        &[("heads", num_heads)]
    );
    let head_dim = dim / num_heads;
    let split = |x: Tensor<B, 3>| {
        x.reshape([batch, tokens, num_heads, head_dim])
            .swap_dims(1, 2)
    };

    let (q, k, v) = (split(q), split(k), split(v));
    let scale = (head_dim as f64).powf(-0.5);

    let attn = q.matmul(k.swap_dims(2, 3)).mul_scalar(scale);
    let attn = softmax(attn, 3);

    attn.matmul(v)
        .swap_dims(1, 2)
        .reshape([batch, tokens, dim])
}

/// [`FusedSelfAttention`] Config.
#[derive(Config, Debug)]
pub struct FusedSelfAttentionConfig {
    /// Embedding dimension.
    pub dim: usize,

    /// Number of heads.
    pub num_heads: usize,

    /// Bias on the ``qkv`` projection.
    #[config(default = "true")]
    pub qkv_bias: bool,
}

impl FusedSelfAttentionConfig {
    /// Initialize a [`FusedSelfAttention`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> FusedSelfAttention<B> {
        assert_eq!(
            self.dim % self.num_heads,
            0,
            "dim {} is not divisible by num_heads {}",
            self.dim,
            self.num_heads
        );
        FusedSelfAttention {
            qkv: LinearConfig::new(self.dim, 3 * self.dim)
                .with_bias(self.qkv_bias)
                .init(device),
            proj: LinearConfig::new(self.dim, self.dim).init(device),
            num_heads: self.num_heads,
        }
    }
}

/// Self-attention with a fused ``qkv`` projection.
#[derive(Module, Debug)]
pub struct FusedSelfAttention<B: Backend> {
    /// Fused query/key/value projection, ``dim -> 3 * dim``.
    pub qkv: Linear<B>,
    /// Output projection.
    pub proj: Linear<B>,
    /// Number of heads.
    pub num_heads: usize,
}

impl<B: Backend> FusedSelfAttention<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let dim = input.dims()[2];
        let qkv = self.qkv.forward(input);
        let q = qkv.clone().narrow(2, 0, dim);
        let k = qkv.clone().narrow(2, dim, dim);
        let v = qkv.narrow(2, 2 * dim, dim);

        let x = multi_head_attention(q, k, v, self.num_heads);
        self.proj.forward(x)
    }
}

/// [`SplitSelfAttention`] Config.
#[derive(Config, Debug)]
pub struct SplitSelfAttentionConfig {
    /// Embedding dimension.
    pub dim: usize,

    /// Number of heads.
    pub num_heads: usize,
}

impl SplitSelfAttentionConfig {
    /// Initialize a [`SplitSelfAttention`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SplitSelfAttention<B> {
        assert_eq!(
            self.dim % self.num_heads,
            0,
            "dim {} is not divisible by num_heads {}",
            self.dim,
            self.num_heads
        );
        let linear = || LinearConfig::new(self.dim, self.dim).init(device);
        SplitSelfAttention {
            query: linear(),
            key: linear(),
            value: linear(),
            output: linear(),
            num_heads: self.num_heads,
        }
    }
}

/// Self-attention with separate query, key, and value projections.
#[derive(Module, Debug)]
pub struct SplitSelfAttention<B: Backend> {
    /// Query projection.
    pub query: Linear<B>,
    /// Key projection.
    pub key: Linear<B>,
    /// Value projection.
    pub value: Linear<B>,
    /// Output projection.
    pub output: Linear<B>,
    /// Number of heads.
    pub num_heads: usize,
}

impl<B: Backend> SplitSelfAttention<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let q = self.query.forward(input.clone());
        let k = self.key.forward(input.clone());
        let v = self.value.forward(input);

        let x = multi_head_attention(q, k, v, self.num_heads);
        self.output.forward(x)
    }
}
