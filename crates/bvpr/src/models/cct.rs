//! # Compact Convolutional Transformer
//!
//! `CCT-14/7x2` at 384px: a two-conv tokenizer, 14 post-norm transformer
//! blocks of width 384, and attention-based sequence pooling.
//!
//! [`Cct`] mirrors the published classifier checkpoint (and is what weights
//! load into); [`CompactTransformer`] is the encoder built from it, without
//! the classification head.

use crate::backbone::freeze::{ParamUnit, ParamUnits, TrainabilityMap, freeze_if};
use crate::features::{EncoderOutput, Features};
use crate::layers::attention::{FusedSelfAttention, FusedSelfAttentionConfig};
use crate::layers::pos_embed::resample_positional_grid;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::{Ignored, Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;
use burn::tensor::activation::{gelu, relu, softmax};

/// PyTorch state-dictionary key remaps; the tokenizer convs are wrapped in
/// ``Sequential(conv, relu, pool)``.
pub const PYTORCH_KEY_REMAPS: &[(&str, &str)] = &[(
    r"^tokenizer\.conv_layers\.([0-9]+)\.0\.",
    "tokenizer.conv_layers.$1.",
)];

/// [`Cct`] Config.
#[derive(Config, Debug)]
pub struct CctConfig {
    /// Embedding dimension.
    #[config(default = "384")]
    pub embed_dim: usize,

    /// Number of transformer blocks.
    #[config(default = "14")]
    pub num_layers: usize,

    /// Number of attention heads.
    #[config(default = "6")]
    pub num_heads: usize,

    /// Feed-forward expansion.
    #[config(default = "3")]
    pub mlp_ratio: usize,

    /// Tokenizer conv kernel size.
    #[config(default = "7")]
    pub kernel_size: usize,

    /// Number of tokenizer convs.
    #[config(default = "2")]
    pub n_conv_layers: usize,

    /// Width of the inner tokenizer convs.
    #[config(default = "64")]
    pub in_planes: usize,

    /// Image size the positional embedding is sized for.
    #[config(default = "384")]
    pub img_size: usize,

    /// Classifier width.
    #[config(default = "1000")]
    pub num_classes: usize,
}

impl CctConfig {
    /// ``cct_14_7x2_384``.
    pub fn cct_14_7x2_384() -> Self {
        Self::new()
    }

    /// Token grid for an input resolution.
    ///
    /// Every tokenizer stage is a stride-2 conv then a stride-2 pool.
    pub fn token_grid(
        &self,
        resolution: [usize; 2],
    ) -> [usize; 2] {
        let halve = |x: usize| (x.saturating_sub(1)) / 2 + 1;
        resolution.map(|mut x| {
            for _ in 0..self.n_conv_layers {
                x = halve(halve(x));
            }
            x
        })
    }

    /// ``[in, out]`` channels of each tokenizer conv.
    pub fn tokenizer_channels(&self) -> Vec<[usize; 2]> {
        (0..self.n_conv_layers)
            .map(|idx| {
                let c_in = if idx == 0 { 3 } else { self.in_planes };
                let c_out = if idx + 1 == self.n_conv_layers {
                    self.embed_dim
                } else {
                    self.in_planes
                };
                [c_in, c_out]
            })
            .collect()
    }

    /// Initialize a [`Cct`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Cct<B> {
        let pad = self.kernel_size / 2;
        let conv_layers = self
            .tokenizer_channels()
            .into_iter()
            .map(|channels| {
                Conv2dConfig::new(channels, [self.kernel_size, self.kernel_size])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(pad, pad))
                    .with_bias(false)
                    .init(device)
            })
            .collect();

        let [h, w] = self.token_grid([self.img_size, self.img_size]);
        let dim = self.embed_dim;

        Cct {
            tokenizer: CctTokenizer { conv_layers },
            classifier: TransformerClassifier {
                attention_pool: LinearConfig::new(dim, 1).init(device),
                positional_emb: Param::from_tensor(Tensor::random(
                    [1, h * w, dim],
                    Distribution::Normal(0.0, 0.2),
                    device,
                )),
                blocks: (0..self.num_layers)
                    .map(|_| self.init_block(device))
                    .collect(),
                norm: LayerNormConfig::new(dim).init(device),
                fc: LinearConfig::new(dim, self.num_classes).init(device),
            },
        }
    }

    fn init_block<B: Backend>(
        &self,
        device: &B::Device,
    ) -> CctBlock<B> {
        let dim = self.embed_dim;
        let hidden = dim * self.mlp_ratio;
        CctBlock {
            pre_norm: LayerNormConfig::new(dim).init(device),
            self_attn: FusedSelfAttentionConfig::new(dim, self.num_heads)
                .with_qkv_bias(false)
                .init(device),
            linear1: LinearConfig::new(dim, hidden).init(device),
            norm1: LayerNormConfig::new(dim).init(device),
            linear2: LinearConfig::new(hidden, dim).init(device),
        }
    }
}

/// Convolutional tokenizer weights.
#[derive(Module, Debug)]
pub struct CctTokenizer<B: Backend> {
    /// Bias-free convs.
    pub conv_layers: Vec<Conv2d<B>>,
}

/// Post-norm transformer block.
#[derive(Module, Debug)]
pub struct CctBlock<B: Backend> {
    /// Attention input norm.
    pub pre_norm: LayerNorm<B>,
    /// Self-attention.
    pub self_attn: FusedSelfAttention<B>,
    /// Feed-forward expansion.
    pub linear1: Linear<B>,
    /// Norm after the attention residual.
    pub norm1: LayerNorm<B>,
    /// Feed-forward projection.
    pub linear2: Linear<B>,
}

impl<B: Backend> CctBlock<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let x = input.clone() + self.self_attn.forward(self.pre_norm.forward(input));
        let x = self.norm1.forward(x);
        let y = self.linear2.forward(gelu(self.linear1.forward(x.clone())));
        x + y
    }
}

/// Sequence classifier weights.
#[derive(Module, Debug)]
pub struct TransformerClassifier<B: Backend> {
    /// Sequence pooling scores.
    pub attention_pool: Linear<B>,
    /// Learnable positional embedding, ``[1, tokens, dim]``.
    pub positional_emb: Param<Tensor<B, 3>>,
    /// Transformer blocks.
    pub blocks: Vec<CctBlock<B>>,
    /// Final norm.
    pub norm: LayerNorm<B>,
    /// Classification head.
    pub fc: Linear<B>,
}

/// Parameters of a `CCT` classifier.
#[derive(Module, Debug)]
pub struct Cct<B: Backend> {
    /// Tokenizer.
    pub tokenizer: CctTokenizer<B>,
    /// Classifier.
    pub classifier: TransformerClassifier<B>,
}

impl<B: Backend> Cct<B> {
    /// Drop the head and build the encoder.
    ///
    /// `pooled` selects sequence-pooled vectors over token sequences as
    /// the encoder features.
    pub fn into_encoder(
        self,
        config: &CctConfig,
        pooled: bool,
    ) -> CompactTransformer<B> {
        CompactTransformer {
            conv_layers: self.tokenizer.conv_layers,
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            positional_emb: self.classifier.positional_emb,
            attention_pool: self.classifier.attention_pool,
            blocks: self.classifier.blocks,
            norm: self.classifier.norm,
            grid: Ignored(config.token_grid([config.img_size, config.img_size])),
            pooled: Ignored(pooled),
        }
    }
}

/// `CCT` encoder.
#[derive(Module, Debug)]
pub struct CompactTransformer<B: Backend> {
    /// Tokenizer convs.
    pub conv_layers: Vec<Conv2d<B>>,
    /// Tokenizer pool.
    pub pool: MaxPool2d,
    /// Learnable positional embedding.
    pub positional_emb: Param<Tensor<B, 3>>,
    /// Sequence pooling scores.
    pub attention_pool: Linear<B>,
    /// Transformer blocks.
    pub blocks: Vec<CctBlock<B>>,
    /// Final norm.
    pub norm: LayerNorm<B>,
    /// Token grid of `positional_emb`.
    pub grid: Ignored<[usize; 2]>,
    /// Emit sequence-pooled vectors as features.
    pub pooled: Ignored<bool>,
}

impl<B: Backend> CompactTransformer<B> {
    /// Embedding dimension.
    pub fn embed_dim(&self) -> usize {
        self.positional_emb.dims()[2]
    }

    /// Number of transformer blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Keep the first `count` blocks.
    pub fn truncated(
        mut self,
        count: usize,
    ) -> Self {
        self.blocks.truncate(count);
        self
    }

    /// Attention-weighted average of the tokens.
    pub fn seq_pool(
        &self,
        tokens: Tensor<B, 3>,
    ) -> Tensor<B, 2> {
        let [batch, _, dim] = tokens.dims();
        let weights = softmax(self.attention_pool.forward(tokens.clone()), 1);
        weights
            .swap_dims(1, 2)
            .matmul(tokens)
            .reshape([batch, dim])
    }

    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> EncoderOutput<B> {
        let [batch] = unpack_shape_contract!(
            ["batch", "rgb", "height", "width"],
            &input,
            &["batch"],
            &[("rgb", 3)]
        );

        let x = self
            .conv_layers
            .iter()
            .fold(input, |x, conv| self.pool.forward(relu(conv.forward(x))));
        let [_, dim, h, w] = x.dims();
        let x = x.flatten::<3>(2, 3).swap_dims(1, 2);

        let pos = resample_positional_grid(self.positional_emb.val(), *self.grid, [h, w]);
        let x = x + pos;

        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let tokens = self.norm.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "tokens", "dim"],
            &tokens,
            &[("batch", batch), ("tokens", h * w), ("dim", dim)]
        );

        let pooled = self.seq_pool(tokens.clone());
        let features = if *self.pooled {
            Features::Vector(pooled.clone())
        } else {
            Features::Tokens(tokens)
        };
        EncoderOutput {
            global: Some(pooled),
            features,
        }
    }
}

impl<B: Backend> ParamUnits for CompactTransformer<B> {
    fn param_units(&self) -> Vec<ParamUnit> {
        let mut units = vec![
            ParamUnit::new("tokenizer", self.conv_layers.num_params()),
            ParamUnit::new("classifier.positional_emb", self.positional_emb.num_params()),
            ParamUnit::new("classifier.attention_pool", self.attention_pool.num_params()),
        ];
        units.extend(self.blocks.iter().enumerate().map(|(idx, block)| {
            ParamUnit::block(format!("classifier.blocks.{idx}"), idx, block.num_params())
        }));
        units.push(ParamUnit::new("classifier.norm", self.norm.num_params()));
        units
    }

    fn apply_trainability(
        self,
        map: &TrainabilityMap,
    ) -> Self {
        Self {
            conv_layers: freeze_if(self.conv_layers, map.is_frozen("tokenizer")),
            positional_emb: freeze_if(
                self.positional_emb,
                map.is_frozen("classifier.positional_emb"),
            ),
            attention_pool: freeze_if(
                self.attention_pool,
                map.is_frozen("classifier.attention_pool"),
            ),
            blocks: self
                .blocks
                .into_iter()
                .enumerate()
                .map(|(idx, block)| {
                    freeze_if(block, map.is_frozen(&format!("classifier.blocks.{idx}")))
                })
                .collect(),
            norm: freeze_if(self.norm, map.is_frozen("classifier.norm")),
            ..self
        }
    }
}
