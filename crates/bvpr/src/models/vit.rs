//! # Vision Transformer
//!
//! `ViT-B/16` with the HuggingFace module layout, so hub checkpoints load
//! after a handful of key remaps. [`VitWrapper`] adapts the raw hidden states
//! into encoder features.

use crate::backbone::freeze::{ParamUnit, ParamUnits, TrainabilityMap, freeze_if};
use crate::features::{EncoderOutput, Features};
use crate::layers::attention::{SplitSelfAttention, SplitSelfAttentionConfig};
use crate::layers::pos_embed::resample_positional_grid;
use bimm_contracts::assert_shape_contract;
use burn::config::Config;
use burn::module::{Ignored, Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;
use burn::tensor::activation::gelu;

/// Hub checkpoint for `ViT-B/16` at 224px.
pub const VIT_B16_224: &str = "google/vit-base-patch16-224-in21k";

/// Hub checkpoint for `ViT-B/16` at 384px.
pub const VIT_B16_384: &str = "google/vit-base-patch16-384";

/// The hub checkpoint for an input height; only 224 and 384 exist.
pub fn hub_model_name(image_size: usize) -> Option<&'static str> {
    match image_size {
        224 => Some(VIT_B16_224),
        384 => Some(VIT_B16_384),
        _ => None,
    }
}

/// HuggingFace state-dictionary key remaps, applied in order.
pub const PYTORCH_KEY_REMAPS: &[(&str, &str)] = &[
    (r"^vit\.", ""),
    (r"\.attention\.attention\.", ".attention."),
    (r"\.attention\.output\.dense\.", ".attention.output."),
    (r"\.intermediate\.dense\.", ".intermediate."),
    (r"\.output\.dense\.", ".output."),
    (r"\.patch_embeddings\.projection\.", ".patch_embeddings."),
];

/// [`Vit`] Config.
#[derive(Config, Debug)]
pub struct VitConfig {
    /// Input resolution the position embeddings are sized for.
    #[config(default = "224")]
    pub image_size: usize,

    /// Patch size.
    #[config(default = "16")]
    pub patch_size: usize,

    /// Hidden size.
    #[config(default = "768")]
    pub hidden_size: usize,

    /// Number of encoder layers.
    #[config(default = "12")]
    pub num_layers: usize,

    /// Number of attention heads.
    #[config(default = "12")]
    pub num_heads: usize,

    /// Feed-forward width.
    #[config(default = "3072")]
    pub intermediate_size: usize,

    /// Layer norm epsilon.
    #[config(default = "1e-12")]
    pub layer_norm_eps: f64,
}

impl VitConfig {
    /// `ViT-B/16` at `image_size`.
    pub fn base_patch16(image_size: usize) -> Self {
        Self::new().with_image_size(image_size)
    }

    /// Patch grid side.
    pub fn grid_size(&self) -> usize {
        self.image_size / self.patch_size
    }

    fn layer_norm<B: Backend>(
        &self,
        device: &B::Device,
    ) -> LayerNorm<B> {
        LayerNormConfig::new(self.hidden_size)
            .with_epsilon(self.layer_norm_eps)
            .init(device)
    }

    /// Initialize a [`Vit`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Vit<B> {
        let dim = self.hidden_size;
        let grid = self.grid_size();
        let normal = Distribution::Normal(0.0, 0.02);

        Vit {
            embeddings: VitEmbeddings {
                cls_token: Param::from_tensor(Tensor::random([1, 1, dim], normal, device)),
                position_embeddings: Param::from_tensor(Tensor::random(
                    [1, 1 + grid * grid, dim],
                    normal,
                    device,
                )),
                patch_embeddings: Conv2dConfig::new(
                    [3, dim],
                    [self.patch_size, self.patch_size],
                )
                .with_stride([self.patch_size, self.patch_size])
                .init(device),
            },
            encoder: VitEncoder {
                layer: (0..self.num_layers)
                    .map(|_| VitLayer {
                        attention: SplitSelfAttentionConfig::new(dim, self.num_heads).init(device),
                        intermediate: LinearConfig::new(dim, self.intermediate_size).init(device),
                        output: LinearConfig::new(self.intermediate_size, dim).init(device),
                        layernorm_before: self.layer_norm(device),
                        layernorm_after: self.layer_norm(device),
                    })
                    .collect(),
            },
            layernorm: self.layer_norm(device),
        }
    }
}

/// Class token, position embeddings and patch projection.
#[derive(Module, Debug)]
pub struct VitEmbeddings<B: Backend> {
    /// ``[1, 1, dim]``.
    pub cls_token: Param<Tensor<B, 3>>,
    /// ``[1, 1 + grid^2, dim]``.
    pub position_embeddings: Param<Tensor<B, 3>>,
    /// Patch projection.
    pub patch_embeddings: Conv2d<B>,
}

impl<B: Backend> VitEmbeddings<B> {
    /// ``[batch, 3, h, w] -> [batch, 1 + tokens, dim]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 3> {
        let x = self.patch_embeddings.forward(input);
        let [batch, dim, h, w] = x.dims();
        let patches = x.flatten::<3>(2, 3).swap_dims(1, 2);

        let cls = self.cls_token.val().repeat_dim(0, batch);
        let x = Tensor::cat(vec![cls, patches], 1);

        let pos = self.position_embeddings.val();
        let stored = pos.dims()[1] - 1;
        let side = (stored as f64).sqrt().round() as usize;
        let grid = resample_positional_grid(pos.clone().narrow(1, 1, stored), [side, side], [h, w]);
        let pos = Tensor::cat(vec![pos.narrow(1, 0, 1), grid], 1);

        debug_assert_eq!(pos.dims(), [1, 1 + h * w, dim]);
        x + pos
    }
}

/// One pre-norm encoder layer.
#[derive(Module, Debug)]
pub struct VitLayer<B: Backend> {
    /// Self-attention.
    pub attention: SplitSelfAttention<B>,
    /// Feed-forward expansion.
    pub intermediate: Linear<B>,
    /// Feed-forward projection.
    pub output: Linear<B>,
    /// Attention input norm.
    pub layernorm_before: LayerNorm<B>,
    /// Feed-forward input norm.
    pub layernorm_after: LayerNorm<B>,
}

impl<B: Backend> VitLayer<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let x = input.clone() + self.attention.forward(self.layernorm_before.forward(input));
        let y = self.layernorm_after.forward(x.clone());
        let y = self.output.forward(gelu(self.intermediate.forward(y)));
        x + y
    }
}

/// Encoder layer stack.
#[derive(Module, Debug)]
pub struct VitEncoder<B: Backend> {
    /// Layers.
    pub layer: Vec<VitLayer<B>>,
}

/// `ViT` model; hidden states for the class token and every patch.
#[derive(Module, Debug)]
pub struct Vit<B: Backend> {
    /// Embeddings.
    pub embeddings: VitEmbeddings<B>,
    /// Encoder.
    pub encoder: VitEncoder<B>,
    /// Final norm.
    pub layernorm: LayerNorm<B>,
}

impl<B: Backend> Vit<B> {
    /// Hidden size.
    pub fn hidden_size(&self) -> usize {
        self.embeddings.cls_token.dims()[2]
    }

    /// Number of encoder layers.
    pub fn num_layers(&self) -> usize {
        self.encoder.layer.len()
    }

    /// Keep the first `count` encoder layers.
    pub fn truncated(
        mut self,
        count: usize,
    ) -> Self {
        self.encoder.layer.truncate(count);
        self
    }

    /// ``[batch, 3, h, w] -> [batch, 1 + tokens, dim]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 3> {
        assert_shape_contract!(
            ["batch", "rgb", "height", "width"],
            &input,
            &[("rgb", 3)]
        );
        let x = self.embeddings.forward(input);
        let x = self
            .encoder
            .layer
            .iter()
            .fold(x, |x, layer| layer.forward(x));
        self.layernorm.forward(x)
    }
}

impl<B: Backend> ParamUnits for Vit<B> {
    fn param_units(&self) -> Vec<ParamUnit> {
        let mut units = vec![ParamUnit::new("embeddings", self.embeddings.num_params())];
        units.extend(
            self.encoder
                .layer
                .iter()
                .enumerate()
                .map(|(idx, layer)| {
                    ParamUnit::block(format!("encoder.layer.{idx}"), idx, layer.num_params())
                }),
        );
        units.push(ParamUnit::new("layernorm", self.layernorm.num_params()));
        units
    }

    fn apply_trainability(
        self,
        map: &TrainabilityMap,
    ) -> Self {
        Self {
            embeddings: freeze_if(self.embeddings, map.is_frozen("embeddings")),
            encoder: VitEncoder {
                layer: self
                    .encoder
                    .layer
                    .into_iter()
                    .enumerate()
                    .map(|(idx, layer)| {
                        freeze_if(layer, map.is_frozen(&format!("encoder.layer.{idx}")))
                    })
                    .collect(),
            },
            layernorm: freeze_if(self.layernorm, map.is_frozen("layernorm")),
        }
    }
}

/// Which hidden states [`VitWrapper`] hands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSelection {
    /// The class token, as a ``[batch, dim]`` vector.
    ClassToken,
    /// The patch tokens, as a ``[batch, tokens, dim]`` sequence.
    PatchTokens,
}

/// Adapts `ViT` hidden states into encoder features.
#[derive(Module, Debug)]
pub struct VitWrapper<B: Backend> {
    /// The transformer.
    pub vit: Vit<B>,
    /// Fixed at construction.
    pub selection: Ignored<TokenSelection>,
}

impl<B: Backend> VitWrapper<B> {
    /// Wrap `vit`.
    pub fn new(
        vit: Vit<B>,
        selection: TokenSelection,
    ) -> Self {
        Self {
            vit,
            selection: Ignored(selection),
        }
    }

    /// Forward Pass.
    ///
    /// The class token is always reported as the global descriptor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> EncoderOutput<B> {
        let hidden = self.vit.forward(input);
        let [batch, tokens, dim] = hidden.dims();

        let cls = hidden.clone().narrow(1, 0, 1).reshape([batch, dim]);
        let features = match *self.selection {
            TokenSelection::ClassToken => Features::Vector(cls.clone()),
            TokenSelection::PatchTokens => Features::Tokens(hidden.narrow(1, 1, tokens - 1)),
        };
        EncoderOutput {
            global: Some(cls),
            features,
        }
    }
}

impl<B: Backend> ParamUnits for VitWrapper<B> {
    fn param_units(&self) -> Vec<ParamUnit> {
        self.vit.param_units()
    }

    fn apply_trainability(
        self,
        map: &TrainabilityMap,
    ) -> Self {
        Self {
            vit: self.vit.apply_trainability(map),
            selection: self.selection,
        }
    }
}
