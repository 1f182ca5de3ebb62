use bvpr::backbone::loading::save_checkpoint;
use bvpr::config::GeoLocalizationConfig;
use bvpr::network::{GeoLocalizationNet, NetInput, NetOutput};
use burn::backend::NdArray;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::Tensor;
use clap::{Parser, arg};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON network config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    backbone: Option<String>,

    #[arg(long)]
    pretrain: Option<String>,

    #[arg(long)]
    aggregation: Option<String>,

    #[arg(long)]
    fc_output_dim: Option<usize>,

    #[arg(long)]
    use_mlp: bool,

    /// Root of the pretrained weight cache.
    #[arg(long)]
    weights_root: Option<String>,

    /// Write the effective config as JSON.
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Write the assembled network as a named-MessagePack record.
    #[arg(long)]
    save_weights: Option<PathBuf>,
}

impl Args {
    fn network_config(&self) -> anyhow::Result<GeoLocalizationConfig> {
        let mut config = match &self.config {
            Some(path) => GeoLocalizationConfig::load(path)
                .map_err(|err| anyhow::anyhow!("{}: {err}", path.display()))?,
            None => GeoLocalizationConfig::new(),
        };
        if let Some(backbone) = &self.backbone {
            config.backbone = backbone.clone();
        }
        if let Some(pretrain) = &self.pretrain {
            config.pretrain = pretrain.clone();
        }
        if let Some(aggregation) = &self.aggregation {
            config.aggregation = aggregation.clone();
        }
        if self.fc_output_dim.is_some() {
            config.fc_output_dim = self.fc_output_dim;
        }
        if self.use_mlp {
            config.use_mlp = true;
        }
        if let Some(root) = &self.weights_root {
            config.weights_root = root.clone();
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    type B = NdArray<f32>;
    let device = Default::default();

    let config = args.network_config()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    if let Some(path) = &args.save_config {
        config.save(path)?;
    }

    let net: GeoLocalizationNet<B> = GeoLocalizationNet::from_config(&config, &device)?;

    println!("{}", net.trainability());
    println!(
        "aggregation: {}, embedding dim: {}, params: {}",
        net.aggregation_kind(),
        net.embedding_dim(),
        net.num_params()
    );

    let [height, width] = config.resize;
    let images = Tensor::ones([1, 3, height, width], &device);
    if let NetOutput::Embeddings(embedding) = net.forward(NetInput::Images(images))? {
        tracing::info!(shape = ?embedding.dims(), "embedded a blank image");
    }

    if let Some(path) = &args.save_weights {
        save_checkpoint(net, path)?;
    }

    Ok(())
}
