//! # Checkpoint Loading
//!
//! ``.pth`` / ``.pt`` / ``.bin`` files are read as PyTorch state
//! dictionaries through `burn-import`, with per-family key remaps;
//! ``.mpk`` files are burn named-MessagePack records.
//!
//! Loading is all-or-nothing: any recorder failure, or any change in the
//! parameter layout of the loaded module, is an [`Error::WeightLoad`].

use crate::backbone::freeze::ParamUnit;
use crate::errors::{Error, Result, panic_message};
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

/// On-disk checkpoint formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    /// PyTorch pickled state dictionary.
    PyTorch,
    /// burn named-MessagePack record.
    NamedMpk,
}

impl CheckpointFormat {
    /// Select the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("pth" | "pt" | "bin") => Ok(Self::PyTorch),
            Some("mpk") => Ok(Self::NamedMpk),
            _ => Err(Error::weight_load(path, "unrecognized checkpoint extension")),
        }
    }
}

/// Owned key remaps.
pub fn owned_remaps(remaps: &[(&str, &str)]) -> Vec<(String, String)> {
    remaps
        .iter()
        .map(|(p, r)| (p.to_string(), r.to_string()))
        .collect()
}

/// Load the checkpoint at `path` into `model`.
///
/// `remaps` are ``(pattern, replacement)`` regexes applied in order to
/// PyTorch keys; native records ignore them.
///
/// # Errors
///
/// [`Error::WeightLoad`] if the file cannot be read, a tensor is missing
/// or malformed, or the loaded parameter count differs from `model`'s.
pub fn load_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    remaps: &[(String, String)],
    device: &B::Device,
) -> Result<M> {
    let format = CheckpointFormat::from_path(path)?;
    if !path.is_file() {
        return Err(Error::weight_load(path, "no such file"));
    }
    tracing::info!(path = %path.display(), ?format, "loading checkpoint");

    let expected = model.num_params();
    let loaded = catch_unwind(AssertUnwindSafe(|| -> Result<M> {
        let record = match format {
            CheckpointFormat::PyTorch => {
                let args = remaps
                    .iter()
                    .fold(LoadArgs::new(path.to_path_buf()), |args, (p, r)| {
                        args.with_key_remap(p, r)
                    });
                PyTorchFileRecorder::<FullPrecisionSettings>::new().load(args, device)
            }
            CheckpointFormat::NamedMpk => {
                NamedMpkFileRecorder::<FullPrecisionSettings>::new()
                    .load(path.to_path_buf(), device)
            }
        }
        .map_err(|err| Error::weight_load(path, err))?;
        Ok(model.load_record(record))
    }))
    .map_err(|payload| Error::weight_load(path, panic_message(payload)))??;

    let actual = loaded.num_params();
    if actual != expected {
        return Err(Error::weight_load(
            path,
            format!("checkpoint holds {actual} parameters, the architecture {expected}"),
        ));
    }
    Ok(loaded)
}

/// Save `model` as a named-MessagePack record.
///
/// The recorder appends ``.mpk`` to `path`.
pub fn save_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
) -> Result<()> {
    model
        .save_file(path.to_path_buf(), &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
        .map_err(|err| Error::weight_load(path, err))
}

/// Check that loading preserved every unit's parameter count.
pub fn verify_units(
    path: &Path,
    expected: &[ParamUnit],
    actual: &[ParamUnit],
) -> Result<()> {
    if expected.len() != actual.len() {
        return Err(Error::weight_load(
            path,
            format!("expected {} units, found {}", expected.len(), actual.len()),
        ));
    }
    for (e, a) in expected.iter().zip(actual) {
        if e.name != a.name || e.num_params != a.num_params {
            return Err(Error::weight_load(
                path,
                format!(
                    "unit {:?} expected {} parameters, found {:?} with {}",
                    e.name, e.num_params, a.name, a.num_params
                ),
            ));
        }
    }
    Ok(())
}
