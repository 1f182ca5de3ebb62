//! # Pretrained Weight Caches
//!
//! * [`disk`] - on-disk cache layout and download policy.
//! * [`weights`] - registered checkpoints and the [`weights::CheckpointSource`] collaborator.
//! * [`hub`] - the [`hub::TransformerHub`] collaborator for named transformer checkpoints.

pub mod disk;
pub mod hub;
pub mod weights;
