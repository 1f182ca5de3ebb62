#![warn(missing_docs)]
//!# bvpr - Burn Visual Place Recognition
//!
//! Configurable feature-extraction networks for place and landmark
//! recognition: an encoder, an aggregation reducing its output to a
//! fixed-length embedding, optional normalization and projection, and an
//! optional pairwise comparer.
//!
//! ## Notable Components
//!
//! * [`config`] - the declarative [`config::GeoLocalizationConfig`].
//! * [`network`] - [`network::GeoLocalizationNet`] assembly and forward modes.
//! * [`backbone`] - encoder assembly.
//!   * [`backbone::freeze`] - per-unit freeze policies.
//!   * [`backbone::probe`] - output dimension inference.
//!   * [`backbone::loading`] - checkpoint loading.
//! * [`aggregation`] - `GeM`, `SPoC`, `MAC`, `R-MAC`, `NetVLAD`, `CRN`, `RRM`.
//! * [`comparer`] - pairwise similarity head.
//! * [`models`] - encoder families.
//!   * [`models::resnet`] - `ResNet`
//!   * [`models::plain`] - `VGG-16` / `AlexNet` feature stacks.
//!   * [`models::cct`] - compact convolutional transformer.
//!   * [`models::vit`] - vision transformer.
//!   * [`models::endofm`] - `EndoFM` video transformer.
//! * [`layers`] - reusable neural network modules.
//! * [`cache`] - pretrained weight caches.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod testing;

pub mod errors;

pub mod config;
pub mod features;

pub mod layers;

pub mod cache;
pub mod models;

pub mod aggregation;
pub mod backbone;
pub mod comparer;
pub mod network;
