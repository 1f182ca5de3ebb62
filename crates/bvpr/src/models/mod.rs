//! # Encoder Families
//!
//! Each family has a load target mirroring the published checkpoint layout,
//! and an encoder built from it.

pub mod cct;
pub mod endofm;
pub mod plain;
pub mod resnet;
pub mod vit;
