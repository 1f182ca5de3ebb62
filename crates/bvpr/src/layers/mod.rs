//! Common low-level modules shared by the encoder families and aggregations.
pub mod attention;
pub mod blocks;
pub mod flatten;
pub mod norm;
pub mod pos_embed;
