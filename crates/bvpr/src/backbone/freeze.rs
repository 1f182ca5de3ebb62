//! # Parameter Freeze Policies
//!
//! Encoders expose their named structural units through [`ParamUnits`];
//! a [`FreezePolicy`] resolves those units into an explicit
//! [`TrainabilityMap`], which is then applied to the encoder.
//!
//! "Freeze everything, then re-enable some blocks" is computed directly as
//! the final mask, never as two mutation passes.

use crate::errors::{Error, Result};
use burn::module::Module;
use burn::prelude::Backend;
use std::fmt;

/// A named structural unit of an encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamUnit {
    /// Unit name, e.g. ``layer3`` or ``encoder.layer.7``.
    pub name: String,

    /// Index of the unit in the encoder's block stack, if it is a block.
    pub block: Option<usize>,

    /// Number of parameters owned by the unit.
    pub num_params: usize,
}

impl ParamUnit {
    /// A non-block unit.
    pub fn new<S: Into<String>>(
        name: S,
        num_params: usize,
    ) -> Self {
        Self {
            name: name.into(),
            block: None,
            num_params,
        }
    }

    /// A block unit.
    pub fn block<S: Into<String>>(
        name: S,
        index: usize,
        num_params: usize,
    ) -> Self {
        Self {
            name: name.into(),
            block: Some(index),
            num_params,
        }
    }
}

/// Access to an encoder's named units.
pub trait ParamUnits: Sized {
    /// The units, in forward order.
    fn param_units(&self) -> Vec<ParamUnit>;

    /// Stop gradient tracking on every unit `map` marks as frozen.
    fn apply_trainability(
        self,
        map: &TrainabilityMap,
    ) -> Self;
}

/// Stop gradient tracking on `module` when `frozen`.
pub fn freeze_if<B: Backend, M: Module<B>>(
    module: M,
    frozen: bool,
) -> M {
    if frozen { module.no_grad() } else { module }
}

/// Trainability of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitTrainability {
    /// The unit.
    pub unit: ParamUnit,

    /// Does the unit receive gradients?
    pub trainable: bool,
}

/// Explicit per-unit trainability record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainabilityMap {
    /// Entries, in forward order.
    pub entries: Vec<UnitTrainability>,
}

impl TrainabilityMap {
    /// Every unit trainable.
    pub fn all_trainable(units: Vec<ParamUnit>) -> Self {
        Self::from_mask(units, |_, _| true)
    }

    /// Build from a ``(position, unit) -> trainable`` mask.
    pub fn from_mask<F>(
        units: Vec<ParamUnit>,
        mut trainable: F,
    ) -> Self
    where
        F: FnMut(usize, &ParamUnit) -> bool,
    {
        Self {
            entries: units
                .into_iter()
                .enumerate()
                .map(|(idx, unit)| UnitTrainability {
                    trainable: trainable(idx, &unit),
                    unit,
                })
                .collect(),
        }
    }

    /// Lookup a unit's trainability.
    pub fn is_trainable(
        &self,
        name: &str,
    ) -> Option<bool> {
        self.entries
            .iter()
            .find(|e| e.unit.name == name)
            .map(|e| e.trainable)
    }

    /// Is the named unit frozen? Unknown units are not.
    pub fn is_frozen(
        &self,
        name: &str,
    ) -> bool {
        self.is_trainable(name) == Some(false)
    }

    /// Names of the frozen units.
    pub fn frozen_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| !e.trainable)
            .map(|e| e.unit.name.as_str())
            .collect()
    }

    /// Trainability of each block, by block index.
    pub fn block_trainability(&self) -> Vec<(usize, bool)> {
        self.entries
            .iter()
            .filter_map(|e| e.unit.block.map(|idx| (idx, e.trainable)))
            .collect()
    }

    /// Number of trainable parameters.
    pub fn trainable_params(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.trainable)
            .map(|e| e.unit.num_params)
            .sum()
    }

    /// Number of frozen parameters.
    pub fn frozen_params(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.trainable)
            .map(|e| e.unit.num_params)
            .sum()
    }
}

impl fmt::Display for TrainabilityMap {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for entry in &self.entries {
            writeln!(
                f,
                "{:<32} {:>12} {}",
                entry.unit.name,
                entry.unit.num_params,
                if entry.trainable { "trainable" } else { "frozen" }
            )?;
        }
        Ok(())
    }
}

/// How an encoder's units are frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreezePolicy {
    /// Everything trainable.
    None,

    /// Freeze every unit before the named boundary unit.
    ///
    /// A boundary that was truncated away freezes every remaining unit.
    BeforeUnit(String),

    /// Freeze the first `n` units.
    Leading(usize),

    /// Freeze everything, except blocks with index ``> F``.
    ReenableBlocksAfter(usize),

    /// Freeze every block except the last `n`; non-block units stay trainable.
    TrailingBlocks(usize),
}

impl FreezePolicy {
    /// Resolve the policy over `units` into a [`TrainabilityMap`].
    pub fn resolve(
        &self,
        units: Vec<ParamUnit>,
    ) -> Result<TrainabilityMap> {
        let map = match self {
            Self::None => TrainabilityMap::all_trainable(units),
            Self::BeforeUnit(boundary) => {
                let stop = units
                    .iter()
                    .position(|u| &u.name == boundary)
                    .unwrap_or(units.len());
                TrainabilityMap::from_mask(units, |idx, _| idx >= stop)
            }
            Self::Leading(n) => {
                if *n > units.len() {
                    return Err(Error::config(format!(
                        "cannot freeze {n} leading units of {}",
                        units.len()
                    )));
                }
                TrainabilityMap::from_mask(units, |idx, _| idx >= *n)
            }
            Self::ReenableBlocksAfter(last_frozen) => {
                TrainabilityMap::from_mask(units, |_, u| {
                    matches!(u.block, Some(b) if b > *last_frozen)
                })
            }
            Self::TrailingBlocks(n) => {
                let num_blocks = units.iter().filter(|u| u.block.is_some()).count();
                let first_trainable = num_blocks.saturating_sub(*n);
                TrainabilityMap::from_mask(units, |_, u| match u.block {
                    Some(b) => b >= first_trainable,
                    None => true,
                })
            }
        };

        for name in map.frozen_names() {
            tracing::debug!(unit = name, "frozen");
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resnet_units() -> Vec<ParamUnit> {
        ["conv1", "bn1", "relu", "maxpool", "layer1", "layer2", "layer3"]
            .into_iter()
            .enumerate()
            .map(|(i, n)| ParamUnit::new(n, i * 10))
            .collect()
    }

    fn transformer_units(blocks: usize) -> Vec<ParamUnit> {
        let mut units = vec![ParamUnit::new("embed", 5)];
        units.extend((0..blocks).map(|i| ParamUnit::block(format!("blocks.{i}"), i, 100)));
        units.push(ParamUnit::new("norm", 2));
        units
    }

    #[test]
    fn test_before_unit() {
        let map = FreezePolicy::BeforeUnit("layer2".to_string())
            .resolve(resnet_units())
            .unwrap();

        assert_eq!(
            map.frozen_names(),
            vec!["conv1", "bn1", "relu", "maxpool", "layer1"]
        );
        assert_eq!(map.is_trainable("layer2"), Some(true));
        assert_eq!(map.is_trainable("layer3"), Some(true));
        assert_eq!(map.is_trainable("fc"), None);
        assert!(!map.is_frozen("fc"));

        // A truncated-away boundary freezes everything left.
        let map = FreezePolicy::BeforeUnit("layer4".to_string())
            .resolve(resnet_units())
            .unwrap();
        assert_eq!(map.trainable_params(), 0);
    }

    #[test]
    fn test_leading() {
        let map = FreezePolicy::Leading(5).resolve(resnet_units()).unwrap();
        assert_eq!(map.frozen_names().len(), 5);
        assert_eq!(map.frozen_params(), 100);
        assert_eq!(map.trainable_params(), 110);

        assert!(FreezePolicy::Leading(8).resolve(resnet_units()).is_err());
    }

    #[test]
    fn test_reenable_blocks_after() {
        let map = FreezePolicy::ReenableBlocksAfter(1)
            .resolve(transformer_units(4))
            .unwrap();

        assert_eq!(
            map.block_trainability(),
            vec![(0, false), (1, false), (2, true), (3, true)]
        );
        assert!(map.is_frozen("embed"));
        assert!(map.is_frozen("norm"));
        assert_eq!(map.trainable_params(), 200);
    }

    #[test]
    fn test_trailing_blocks() {
        let map = FreezePolicy::TrailingBlocks(1)
            .resolve(transformer_units(3))
            .unwrap();
        assert_eq!(
            map.block_trainability(),
            vec![(0, false), (1, false), (2, true)]
        );
        assert!(!map.is_frozen("embed"));

        let map = FreezePolicy::TrailingBlocks(0)
            .resolve(transformer_units(3))
            .unwrap();
        assert!(map.block_trainability().iter().all(|(_, t)| !t));

        let map = FreezePolicy::TrailingBlocks(10)
            .resolve(transformer_units(3))
            .unwrap();
        assert_eq!(map.frozen_params(), 0);
    }

    #[test]
    fn test_display() {
        let map = FreezePolicy::Leading(1).resolve(resnet_units()).unwrap();
        let text = map.to_string();
        assert!(text.lines().next().unwrap().ends_with("frozen"));
        assert_eq!(text.lines().count(), 7);
    }
}
