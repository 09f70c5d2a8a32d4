//! Stem roles, request targets, and separated outputs

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SeparationError, SeparationResult};
use crate::model::ModelVariant;

/// Source role of a separated stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StemRole {
    Vocals,
    /// Everything that is not vocals (2-stem residual)
    Accompaniment,
    Drums,
    Bass,
    Other,
}

impl StemRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StemRole::Vocals => "vocals",
            StemRole::Accompaniment => "accompaniment",
            StemRole::Drums => "drums",
            StemRole::Bass => "bass",
            StemRole::Other => "other",
        }
    }

    /// Roles produced by a model variant, in output order.
    pub fn for_variant(variant: ModelVariant) -> &'static [StemRole] {
        match variant {
            ModelVariant::TwoStem => &[StemRole::Vocals, StemRole::Accompaniment],
            ModelVariant::FourStem => {
                &[StemRole::Vocals, StemRole::Drums, StemRole::Bass, StemRole::Other]
            }
        }
    }
}

impl fmt::Display for StemRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller wants back from a request.
///
/// Targets are resolved against the chosen model variant up front, so an
/// impossible combination fails before any audio work starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetRole {
    Vocals,
    /// Instrumental mix with vocals removed
    Karaoke,
    Drums,
    Bass,
    Other,
}

impl TargetRole {
    /// Map the target onto a stem the given variant actually produces.
    pub fn resolve(self, variant: ModelVariant) -> SeparationResult<StemRole> {
        let resolved = match (self, variant) {
            (TargetRole::Vocals, _) => Some(StemRole::Vocals),
            (TargetRole::Karaoke, ModelVariant::TwoStem) => Some(StemRole::Accompaniment),
            (TargetRole::Karaoke, ModelVariant::FourStem) => None,
            (TargetRole::Drums, ModelVariant::FourStem) => Some(StemRole::Drums),
            (TargetRole::Bass, ModelVariant::FourStem) => Some(StemRole::Bass),
            (TargetRole::Other, ModelVariant::FourStem) => Some(StemRole::Other),
            (TargetRole::Drums | TargetRole::Bass | TargetRole::Other, ModelVariant::TwoStem) => {
                None
            }
        };
        resolved.ok_or_else(|| SeparationError::Config {
            reason: format!("target {self:?} is not available from the {variant} model"),
        })
    }
}

/// One separated stem as mono samples.
#[derive(Debug, Clone)]
pub struct StemOutput {
    pub role: StemRole,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl StemOutput {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |a, &b| a.max(b.abs()))
    }

    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|&v| v * v).sum();
        (sum / self.samples.len() as f32).sqrt()
    }
}

/// All stems produced by one separation request.
#[derive(Debug, Clone, Default)]
pub struct StemCollection {
    stems: HashMap<StemRole, StemOutput>,
}

impl StemCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stem: StemOutput) {
        self.stems.insert(stem.role, stem);
    }

    pub fn get(&self, role: StemRole) -> Option<&StemOutput> {
        self.stems.get(&role)
    }

    pub fn take(&mut self, role: StemRole) -> Option<StemOutput> {
        self.stems.remove(&role)
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    /// Roles present, in canonical order
    pub fn roles(&self) -> Vec<StemRole> {
        [
            StemRole::Vocals,
            StemRole::Accompaniment,
            StemRole::Drums,
            StemRole::Bass,
            StemRole::Other,
        ]
        .into_iter()
        .filter(|r| self.stems.contains_key(r))
        .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StemOutput> {
        self.stems.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_resolve_against_supported_variants() {
        assert_eq!(
            TargetRole::Vocals.resolve(ModelVariant::TwoStem).unwrap(),
            StemRole::Vocals
        );
        assert_eq!(
            TargetRole::Karaoke.resolve(ModelVariant::TwoStem).unwrap(),
            StemRole::Accompaniment
        );
        assert_eq!(
            TargetRole::Drums.resolve(ModelVariant::FourStem).unwrap(),
            StemRole::Drums
        );
    }

    #[test]
    fn impossible_targets_are_config_errors() {
        for (target, variant) in [
            (TargetRole::Karaoke, ModelVariant::FourStem),
            (TargetRole::Drums, ModelVariant::TwoStem),
            (TargetRole::Bass, ModelVariant::TwoStem),
            (TargetRole::Other, ModelVariant::TwoStem),
        ] {
            let err = target.resolve(variant).unwrap_err();
            assert!(matches!(err, SeparationError::Config { .. }));
        }
    }

    #[test]
    fn variant_role_lists() {
        assert_eq!(StemRole::for_variant(ModelVariant::TwoStem).len(), 2);
        assert_eq!(StemRole::for_variant(ModelVariant::FourStem).len(), 4);
        assert!(!StemRole::for_variant(ModelVariant::FourStem).contains(&StemRole::Accompaniment));
    }

    #[test]
    fn stem_statistics() {
        let stem = StemOutput {
            role: StemRole::Vocals,
            samples: vec![0.0, 0.5, -1.0, 0.5],
            sample_rate: 4,
        };
        assert_eq!(stem.duration_secs(), 1.0);
        assert_eq!(stem.peak(), 1.0);
        assert!((stem.rms() - (1.5f32 / 4.0).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn collection_orders_roles_canonically() {
        let mut stems = StemCollection::new();
        for role in [StemRole::Other, StemRole::Vocals, StemRole::Bass] {
            stems.insert(StemOutput {
                role,
                samples: vec![0.0],
                sample_rate: 22050,
            });
        }
        assert_eq!(
            stems.roles(),
            vec![StemRole::Vocals, StemRole::Bass, StemRole::Other]
        );
    }
}
