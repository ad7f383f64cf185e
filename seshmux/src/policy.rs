//! Tier-driven policy gates.
//!
//! The entitlement tier is a read-only input: nothing here validates it, and
//! no gate depends on a network round-trip having completed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::color::Color;

/// An externally-supplied entitlement level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Basic,
    Plus,
    Pro,
}

/// Feature switches supplied alongside the tier. Every switch widens what the
/// tier alone would permit; none narrows it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    #[serde(default)]
    pub custom_colors: bool,
    #[serde(default)]
    pub auto_restore: bool,
    #[serde(default)]
    pub bulk_export: bool,
}

/// Admission and retention rules derived from the current tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Policy {
    tier: Tier,
    features: FeatureSet,
}

const DORMANT_TTL_BASIC: Duration = Duration::from_secs(7 * 24 * 60 * 60);

impl Policy {
    #[must_use]
    pub fn new(tier: Tier, features: FeatureSet) -> Self {
        Policy { tier, features }
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Maximum number of identities that may exist at once; `None` means
    /// unlimited.
    #[must_use]
    pub fn max_concurrent_identities(&self) -> Option<usize> {
        match self.tier {
            Tier::Basic => Some(3),
            Tier::Plus | Tier::Pro => None,
        }
    }

    /// How long a dormant identity is retained before the TTL sweep deletes
    /// it; `None` means forever.
    #[must_use]
    pub fn dormant_ttl(&self) -> Option<Duration> {
        match self.tier {
            Tier::Basic => Some(DORMANT_TTL_BASIC),
            Tier::Plus | Tier::Pro => None,
        }
    }

    #[must_use]
    pub fn may_use_custom_color(&self) -> bool {
        self.tier == Tier::Pro || self.features.custom_colors
    }

    /// Whether restored tabs are re-bound to their identities after a host
    /// restart.
    #[must_use]
    pub fn may_auto_restore_on_restart(&self) -> bool {
        self.tier == Tier::Pro || self.features.auto_restore
    }

    #[must_use]
    pub fn may_export_all(&self) -> bool {
        self.tier == Tier::Pro || self.features.bulk_export
    }

    /// Whether identities that end up with zero tabs after a restart are kept
    /// dormant, rather than handed to the startup validator for deletion.
    #[must_use]
    pub fn may_retain_dormant_after_restart(&self) -> bool {
        self.tier != Tier::Basic
    }

    /// The color palette available to this tier.
    #[must_use]
    pub fn palette(&self) -> &'static [Color] {
        match self.tier {
            Tier::Basic => &BASIC_PALETTE,
            Tier::Plus => &PLUS_PALETTE,
            Tier::Pro => &PRO_PALETTE,
        }
    }

    /// Whether `color` may be assigned to an identity under this tier.
    #[must_use]
    pub fn allows_color(&self, color: Color) -> bool {
        self.may_use_custom_color() || self.palette().contains(&color)
    }
}

static BASIC_PALETTE: [Color; 6] = [
    Color::rgb(0x2e, 0x86, 0xde),
    Color::rgb(0xe7, 0x4c, 0x3c),
    Color::rgb(0x27, 0xae, 0x60),
    Color::rgb(0xf3, 0x9c, 0x12),
    Color::rgb(0x8e, 0x44, 0xad),
    Color::rgb(0x16, 0xa0, 0x85),
];

static PLUS_PALETTE: [Color; 12] = [
    Color::rgb(0x2e, 0x86, 0xde),
    Color::rgb(0xe7, 0x4c, 0x3c),
    Color::rgb(0x27, 0xae, 0x60),
    Color::rgb(0xf3, 0x9c, 0x12),
    Color::rgb(0x8e, 0x44, 0xad),
    Color::rgb(0x16, 0xa0, 0x85),
    Color::rgb(0xd3, 0x54, 0x00),
    Color::rgb(0x2c, 0x3e, 0x50),
    Color::rgb(0x7f, 0x8c, 0x8d),
    Color::rgb(0xc0, 0x39, 0x2b),
    Color::rgb(0x29, 0x80, 0xb9),
    Color::rgb(0xf1, 0xc4, 0x0f),
];

static PRO_PALETTE: [Color; 20] = [
    Color::rgb(0x2e, 0x86, 0xde),
    Color::rgb(0xe7, 0x4c, 0x3c),
    Color::rgb(0x27, 0xae, 0x60),
    Color::rgb(0xf3, 0x9c, 0x12),
    Color::rgb(0x8e, 0x44, 0xad),
    Color::rgb(0x16, 0xa0, 0x85),
    Color::rgb(0xd3, 0x54, 0x00),
    Color::rgb(0x2c, 0x3e, 0x50),
    Color::rgb(0x7f, 0x8c, 0x8d),
    Color::rgb(0xc0, 0x39, 0x2b),
    Color::rgb(0x29, 0x80, 0xb9),
    Color::rgb(0xf1, 0xc4, 0x0f),
    Color::rgb(0x1a, 0xbc, 0x9c),
    Color::rgb(0x9b, 0x59, 0xb6),
    Color::rgb(0x34, 0x49, 0x5e),
    Color::rgb(0xe6, 0x7e, 0x22),
    Color::rgb(0x95, 0xa5, 0xa6),
    Color::rgb(0x00, 0x67, 0x4f),
    Color::rgb(0x6c, 0x5c, 0xe7),
    Color::rgb(0xfd, 0x79, 0xa8),
];
