//! Regeneration job tuning knobs

/// Named throughput tiers for the per-step write budget
///
/// `Careful` is slow enough to be imperceptible on a busy host; `Extreme`
/// restores a full-size region in a handful of steps and is meant for idle
/// worlds or operator consoles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenSpeed {
    Careful,
    Slow,
    Normal,
    Fast,
    Extreme,
}

impl RegenSpeed {
    /// Maximum voxel writes applied per host step
    pub fn writes_per_step(self) -> u32 {
        match self {
            RegenSpeed::Careful => 1_000,
            RegenSpeed::Slow => 20_000,
            RegenSpeed::Normal => 100_000,
            RegenSpeed::Fast => 1_000_000,
            RegenSpeed::Extreme => 4_000_000,
        }
    }
}

/// Per-step budget: a named tier or an explicit write count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepBudget {
    Preset(RegenSpeed),
    Custom(u32),
}

impl StepBudget {
    /// Resolved budget; a zero custom budget is clamped to one so a job
    /// always makes progress
    pub fn writes_per_step(self) -> u32 {
        match self {
            StepBudget::Preset(speed) => speed.writes_per_step(),
            StepBudget::Custom(n) => n.max(1),
        }
    }
}

impl Default for StepBudget {
    fn default() -> Self {
        StepBudget::Preset(RegenSpeed::Normal)
    }
}

impl From<RegenSpeed> for StepBudget {
    fn from(speed: RegenSpeed) -> Self {
        StepBudget::Preset(speed)
    }
}

/// What to do with occupants found inside the region when a job starts
///
/// Actions are applied in declaration order per occupant: incapacitate,
/// teleport, then each follow-up. `cancel_on_occupant` short-circuits the
/// whole job instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupantPolicy {
    /// Abort the job instead of disturbing anyone
    pub cancel_on_occupant: bool,
    pub incapacitate: bool,
    pub teleport_to_safe_point: bool,
    /// Operator-configured follow-up actions, run per occupant
    pub followup_actions: Vec<String>,
}

impl Default for OccupantPolicy {
    fn default() -> Self {
        Self {
            cancel_on_occupant: false,
            incapacitate: false,
            teleport_to_safe_point: true,
            followup_actions: Vec::new(),
        }
    }
}

/// Options for one regeneration job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegenOptions {
    pub budget: StepBudget,
    /// Restore only voxels whose live state differs from the snapshot
    pub only_modified: bool,
    /// Hold the region lock for the duration of the job
    pub lock_during_regen: bool,
    pub occupants: OccupantPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_budgets_are_ordered() {
        let tiers = [
            RegenSpeed::Careful,
            RegenSpeed::Slow,
            RegenSpeed::Normal,
            RegenSpeed::Fast,
            RegenSpeed::Extreme,
        ];
        for pair in tiers.windows(2) {
            assert!(pair[0].writes_per_step() < pair[1].writes_per_step());
        }
        assert_eq!(RegenSpeed::Careful.writes_per_step(), 1_000);
        assert_eq!(RegenSpeed::Extreme.writes_per_step(), 4_000_000);
    }

    #[test]
    fn test_custom_budget_clamped() {
        assert_eq!(StepBudget::Custom(0).writes_per_step(), 1);
        assert_eq!(StepBudget::Custom(17).writes_per_step(), 17);
    }

    #[test]
    fn test_defaults() {
        let opts = RegenOptions::default();
        assert_eq!(opts.budget.writes_per_step(), 100_000);
        assert!(!opts.only_modified);
        assert!(!opts.occupants.cancel_on_occupant);
        assert!(opts.occupants.teleport_to_safe_point);
    }
}
