//! VRX (Terminal-Velocity) difficulty retarget
//!
//! Every call builds its own working state from the chain view, so retargets
//! for different candidates can run concurrently.
//!
//! Multipliers above 1.0 tighten the target (blocks came too fast), below 1.0
//! they ease it. The lane being produced is retargeted from its own previous
//! target: PoW and PoS difficulties move independently.

use primitive_types::U256;
use tracing::debug;

use super::target::{compact_to_target, scale_target, target_to_compact};
use super::{BlockKind, ChainView, IndexedHeader};
use crate::node::{ChainParams, RetargetParams};

/// Fixed-point scale applied to the averaged multiplier
pub const TERMINAL_FACTOR: u64 = 10_000;

/// Number of spacings sampled per retarget
pub const SAMPLE_COUNT: usize = 5;

const HOUR: u64 = 60 * 60;

/// Decay rounds allowed before a stalled lane is reset to its ceiling
const MAX_CURVE_ROUNDS: u64 = 5;

/// Blocks seen per lane while scanning the sample window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneCounts {
    pub proof_of_work: u32,
    pub proof_of_stake: u32,
}

impl LaneCounts {
    fn record(&mut self, kind: BlockKind) {
        match kind {
            BlockKind::ProofOfWork => self.proof_of_work += 1,
            BlockKind::ProofOfStake => self.proof_of_stake += 1,
        }
    }

    /// Same counts with the lanes swapped
    pub fn mirrored(self) -> Self {
        Self {
            proof_of_work: self.proof_of_stake,
            proof_of_stake: self.proof_of_work,
        }
    }
}

/// The five most recent spacings and their ladder multipliers
#[derive(Debug, Clone, PartialEq)]
pub struct VelocitySample {
    pub spacings: [i64; SAMPLE_COUNT],
    pub multipliers: [f64; SAMPLE_COUNT],
    pub lanes: LaneCounts,
}

impl VelocitySample {
    /// Walk back from `last`, measuring each spacing.
    ///
    /// Returns `None` when the view cannot supply enough ancestors.
    pub fn collect<C: ChainView>(
        params: &RetargetParams,
        chain: &C,
        last: &IndexedHeader,
        kind: BlockKind,
    ) -> Option<Self> {
        let mut spacings = [0i64; SAMPLE_COUNT];
        let mut multipliers = [0f64; SAMPLE_COUNT];
        let mut lanes = LaneCounts::default();

        let per_header_lanes = last.timestamp() > params.lane_count_fork_time;
        let mut cursor = last;

        for slot in 0..SAMPLE_COUNT {
            let parent = chain.parent(cursor)?;
            let spacing = cursor.timestamp() as i64 - parent.timestamp() as i64;

            spacings[slot] = spacing;
            multipliers[slot] = spacing_multiplier(params, spacing);

            if per_header_lanes {
                lanes.record(parent.kind());
            } else {
                lanes.record(kind);
            }

            cursor = parent;
        }

        Some(Self {
            spacings,
            multipliers,
            lanes,
        })
    }

    /// Mean of the five multipliers
    pub fn terminal_average(&self) -> f64 {
        self.multipliers.iter().sum::<f64>() / SAMPLE_COUNT as f64
    }
}

/// Three-tier threshold ladder for one spacing
pub fn spacing_multiplier(params: &RetargetParams, spacing: i64) -> f64 {
    let normal = params.target_spacing;
    let maximum = params.max_spacing;

    if spacing >= normal {
        if spacing > maximum + 180 {
            0.5
        } else if spacing > maximum {
            0.75
        } else {
            1.0
        }
    } else if spacing < normal - 90 {
        2.0
    } else if spacing < normal - 60 {
        1.5
    } else {
        1.25
    }
}

/// Ease the minority lane when the other lane has been dominating.
///
/// The result is floored at 0.5 once the correction is active.
pub fn skew_correction(
    params: &RetargetParams,
    average: f64,
    lanes: LaneCounts,
    kind: BlockKind,
    tip_height: u64,
) -> f64 {
    if tip_height <= params.skew_activation_height {
        return average;
    }

    let threshold = params.skew_threshold;
    let mut corrected = average;
    match kind {
        BlockKind::ProofOfWork if lanes.proof_of_work < lanes.proof_of_stake => {
            if lanes.proof_of_stake - lanes.proof_of_work > threshold {
                corrected /= 3.0;
            }
        }
        BlockKind::ProofOfStake if lanes.proof_of_stake < lanes.proof_of_work => {
            if lanes.proof_of_work - lanes.proof_of_stake > threshold {
                corrected /= 3.0;
            }
        }
        _ => {}
    }

    corrected.max(0.5)
}

/// Result of running the elapsed-time decay curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecayOutcome {
    Scaled(f64),
    /// The lane stalled past the last round; retarget to the ceiling
    Reset,
}

/// Divide the multiplier for every hour the lane has gone without a block.
///
/// `elapsed` is measured by the caller; `extended` selects the curve-upgrade
/// rules (growing divisor, reset after five rounds) over the legacy four
/// fixed halvings.
pub fn decay_curve(average: f64, elapsed: u64, extended: bool) -> DecayOutcome {
    let mut hour_rounds = 1u64;
    let mut divisor = 2.0f64;
    let mut decayed = average;

    if extended {
        while elapsed > hour_rounds * HOUR {
            if hour_rounds > MAX_CURVE_ROUNDS {
                return DecayOutcome::Reset;
            }
            decayed /= divisor;
            divisor += 1.0;
            hour_rounds += 1;
        }
    } else {
        for offset in 0..4 {
            if elapsed > (hour_rounds + offset) * HOUR {
                decayed /= divisor;
            }
        }
    }

    DecayOutcome::Scaled(decayed)
}

/// How a retarget call concluded
#[derive(Debug, Clone, PartialEq)]
pub enum RetargetOutcome {
    /// Chain start, fork window or test fork: the ceiling applies
    DryRun { bits: u32 },
    /// The decay curve exhausted its rounds: the ceiling applies
    CurveReset { bits: u32 },
    Adjusted {
        multiplier: f64,
        previous_bits: u32,
        bits: u32,
    },
}

impl RetargetOutcome {
    pub fn bits(&self) -> u32 {
        match self {
            RetargetOutcome::DryRun { bits }
            | RetargetOutcome::CurveReset { bits }
            | RetargetOutcome::Adjusted { bits, .. } => *bits,
        }
    }
}

/// Call-local working values of one retarget
struct RetargetState<'a> {
    kind: BlockKind,
    limit: U256,
    last: &'a IndexedHeader,
    last_typed: &'a IndexedHeader,
}

impl<'a> RetargetState<'a> {
    fn new<C: ChainView>(params: &ChainParams, chain: &'a C, last: &'a IndexedHeader, kind: BlockKind) -> Self {
        Self {
            kind,
            limit: params.limit_for(kind),
            last,
            last_typed: chain.last_of_kind(last, kind),
        }
    }

    fn ceiling_bits(&self) -> u32 {
        target_to_compact(self.limit)
    }

    fn is_dry_run(&self, params: &RetargetParams) -> bool {
        if self.last.height < params.scan_depth + params.warmup_blocks {
            return true;
        }

        let tip_time = self.last.timestamp();
        if params
            .reset_windows
            .iter()
            .any(|&(start, end)| tip_time > start && tip_time < end)
        {
            return true;
        }

        params.live_fork_height == Some(self.last.height)
    }

    /// Seconds since this lane last produced a block
    fn lane_elapsed<C: ChainView>(&self, chain: &C, extended: bool) -> u64 {
        if extended {
            self.last.timestamp().saturating_sub(self.last_typed.timestamp())
        } else {
            chain
                .parent(self.last_typed)
                .map(|prev| self.last_typed.timestamp().saturating_sub(prev.timestamp()))
                .unwrap_or(0)
        }
    }

    fn apply(&self, multiplier: f64) -> (u32, u32) {
        let previous_bits = self.last_typed.bits();
        let factor = ((TERMINAL_FACTOR as f64 * multiplier) as u64).max(1);
        let scaled = scale_target(compact_to_target(previous_bits), TERMINAL_FACTOR, factor);
        let bounded = scaled.min(self.limit);
        (previous_bits, target_to_compact(bounded))
    }
}

/// Run the full retarget and report how it concluded
pub fn retarget<C: ChainView>(
    params: &ChainParams,
    chain: &C,
    last: &IndexedHeader,
    proof_of_stake: bool,
) -> RetargetOutcome {
    let kind = BlockKind::from_stake_flag(proof_of_stake);
    let rules = &params.retarget;
    let state = RetargetState::new(params, chain, last, kind);

    if state.is_dry_run(rules) {
        debug!(height = last.height, lane = kind.label(), "VRX dry run, using lane ceiling");
        return RetargetOutcome::DryRun {
            bits: state.ceiling_bits(),
        };
    }

    let Some(sample) = VelocitySample::collect(rules, chain, last, kind) else {
        debug!(height = last.height, "VRX sample window unavailable, using lane ceiling");
        return RetargetOutcome::DryRun {
            bits: state.ceiling_bits(),
        };
    };

    let average = sample.terminal_average();
    let skewed = skew_correction(rules, average, sample.lanes, kind, last.height);

    let extended = last.timestamp() > rules.curve_upgrade_time;
    let elapsed = state.lane_elapsed(chain, extended);

    debug!(
        lane = kind.label(),
        spacings = ?sample.spacings,
        multipliers = ?sample.multipliers,
        average,
        skewed,
        elapsed,
        "Terminal-Velocity sample"
    );

    let multiplier = match decay_curve(skewed, elapsed, extended) {
        DecayOutcome::Scaled(value) => value,
        DecayOutcome::Reset => {
            debug!(lane = kind.label(), elapsed, "VRX curve reset, lane stalled");
            return RetargetOutcome::CurveReset {
                bits: state.ceiling_bits(),
            };
        }
    };

    let (previous_bits, bits) = state.apply(multiplier);
    debug!(
        lane = kind.label(),
        multiplier,
        previous = format_args!("{previous_bits:08x}"),
        next = format_args!("{bits:08x}"),
        "Terminal-Velocity retarget"
    );

    RetargetOutcome::Adjusted {
        multiplier,
        previous_bits,
        bits,
    }
}

/// Compact target required for the block built on top of `last`
pub fn next_target<C: ChainView>(
    params: &ChainParams,
    chain: &C,
    last: &IndexedHeader,
    proof_of_stake: bool,
) -> u32 {
    retarget(params, chain, last, proof_of_stake).bits()
}
