//! Block reward calculation
//!
//! Subsidies are step functions of chain time. Every amount is an integer in
//! base units; fractional coin values are declared in milli-coins.
//!
//! All schedules are keyed on the best header handed in through
//! [`RewardContext`], never on wall-clock time.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::IndexedHeader;
use crate::masternode::MasternodeTier;
use crate::node::RewardParams;

/// Ordered `(activation time, amount)` schedule.
///
/// Each step after the first is in force strictly between its activation and
/// the next one. Outside every step, exact activation seconds included, the
/// first amount applies.
#[derive(Debug, Clone, Copy)]
pub struct RewardLadder {
    steps: &'static [(u64, u64)],
}

impl RewardLadder {
    pub const fn new(steps: &'static [(u64, u64)]) -> Self {
        Self { steps }
    }

    pub fn value_at(&self, time: u64) -> u64 {
        let base = self.steps.first().map_or(0, |&(_, value)| value);
        self.steps
            .iter()
            .enumerate()
            .skip(1)
            .find(|&(i, &(activation, _))| {
                let before_next = self.steps.get(i + 1).map_or(true, |&(next, _)| time < next);
                activation < time && before_next
            })
            .map_or(base, |(_, &(_, value))| value)
    }

    pub fn steps(&self) -> &'static [(u64, u64)] {
        self.steps
    }
}

/// Chain facts a reward calculation depends on
#[derive(Debug, Clone, Copy)]
pub struct RewardContext<'a> {
    /// Best header at the time of the calculation
    pub tip: &'a IndexedHeader,
    /// Tier of the masternode elected for the block, `None` when no winner is known
    pub payee_tier: Option<MasternodeTier>,
}

impl<'a> RewardContext<'a> {
    pub fn new(tip: &'a IndexedHeader, payee_tier: Option<MasternodeTier>) -> Self {
        Self { tip, payee_tier }
    }

    fn time(&self) -> u64 {
        self.tip.timestamp()
    }

    fn tier_two_active(&self, params: &RewardParams) -> bool {
        self.payee_tier == Some(MasternodeTier::Two) && self.time() > params.tier_two_start
    }

    fn in_transition(&self, params: &RewardParams) -> bool {
        self.time() < params.transition_end
    }

    fn past_rewards_fork(&self, params: &RewardParams) -> bool {
        self.time() > params.rewards_fork_time
    }
}

/// What the money-supply policy decided for a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupplyClamp {
    Schedule(u64),
    Reserve(u64),
    FeesOnly,
}

/// Reserve payouts first, then the hard cap.
fn clamp_to_supply(params: &RewardParams, supply: u64, height: u64, subsidy: u64) -> SupplyClamp {
    let reserve_total = params.reserve_reward.saturating_mul(params.reserve_blocks);
    let clamped = if height > params.reserve_phase_start && supply < reserve_total {
        SupplyClamp::Reserve(params.reserve_reward)
    } else {
        SupplyClamp::Schedule(subsidy)
    };

    if supply > params.money_cap {
        return SupplyClamp::FeesOnly;
    }
    clamped
}

fn halve(subsidy: u64, height: u64, interval: u64) -> u64 {
    let halvings = height / interval.max(1);
    if halvings >= u64::BITS as u64 {
        0
    } else {
        subsidy >> halvings
    }
}

/// Miner reward for a PoW block at `height`, fees included
pub fn proof_of_work_reward(params: &RewardParams, ctx: &RewardContext<'_>, height: u64, fees: u64) -> u64 {
    let mut subsidy = params.pow_base.value_at(ctx.time());
    if ctx.tier_two_active(params) {
        subsidy += params.tier_two_bonus;
    }
    if ctx.in_transition(params) {
        subsidy += params.pow_transition_bonus;
    }

    let subsidy = match clamp_to_supply(params, ctx.tip.money_supply, height, subsidy) {
        SupplyClamp::Schedule(value) | SupplyClamp::Reserve(value) => value,
        SupplyClamp::FeesOnly => {
            debug!(height, fees, "PoW reward capped, fees only");
            return fees;
        }
    };

    let subsidy = halve(subsidy, height, params.halving_interval);
    debug!(height, subsidy, fees, "PoW reward");
    subsidy.saturating_add(fees)
}

/// Staker reward for a PoS block built on `prev`, fees included.
///
/// `coin_age` is accepted for interface parity and only logged; the schedule
/// is flat per block.
pub fn proof_of_stake_reward(
    params: &RewardParams,
    ctx: &RewardContext<'_>,
    prev: &IndexedHeader,
    coin_age: u64,
    fees: u64,
) -> u64 {
    let ladder = if ctx.past_rewards_fork(params) {
        &params.pos_current
    } else {
        &params.pos_legacy
    };
    let mut subsidy = ladder.value_at(prev.timestamp());
    if ctx.in_transition(params) {
        subsidy += params.pos_transition_bonus;
    }
    if ctx.tier_two_active(params) {
        subsidy += params.tier_two_bonus;
    }

    let height = prev.height + 1;
    let subsidy = match clamp_to_supply(params, ctx.tip.money_supply, height, subsidy) {
        SupplyClamp::Schedule(value) | SupplyClamp::Reserve(value) => value,
        SupplyClamp::FeesOnly => {
            debug!(height, fees, "PoS reward capped, fees only");
            return fees;
        }
    };

    debug!(height, subsidy, coin_age, fees, "PoS reward");
    subsidy.saturating_add(fees)
}

/// Service payment owed to the elected masternode
pub fn masternode_payment(params: &RewardParams, ctx: &RewardContext<'_>, height: u64) -> u64 {
    if ctx.payee_tier.is_none() || !ctx.past_rewards_fork(params) {
        return 0;
    }
    let mut payment = params.masternode_base;
    if ctx.tier_two_active(params) {
        payment += params.tier_two_bonus;
    }
    debug!(height, payment, "Masternode payment");
    payment
}

/// Operational fund payment
pub fn devops_payment(params: &RewardParams, ctx: &RewardContext<'_>, height: u64) -> u64 {
    let mut payment = 0;
    if ctx.past_rewards_fork(params) {
        payment += params.devops_base;
    }
    if ctx.in_transition(params) {
        payment += params.devops_transition_bonus;
    }
    debug!(height, payment, "DevOps payment");
    payment
}

/// Reward split of one block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    /// Miner or staker share, fees included
    pub producer: u64,
    pub masternode: u64,
    pub devops: u64,
}

impl RewardBreakdown {
    pub fn total(&self) -> u64 {
        self.producer
            .saturating_add(self.masternode)
            .saturating_add(self.devops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{BlockHeader, BlockKind};
    use crate::constants::{milli_coins, COIN};
    use crate::crypto::Hash;
    use crate::node::{ChainParams, REWARDS_FORK_TIME, REWARDS_TRANSITION_END, TIER_TWO_START};

    const SETTLED_SUPPLY: u64 = 9_000_000_000 * COIN;

    fn entry(timestamp: u64, height: u64, money_supply: u64) -> IndexedHeader {
        let header = BlockHeader {
            version: 1,
            prev_hash: Hash::zero(),
            merkle_root: Hash::zero(),
            timestamp,
            bits: 0x1e0fffff,
            nonce: 0,
            kind: BlockKind::ProofOfStake,
        };
        IndexedHeader {
            hash: header.hash(),
            header,
            height,
            money_supply,
        }
    }

    fn params() -> RewardParams {
        ChainParams::main().rewards
    }

    #[test]
    fn test_ladder_steps_are_open_intervals() {
        const STEPS: &[(u64, u64)] = &[(0, 1), (100, 2), (200, 3)];
        let ladder = RewardLadder::new(STEPS);
        assert_eq!(ladder.value_at(0), 1);
        assert_eq!(ladder.value_at(100), 1);
        assert_eq!(ladder.value_at(101), 2);
        assert_eq!(ladder.value_at(199), 2);
        assert_eq!(ladder.value_at(200), 1);
        assert_eq!(ladder.value_at(201), 3);
        assert_eq!(ladder.value_at(u64::MAX), 3);
    }

    #[test]
    fn test_pos_activation_second_falls_back_to_base() {
        let p = params();
        let tip = entry(REWARDS_FORK_TIME - 10, 1000, SETTLED_SUPPLY);
        let ctx = RewardContext::new(&tip, None);
        let at_step = entry(1_612_310_400, 1000, SETTLED_SUPPLY);
        let after_step = entry(1_612_310_401, 1000, SETTLED_SUPPLY);
        let transition = milli_coins(20_800);
        assert_eq!(proof_of_stake_reward(&p, &ctx, &at_step, 0, 0), milli_coins(2_490) + transition);
        assert_eq!(proof_of_stake_reward(&p, &ctx, &after_step, 0, 0), milli_coins(3_320) + transition);

        let tip = entry(1_650_000_000, 1000, SETTLED_SUPPLY);
        let ctx = RewardContext::new(&tip, None);
        let at_step = entry(1_609_804_800, 1000, SETTLED_SUPPLY);
        assert_eq!(proof_of_stake_reward(&p, &ctx, &at_step, 0, 0), milli_coins(58_250));
    }

    #[test]
    fn test_pow_before_and_after_fork() {
        let p = params();
        let early = entry(REWARDS_FORK_TIME - 10, 1000, SETTLED_SUPPLY);
        let ctx = RewardContext::new(&early, None);
        assert_eq!(proof_of_work_reward(&p, &ctx, 1001, 0), 83 * COIN + 160 * COIN);

        let late = entry(REWARDS_TRANSITION_END + 10, 1000, SETTLED_SUPPLY);
        let ctx = RewardContext::new(&late, Some(MasternodeTier::One));
        assert_eq!(proof_of_work_reward(&p, &ctx, 1001, 7), 50 * COIN + 7);
    }

    #[test]
    fn test_tier_two_bonus_needs_start_time() {
        let p = params();
        let before = entry(TIER_TWO_START, 1000, SETTLED_SUPPLY);
        let ctx = RewardContext::new(&before, Some(MasternodeTier::Two));
        assert_eq!(masternode_payment(&p, &ctx, 1001), 42 * COIN);

        let after = entry(TIER_TWO_START + 1, 1000, SETTLED_SUPPLY);
        let ctx = RewardContext::new(&after, Some(MasternodeTier::Two));
        assert_eq!(masternode_payment(&p, &ctx, 1001), 160 * COIN);
        assert_eq!(proof_of_work_reward(&p, &ctx, 1001, 0), 168 * COIN);
    }

    #[test]
    fn test_pos_ladders_follow_previous_block() {
        let p = params();
        let tip = entry(1_650_000_000, 1000, SETTLED_SUPPLY);
        let prev = entry(1_650_000_000, 1000, SETTLED_SUPPLY);
        let ctx = RewardContext::new(&tip, None);
        assert_eq!(proof_of_stake_reward(&p, &ctx, &prev, 0, 0), milli_coins(62_000));

        let old_tip = entry(1_594_000_000, 1000, SETTLED_SUPPLY);
        let ctx = RewardContext::new(&old_tip, None);
        assert_eq!(
            proof_of_stake_reward(&p, &ctx, &old_tip, 0, 0),
            milli_coins(2_905) + milli_coins(20_800)
        );
    }

    #[test]
    fn test_reserve_phase_overrides_schedule() {
        let p = params();
        let tip = entry(REWARDS_TRANSITION_END + 10, 5, 0);
        let ctx = RewardContext::new(&tip, None);
        assert_eq!(proof_of_work_reward(&p, &ctx, 6, 1), p.reserve_reward + 1);
        // genesis successor is not part of the reserve phase
        assert_eq!(proof_of_work_reward(&p, &ctx, 1, 0), 50 * COIN);
    }

    #[test]
    fn test_money_cap_pays_fees_only() {
        let p = params();
        let tip = entry(REWARDS_TRANSITION_END + 10, 1000, p.money_cap + 1);
        let ctx = RewardContext::new(&tip, Some(MasternodeTier::Two));
        assert_eq!(proof_of_work_reward(&p, &ctx, 1001, 55), 55);
        assert_eq!(proof_of_stake_reward(&p, &ctx, &tip, 10, 55), 55);
    }

    #[test]
    fn test_halving_schedule() {
        let p = params();
        let tip = entry(REWARDS_TRANSITION_END + 10, 600_000, SETTLED_SUPPLY);
        let ctx = RewardContext::new(&tip, None);
        assert_eq!(proof_of_work_reward(&p, &ctx, 500_000, 0), 25 * COIN);
        assert_eq!(proof_of_work_reward(&p, &ctx, 64 * 500_000, 3), 3);
    }

    #[test]
    fn test_masternode_payment_requires_winner() {
        let p = params();
        let tip = entry(REWARDS_TRANSITION_END + 10, 1000, SETTLED_SUPPLY);
        assert_eq!(masternode_payment(&p, &RewardContext::new(&tip, None), 1001), 0);
        assert_eq!(
            masternode_payment(&p, &RewardContext::new(&tip, Some(MasternodeTier::One)), 1001),
            42 * COIN
        );
    }

    #[test]
    fn test_devops_transition() {
        let p = params();
        let pre = entry(REWARDS_FORK_TIME - 1, 10, SETTLED_SUPPLY);
        assert_eq!(devops_payment(&p, &RewardContext::new(&pre, None), 11), 16 * COIN);
        let transition = entry(REWARDS_FORK_TIME + 1, 10, SETTLED_SUPPLY);
        assert_eq!(
            devops_payment(&p, &RewardContext::new(&transition, None), 11),
            milli_coins(12_500) + 16 * COIN
        );
        let settled = entry(REWARDS_TRANSITION_END, 10, SETTLED_SUPPLY);
        assert_eq!(devops_payment(&p, &RewardContext::new(&settled, None), 11), milli_coins(12_500));
    }

    #[test]
    fn test_breakdown_total() {
        let split = RewardBreakdown {
            producer: 5,
            masternode: 3,
            devops: 2,
        };
        assert_eq!(split.total(), 10);
    }
}
