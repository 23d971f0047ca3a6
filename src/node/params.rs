//! Network parameter sets
//!
//! One `ChainParams` value per network, selected once at startup. Every
//! consensus constant the engine reads lives here so tests can shift forks.

use primitive_types::U256;

use crate::consensus::{BlockKind, RewardLadder};
use crate::constants::{milli_coins, COIN, MIN_MASTERNODE_RELAY_VERSION};
use crate::crypto::{Hash, PublicKey};

/// Which chain the node follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Main,
    Testnet,
    Regtest,
}

/// Rewards fork: masternode/DevOps payouts start, new base schedules
pub const REWARDS_FORK_TIME: u64 = 1_596_024_000;
/// End of the rewards transition period (bonus payouts stop)
pub const REWARDS_TRANSITION_END: u64 = 1_596_304_801;
/// Tier-2 masternode integration fork window
pub const TIER_TWO_FORK_TIME: u64 = 1_602_504_000;
pub const TIER_TWO_START: u64 = 1_602_504_800;
/// Sunday, March 4, 2018 9:17:58 PM - per-header lane counting
pub const LANE_COUNT_FORK_TIME: u64 = 1_520_198_278;
/// Tuesday, Jul 02, 2019 12:00:00 PM PDT - extended decay curve
pub const CURVE_UPGRADE_TIME: u64 = 1_562_094_000;

/// Timestamp windows (exclusive) during which retargeting is suspended
const FORK_RESET_WINDOWS: &[(u64, u64)] = &[
    (REWARDS_FORK_TIME, REWARDS_TRANSITION_END),
    (TIER_TWO_FORK_TIME, TIER_TWO_START),
];

const POW_BASE_LADDER: &[(u64, u64)] = &[(0, 83 * COIN), (REWARDS_FORK_TIME, 50 * COIN)];

const POS_LEGACY_LADDER: &[(u64, u64)] = &[
    (0, milli_coins(2_490)),
    (1_593_907_200, milli_coins(2_905)),
    (1_612_310_400, milli_coins(3_320)),
    (1_643_846_400, milli_coins(4_150)),
    (1_659_484_800, milli_coins(4_980)),
];

const POS_CURRENT_LADDER: &[(u64, u64)] = &[
    (0, milli_coins(58_250)),
    (1_596_585_600, milli_coins(58_875)),
    (1_609_804_800, milli_coins(59_500)),
    (1_625_443_200, milli_coins(60_750)),
    (1_641_340_800, milli_coins(62_000)),
];

/// Shipped mainnet checkpoints; genesis is added from the genesis header.
/// Entries are append-only.
pub const MAIN_CHECKPOINTS: &[(u64, Hash)] = &[
    (1, Hash::from_hex_const("0003071185b88b3b7ac32ce3a04c9e4bc5b485aee7f9d4be0cd906b8158ee2b4")),
    (10, Hash::from_hex_const("0001d465f5ba77a70cda9f5149619567edd0afe9ca40415709354ae534b66e89")),
    (100, Hash::from_hex_const("542a8101388444870dde573f2c126dcf9666bfe1664efa3dae647892e22cf916")),
    (150, Hash::from_hex_const("e18d2f78673c4503fc078eb9aeded8fe33d6db9f46a5d49ffd648d666607499a")),
    (175, Hash::from_hex_const("1bc95bf898bf5ad5868f079717158bd3a1314a534bbaea965fb36c9a26843f2d")),
    (500, Hash::from_hex_const("ee09e49dc639a43f10f06ccbb54e53e77b05933f0923e9e4e8d499358a0f6d0a")),
    (1000, Hash::from_hex_const("fd7b4850ebe601810c03f46b8d11c38de7c5ed59253b373187b263ee5e0a32eb")),
    (2500, Hash::from_hex_const("00022741d81f82864f64b13489736a64f68898fe6662d7e24e85744fecf82e10")),
    (5000, Hash::from_hex_const("00001a9cae6e86f313e38481025b5f304bdf905dc1b963186edd0c2bd60ecebb")),
    (19000, Hash::from_hex_const("0000000000019619935fdce0d4468e31443ed4fd6b969419fc9e14b2f1c25894")),
    (20000, Hash::from_hex_const("00000000009c6ccc3ea60c6d593443be571c797bdc4cfa766ea6107843c93129")),
    (40000, Hash::from_hex_const("8d6ec3a75d44073ff08558c0a6152e18f53582e797e78335a47437a177219351")),
    (43500, Hash::from_hex_const("85bad7c9d35fe4b8af008ddab416f3df56d1287f360d5d4c76abe19dc5c3eafa")),
    (75000, Hash::from_hex_const("00000000003aba90a7e55ce85b9e6fa9d5190c771e7bbc31bca2862506023bd9")),
    (93152, Hash::from_hex_const("1eb5327e1a7e2a8671670832748deede920d8c302c9f148299b95f68b1ebda03")),
    (93160, Hash::from_hex_const("0002957c2e616c3a3965af78924b1c29ff70c81caa86b24b9c53baad96d3f3e3")),
    (93162, Hash::from_hex_const("00032b5ce45d53b67c1cd9b371b75ec054e0bf7542663e8122677d87ea356dca")),
    (93175, Hash::from_hex_const("7ba9de6ba9c0493ad08ffa5e677da710f9b9dd9ac3c1e837e8c98509f301be79")),
    (100000, Hash::from_hex_const("000000000027a8aeae0cad7a2bde09c9cd073affb3c5e070a67e508b990dca40")),
    (125000, Hash::from_hex_const("8cce829d75931cab2bfab72258afc2ffc9afa454e65597de8f92ff928010df6f")),
    (180750, Hash::from_hex_const("00000000001ef025e017c3fb10f4c3f62f5230b6ce2f022ac19b73ca4a0e01f7")),
    (198719, Hash::from_hex_const("75dcfb61d78bc665f7594782812b931777985563bdf64e06f84e95d1ff1c022c")),
    (200000, Hash::from_hex_const("9803fa4132bc11cdb465ff16bf0f8ff0f30bc9a2fb63e3985398235565f266f4")),
    (202884, Hash::from_hex_const("944ede48259183bf3e0867d90f1ae90fc76b18f990ee42e9048ec57741fce6d8")),
    (226933, Hash::from_hex_const("9957578726e950382d499e55af8086a5b55ad869334947b51adc4681e41d55da")),
    (253375, Hash::from_hex_const("4bac34cf01f45424daa5b19ccf2aa3be62ba7aa96e97a0c699572af2bb5eaa77")),
    (262168, Hash::from_hex_const("00000000002fb4bc686a0a6c9019971e60fbfc956b100f7e2fa86bda483fd536")),
    (348258, Hash::from_hex_const("72463265801c162f0ca96e1ea3226a66103ffd64ea4eec657311882b7ac9c9aa")),
    (348259, Hash::from_hex_const("722e6fb7a6821af7eb030366d44f7f44ca566722c5172c8631cf5931d4cbad3d")),
    (406094, Hash::from_hex_const("f3740130d3d7dc1d39dcb7721006e69f59e787eba785473c40a409baa061e92e")),
    (406095, Hash::from_hex_const("bf7665e1ca4c6402db9b65e6be281bccbe0874953de827d77e971c5df4271ff6")),
];

/// VRX retarget tuning
#[derive(Debug, Clone)]
pub struct RetargetParams {
    /// Desired spacing between consecutive blocks (seconds)
    pub target_spacing: i64,
    /// Spacing above which the ladder starts easing the target
    pub max_spacing: i64,
    /// Headers scanned per retarget (one more than the sample count)
    pub scan_depth: u64,
    /// Extra blocks required on top of `scan_depth` before retargeting
    pub warmup_blocks: u64,
    /// Fork-transition windows in which the ceiling is returned as-is
    pub reset_windows: &'static [(u64, u64)],
    /// Manual test-fork height (reset at exactly this tip height)
    pub live_fork_height: Option<u64>,
    /// Skew correction is active above this tip height
    pub skew_activation_height: u64,
    /// Lane imbalance tolerated before the skew divides the multiplier
    pub skew_threshold: u32,
    pub lane_count_fork_time: u64,
    pub curve_upgrade_time: u64,
}

/// Subsidy schedule
#[derive(Debug, Clone)]
pub struct RewardParams {
    pub rewards_fork_time: u64,
    pub transition_end: u64,
    pub pow_base: RewardLadder,
    pub pow_transition_bonus: u64,
    /// Pre-fork staking ladder keyed on the previous block time
    pub pos_legacy: RewardLadder,
    /// Post-fork staking ladder keyed on the previous block time
    pub pos_current: RewardLadder,
    pub pos_transition_bonus: u64,
    pub masternode_base: u64,
    pub devops_base: u64,
    pub devops_transition_bonus: u64,
    pub tier_two_start: u64,
    pub tier_two_bonus: u64,
    /// Reserve payouts apply above this height
    pub reserve_phase_start: u64,
    pub reserve_reward: u64,
    /// Number of reserve payouts the premine is split into
    pub reserve_blocks: u64,
    /// Above this supply blocks only collect fees
    pub money_cap: u64,
    pub halving_interval: u64,
}

/// Masternode payment protocol policy
#[derive(Debug, Clone)]
pub struct PaymentParams {
    /// Accepted winners may trail the best height by this much
    pub window_behind: u64,
    /// ...and lead it by this much
    pub window_ahead: u64,
    /// Minimum number of trailing heights kept by cleanup
    pub min_retained_heights: u64,
    pub min_relay_version: u32,
    /// Network key that signs payment winners
    pub signer_key: Option<PublicKey>,
}

/// Complete consensus parameter set for one network
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub network: Network,
    pub message_start: [u8; 4],
    pub default_port: u16,
    pub pow_limit: U256,
    pub pos_limit: U256,
    pub genesis_time: u64,
    pub genesis_nonce: u64,
    pub retarget: RetargetParams,
    pub rewards: RewardParams,
    pub payments: PaymentParams,
    pub checkpoints: &'static [(u64, Hash)],
    /// Reorganizations may not reach deeper than this below the tip
    pub checkpoint_span: u64,
}

impl ChainParams {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Main => Self::main(),
            Network::Testnet => Self::testnet(),
            Network::Regtest => Self::regtest(),
        }
    }

    pub fn main() -> Self {
        Self {
            network: Network::Main,
            message_start: [0x1a, 0x2a, 0x34, 0x3f],
            default_port: 19427,
            pow_limit: U256::MAX >> 14,
            pos_limit: U256::MAX >> 16,
            genesis_time: 1_589_457_600,
            genesis_nonce: 14018,
            retarget: RetargetParams {
                target_spacing: 120,
                max_spacing: 240,
                scan_depth: 6,
                warmup_blocks: 124,
                reset_windows: FORK_RESET_WINDOWS,
                live_fork_height: None,
                skew_activation_height: 10,
                skew_threshold: 3,
                lane_count_fork_time: LANE_COUNT_FORK_TIME,
                curve_upgrade_time: CURVE_UPGRADE_TIME,
            },
            rewards: RewardParams {
                rewards_fork_time: REWARDS_FORK_TIME,
                transition_end: REWARDS_TRANSITION_END,
                pow_base: RewardLadder::new(POW_BASE_LADDER),
                pow_transition_bonus: 160 * COIN,
                pos_legacy: RewardLadder::new(POS_LEGACY_LADDER),
                pos_current: RewardLadder::new(POS_CURRENT_LADDER),
                pos_transition_bonus: milli_coins(20_800),
                masternode_base: 42 * COIN,
                devops_base: milli_coins(12_500),
                devops_transition_bonus: 16 * COIN,
                tier_two_start: TIER_TWO_START,
                tier_two_bonus: 118 * COIN,
                reserve_phase_start: 1,
                reserve_reward: 80_000_000 * COIN,
                reserve_blocks: 100,
                money_cap: 10_000_000_000 * COIN,
                halving_interval: 500_000,
            },
            payments: PaymentParams {
                window_behind: 10,
                window_ahead: 20,
                min_retained_heights: 1000,
                min_relay_version: MIN_MASTERNODE_RELAY_VERSION,
                signer_key: None,
            },
            checkpoints: MAIN_CHECKPOINTS,
            checkpoint_span: 5000,
        }
    }

    /// Testnet: easier limits, no shipped checkpoints
    pub fn testnet() -> Self {
        let main = Self::main();
        Self {
            network: Network::Testnet,
            message_start: [0xa2, 0xb5, 0x16, 0x98],
            default_port: 20201,
            pow_limit: U256::MAX >> 12,
            pos_limit: U256::MAX >> 14,
            genesis_time: 1_589_457_630,
            genesis_nonce: 8599,
            checkpoints: &[],
            ..main
        }
    }

    /// Regtest: derived from testnet with a near-unbounded PoW limit
    pub fn regtest() -> Self {
        let testnet = Self::testnet();
        Self {
            network: Network::Regtest,
            message_start: [0x54, 0xf5, 0x03, 0x8d],
            default_port: 18787,
            pow_limit: U256::MAX >> 1,
            genesis_time: 1_589_457_690,
            genesis_nonce: 8,
            ..testnet
        }
    }

    /// Difficulty ceiling of a lane
    pub fn limit_for(&self, kind: BlockKind) -> U256 {
        match kind {
            BlockKind::ProofOfWork => self.pow_limit,
            BlockKind::ProofOfStake => self.pos_limit,
        }
    }
}
