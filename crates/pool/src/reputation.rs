// This file is part of Rundler.
//
// Rundler is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Rundler is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Rundler.
// If not, see https://www.gnu.org/licenses/.

use std::collections::{HashMap, HashSet};

use aa_bundler_types::{
    Entity, MempoolError, MempoolResult, Reputation, ReputationEntry, ReputationStatus, StakeInfo,
};
use alloy_primitives::{Address, U256};
use metrics::Counter;
use metrics_derive::Metrics;
use parking_lot::RwLock;

/// Added to `ops_seen` of an entity blamed for a reverted bundle
pub const CRASHED_HANDLE_OPS_PENALTY: u64 = 10_000;

/// Mempool allowance of an entity that has never been seen
const SAME_UNSTAKED_ENTITY_MEMPOOL_COUNT: usize = 10;
/// Factor applied to an entity's inclusion rate when computing its allowance
const INCLUSION_RATE_FACTOR: u64 = 10;
/// Cap on the allowance an entity earns from its included ops
const THROTTLED_ENTITY_BUNDLE_INCLUDED_CAP: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Thresholds classifying an address from its seen and included counters
pub struct ReputationParams {
    min_inclusion_rate_denominator: u64,
    throttling_slack: u64,
    ban_slack: u64,
}

impl ReputationParams {
    /// Creates a new set of parameters
    pub fn new(min_inclusion_rate_denominator: u64, throttling_slack: u64, ban_slack: u64) -> Self {
        Self {
            min_inclusion_rate_denominator,
            throttling_slack,
            ban_slack,
        }
    }

    /// Parameters used by a bundler for the entities it serves
    pub fn bundler_default() -> Self {
        Self::new(10, 10, 50)
    }

    /// Stricter parameters for ordinary unstaked entities
    pub fn non_bundler_default() -> Self {
        Self::new(100, 10, 10)
    }
}

#[derive(Metrics)]
#[metrics(scope = "reputation")]
struct ReputationMetrics {
    #[metric(describe = "the count of entities penalized for a reverted bundle.")]
    crash_penalties: Counter,
    #[metric(describe = "the count of decay passes over the reputation table.")]
    decay_passes: Counter,
}

/// Tracks how often each address is seen in submitted operations versus
/// included on chain, and classifies it as ok, throttled or banned.
///
/// Interior mutability is used so the tracker can be shared between the
/// mempool, the event watcher and the bundler.
pub struct ReputationTracker {
    reputation: RwLock<AddressReputation>,
    min_stake_value: U256,
    min_unstake_delay: u32,
    metrics: ReputationMetrics,
}

impl ReputationTracker {
    /// Creates a tracker. Entities exceeding their mempool allowance must hold
    /// `min_stake_value` with at least `min_unstake_delay` seconds of delay.
    pub fn new(params: ReputationParams, min_stake_value: U256, min_unstake_delay: u32) -> Self {
        Self {
            reputation: RwLock::new(AddressReputation::new(params)),
            min_stake_value,
            min_unstake_delay,
            metrics: ReputationMetrics::default(),
        }
    }

    /// Current status of an address
    pub fn status(&self, address: Address) -> ReputationStatus {
        self.reputation.read().status(address)
    }

    /// Counts an operation referencing `address`
    pub fn update_seen_status(&self, address: Address) {
        self.reputation.write().add_seen(address);
    }

    /// Counts an operation referencing `address` that was mined
    pub fn update_included_status(&self, address: Address) {
        self.reputation.write().add_included(address);
    }

    /// Penalizes an entity whose operation reverted a bundle
    pub fn crashed_handle_ops(&self, address: Address) {
        let mut reputation = self.reputation.write();
        let count = reputation.counts.entry(address).or_default();
        count.ops_seen = count.ops_seen.saturating_add(CRASHED_HANDLE_OPS_PENALTY);
        count.ops_included = 0;
        self.metrics.crash_penalties.increment(1);
    }

    /// Decays every counter by 1/24, forgetting addresses that reach zero
    pub fn hourly_cron(&self) {
        self.reputation.write().hourly_update();
        self.metrics.decay_passes.increment(1);
    }

    /// Exempts addresses from throttling and banning
    pub fn add_whitelist(&self, addresses: impl IntoIterator<Item = Address>) {
        self.reputation.write().allowlist.extend(addresses);
    }

    /// Bans addresses regardless of their counters
    pub fn add_blacklist(&self, addresses: impl IntoIterator<Item = Address>) {
        self.reputation.write().blocklist.extend(addresses);
    }

    /// True if the address is exempt from reputation checks
    pub fn is_whitelisted(&self, address: Address) -> bool {
        self.reputation.read().allowlist.contains(&address)
    }

    /// Overwrites the counters of the given addresses
    pub fn set_reputation(&self, entries: impl IntoIterator<Item = ReputationEntry>) {
        let mut reputation = self.reputation.write();
        for entry in entries {
            reputation.set_reputation(entry.address, entry.ops_seen, entry.ops_included);
        }
    }

    /// Counters and status of every tracked address
    pub fn dump(&self) -> Vec<Reputation> {
        let reputation = self.reputation.read();
        let mut dump = reputation
            .counts
            .iter()
            .map(|(address, count)| Reputation {
                address: *address,
                ops_seen: count.ops_seen,
                ops_included: count.ops_included,
                status: reputation.status(*address),
            })
            .collect::<Vec<_>>();
        dump.sort_by_key(|r| r.address);
        dump
    }

    /// Forgets all counters. Allow and block lists are kept.
    pub fn clear_state(&self) {
        self.reputation.write().counts.clear();
    }

    /// Number of pool entries an unstaked entity may have before its stake
    /// is checked. Grows with the entity's inclusion record.
    pub fn calculate_max_allowed_mempool_ops_unstaked(&self, address: Address) -> usize {
        let reputation = self.reputation.read();
        let Some(count) = reputation.counts.get(&address) else {
            return SAME_UNSTAKED_ENTITY_MEMPOOL_COUNT;
        };
        let inclusion_bonus = count
            .ops_included
            .saturating_mul(INCLUSION_RATE_FACTOR)
            .checked_div(count.ops_seen)
            .unwrap_or(0);
        let included_bonus = count.ops_included.min(THROTTLED_ENTITY_BUNDLE_INCLUDED_CAP);
        let bonus = usize::try_from(inclusion_bonus.saturating_add(included_bonus))
            .unwrap_or(usize::MAX);
        SAME_UNSTAKED_ENTITY_MEMPOOL_COUNT.saturating_add(bonus)
    }

    /// Fails if the entity is banned
    pub fn check_banned(&self, entity: Entity) -> MempoolResult<()> {
        self.check_status(entity, ReputationStatus::Banned)
    }

    /// Fails if the entity is throttled
    pub fn check_throttled(&self, entity: Entity) -> MempoolResult<()> {
        self.check_status(entity, ReputationStatus::Throttled)
    }

    /// Requires a non-whitelisted entity to be unbanned and staked
    pub fn check_stake(&self, entity: Entity, info: &StakeInfo) -> MempoolResult<()> {
        if entity.address.is_zero() || self.is_whitelisted(entity.address) {
            return Ok(());
        }
        self.check_banned(entity)?;
        if info.stake < self.min_stake_value {
            let detail = if info.stake.is_zero() {
                "is unstaked".to_string()
            } else {
                format!(
                    "stake {} is too low (min={})",
                    info.stake, self.min_stake_value
                )
            };
            return Err(MempoolError::InsufficientStake(format!("{entity} {detail}")));
        }
        if info.unstake_delay_sec < self.min_unstake_delay {
            return Err(MempoolError::InsufficientStake(format!(
                "{entity} unstake delay {} is too low (min={})",
                info.unstake_delay_sec, self.min_unstake_delay
            )));
        }
        Ok(())
    }

    fn check_status(&self, entity: Entity, rejected: ReputationStatus) -> MempoolResult<()> {
        if self.status(entity.address) == rejected {
            return Err(MempoolError::Reputation {
                entity,
                status: rejected,
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
struct AddressReputation {
    // Addresses that are always banned
    blocklist: HashSet<Address>,
    // Addresses that are always exempt from throttling and banning
    allowlist: HashSet<Address>,
    counts: HashMap<Address, AddressCount>,
    params: ReputationParams,
}

impl AddressReputation {
    fn new(params: ReputationParams) -> Self {
        Self {
            blocklist: HashSet::new(),
            allowlist: HashSet::new(),
            counts: HashMap::new(),
            params,
        }
    }

    fn status(&self, address: Address) -> ReputationStatus {
        if self.allowlist.contains(&address) {
            return ReputationStatus::Ok;
        } else if self.blocklist.contains(&address) {
            return ReputationStatus::Banned;
        }

        let count = match self.counts.get(&address) {
            Some(count) => count,
            None => return ReputationStatus::Ok,
        };

        let min_expected_included = count.ops_seen / self.params.min_inclusion_rate_denominator;
        let throttle_bound = count.ops_included.saturating_add(self.params.throttling_slack);
        let ban_bound = count.ops_included.saturating_add(self.params.ban_slack);
        if min_expected_included <= throttle_bound {
            ReputationStatus::Ok
        } else if min_expected_included <= ban_bound {
            ReputationStatus::Throttled
        } else {
            ReputationStatus::Banned
        }
    }

    fn add_seen(&mut self, address: Address) {
        let count = self.counts.entry(address).or_default();
        count.ops_seen = count.ops_seen.saturating_add(1);
    }

    fn add_included(&mut self, address: Address) {
        let count = self.counts.entry(address).or_default();
        count.ops_included = count.ops_included.saturating_add(1);
    }

    fn set_reputation(&mut self, address: Address, ops_seen: u64, ops_included: u64) {
        let count = self.counts.entry(address).or_default();
        count.ops_seen = ops_seen;
        count.ops_included = ops_included;
    }

    fn hourly_update(&mut self) {
        for count in self.counts.values_mut() {
            count.ops_seen = decay(count.ops_seen);
            count.ops_included = decay(count.ops_included);
        }
        self.counts
            .retain(|_, count| count.ops_seen > 0 || count.ops_included > 0);
    }
}

// floor(value * 23 / 24) without the intermediate product
fn decay(value: u64) -> u64 {
    value - value.div_ceil(24)
}

#[derive(Debug, Default, Clone)]
struct AddressCount {
    ops_seen: u64,
    ops_included: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(params: ReputationParams) -> ReputationTracker {
        ReputationTracker::new(params, U256::from(100), 10)
    }

    fn counts(tracker: &ReputationTracker, addr: Address) -> Option<(u64, u64)> {
        tracker
            .reputation
            .read()
            .counts
            .get(&addr)
            .map(|c| (c.ops_seen, c.ops_included))
    }

    #[test]
    fn seen_included() {
        let addr = Address::repeat_byte(1);
        let reputation = tracker(ReputationParams::bundler_default());

        for _ in 0..1000 {
            reputation.update_seen_status(addr);
            reputation.update_included_status(addr);
        }
        assert_eq!(counts(&reputation, addr), Some((1000, 1000)));
    }

    #[test]
    fn unknown_address_is_ok() {
        let reputation = tracker(ReputationParams::bundler_default());
        assert_eq!(
            reputation.status(Address::repeat_byte(1)),
            ReputationStatus::Ok
        );
    }

    #[test]
    fn reputation_throttled() {
        let addr = Address::repeat_byte(1);
        let params = ReputationParams::bundler_default();
        let reputation = tracker(params);

        let ops_seen = 1000;
        let ops_included =
            ops_seen / params.min_inclusion_rate_denominator - params.throttling_slack - 1;
        reputation.set_reputation([ReputationEntry {
            address: addr,
            ops_seen,
            ops_included,
        }]);
        assert_eq!(reputation.status(addr), ReputationStatus::Throttled);
    }

    #[test]
    fn reputation_throttled_edge() {
        let addr = Address::repeat_byte(1);
        let params = ReputationParams::bundler_default();
        let reputation = tracker(params);

        let ops_seen = 1000;
        let ops_included =
            ops_seen / params.min_inclusion_rate_denominator - params.throttling_slack;
        reputation.set_reputation([ReputationEntry {
            address: addr,
            ops_seen,
            ops_included,
        }]);
        assert_eq!(reputation.status(addr), ReputationStatus::Ok);
    }

    #[test]
    fn reputation_banned() {
        let addr = Address::repeat_byte(1);
        let params = ReputationParams::bundler_default();
        let reputation = tracker(params);

        let ops_seen = 1000;
        let ops_included = ops_seen / params.min_inclusion_rate_denominator - params.ban_slack - 1;
        reputation.set_reputation([ReputationEntry {
            address: addr,
            ops_seen,
            ops_included,
        }]);
        assert_eq!(reputation.status(addr), ReputationStatus::Banned);
    }

    #[test]
    fn non_bundler_boundaries() {
        let addr = Address::repeat_byte(1);
        let reputation = tracker(ReputationParams::non_bundler_default());

        reputation.set_reputation([ReputationEntry {
            address: addr,
            ops_seen: 1000,
            ops_included: 0,
        }]);
        assert_eq!(reputation.status(addr), ReputationStatus::Ok);

        reputation.set_reputation([ReputationEntry {
            address: addr,
            ops_seen: 2200,
            ops_included: 0,
        }]);
        assert_eq!(reputation.status(addr), ReputationStatus::Banned);
    }

    #[test]
    fn hourly_update() {
        let addr = Address::repeat_byte(1);
        let reputation = tracker(ReputationParams::bundler_default());

        for _ in 0..1000 {
            reputation.update_seen_status(addr);
            reputation.update_included_status(addr);
        }

        reputation.hourly_cron();
        assert_eq!(counts(&reputation, addr), Some((958, 958)));
    }

    #[test]
    fn hourly_update_never_increases_and_forgets_zero() {
        let (a, b) = (Address::repeat_byte(1), Address::repeat_byte(2));
        let reputation = tracker(ReputationParams::bundler_default());
        reputation.set_reputation([
            ReputationEntry {
                address: a,
                ops_seen: 1,
                ops_included: 1,
            },
            ReputationEntry {
                address: b,
                ops_seen: 25,
                ops_included: 0,
            },
        ]);

        reputation.hourly_cron();
        assert_eq!(counts(&reputation, a), None);
        assert_eq!(counts(&reputation, b), Some((23, 0)));
    }

    #[test]
    fn crash_penalty() {
        let addr = Address::repeat_byte(1);
        let reputation = tracker(ReputationParams::bundler_default());
        reputation.set_reputation([ReputationEntry {
            address: addr,
            ops_seen: 7,
            ops_included: 5,
        }]);

        reputation.crashed_handle_ops(addr);
        assert_eq!(
            counts(&reputation, addr),
            Some((7 + CRASHED_HANDLE_OPS_PENALTY, 0))
        );
        assert_eq!(reputation.status(addr), ReputationStatus::Banned);
    }

    #[test]
    fn test_blocklist() {
        let addr = Address::repeat_byte(1);
        let reputation = tracker(ReputationParams::bundler_default());
        reputation.add_blacklist([addr]);

        assert_eq!(reputation.status(addr), ReputationStatus::Banned);
        assert_eq!(
            reputation.status(Address::repeat_byte(2)),
            ReputationStatus::Ok
        );
    }

    #[test]
    fn test_allowlist() {
        let addr = Address::repeat_byte(1);
        let reputation = tracker(ReputationParams::bundler_default());
        reputation.add_whitelist([addr]);
        reputation.add_blacklist([addr]);
        reputation.set_reputation([ReputationEntry {
            address: addr,
            ops_seen: 1_000_000,
            ops_included: 0,
        }]);

        assert_eq!(reputation.status(addr), ReputationStatus::Ok);
        reputation
            .check_stake(Entity::paymaster(addr), &StakeInfo::default())
            .unwrap();
    }

    #[test]
    fn max_allowed_ops() {
        let addr = Address::repeat_byte(1);
        let reputation = tracker(ReputationParams::bundler_default());
        assert_eq!(reputation.calculate_max_allowed_mempool_ops_unstaked(addr), 10);

        reputation.set_reputation([ReputationEntry {
            address: addr,
            ops_seen: 0,
            ops_included: 0,
        }]);
        assert_eq!(reputation.calculate_max_allowed_mempool_ops_unstaked(addr), 10);

        reputation.set_reputation([ReputationEntry {
            address: addr,
            ops_seen: 20,
            ops_included: 10,
        }]);
        assert_eq!(
            reputation.calculate_max_allowed_mempool_ops_unstaked(addr),
            10 + 5 + 10
        );
    }

    #[test]
    fn check_status_errors_carry_entity() {
        let addr = Address::repeat_byte(1);
        let reputation = tracker(ReputationParams::bundler_default());
        reputation.set_reputation([ReputationEntry {
            address: addr,
            ops_seen: 1000,
            ops_included: 50,
        }]);

        let entity = Entity::factory(addr);
        reputation.check_banned(entity).unwrap();
        match reputation.check_throttled(entity) {
            Err(MempoolError::Reputation { entity: e, status }) => {
                assert_eq!(e, entity);
                assert_eq!(status, ReputationStatus::Throttled);
            }
            r => panic!("unexpected {r:?}"),
        }
    }

    #[test]
    fn stake_checks() {
        let addr = Address::repeat_byte(1);
        let reputation = tracker(ReputationParams::bundler_default());
        let entity = Entity::paymaster(addr);

        let staked = StakeInfo {
            address: addr,
            stake: U256::from(100),
            unstake_delay_sec: 10,
        };
        reputation.check_stake(entity, &staked).unwrap();

        let unstaked = StakeInfo {
            stake: U256::ZERO,
            ..staked
        };
        let err = reputation.check_stake(entity, &unstaked).unwrap_err();
        assert!(matches!(err, MempoolError::InsufficientStake(_)));
        assert!(err.to_string().ends_with("is unstaked"));

        let short_delay = StakeInfo {
            unstake_delay_sec: 9,
            ..staked
        };
        assert!(matches!(
            reputation.check_stake(entity, &short_delay),
            Err(MempoolError::InsufficientStake(_))
        ));

        reputation.add_blacklist([addr]);
        assert!(matches!(
            reputation.check_stake(entity, &staked),
            Err(MempoolError::Reputation { .. })
        ));
    }

    #[test]
    fn dump_and_clear() {
        let reputation = tracker(ReputationParams::bundler_default());
        reputation.update_seen_status(Address::repeat_byte(2));
        reputation.update_seen_status(Address::repeat_byte(1));

        let dump = reputation.dump();
        assert_eq!(dump.len(), 2);
        assert_eq!(dump[0].address, Address::repeat_byte(1));
        assert_eq!(dump[0].ops_seen, 1);
        assert_eq!(dump[0].status, ReputationStatus::Ok);

        reputation.clear_state();
        assert!(reputation.dump().is_empty());
    }

    #[test]
    fn saturated_counters_are_handled() {
        let reputation = tracker(ReputationParams::bundler_default());
        let trusted = Address::repeat_byte(1);
        let abusive = Address::repeat_byte(2);
        reputation.set_reputation([
            ReputationEntry {
                address: trusted,
                ops_seen: u64::MAX,
                ops_included: u64::MAX,
            },
            ReputationEntry {
                address: abusive,
                ops_seen: u64::MAX,
                ops_included: 0,
            },
        ]);

        assert_eq!(reputation.status(trusted), ReputationStatus::Ok);
        assert_eq!(reputation.status(abusive), ReputationStatus::Banned);
        assert!(reputation.calculate_max_allowed_mempool_ops_unstaked(trusted) > 0);

        reputation.update_included_status(trusted);
        reputation.update_seen_status(abusive);
        assert_eq!(counts(&reputation, trusted), Some((u64::MAX, u64::MAX)));

        reputation.hourly_cron();
        let decayed = u64::MAX - u64::MAX.div_ceil(24);
        assert_eq!(counts(&reputation, trusted), Some((decayed, decayed)));
        assert_eq!(counts(&reputation, abusive), Some((decayed, 0)));
    }

    #[test]
    fn decay_rounds_down() {
        assert_eq!(decay(48), 46);
        assert_eq!(decay(24), 23);
        assert_eq!(decay(25), 23);
        assert_eq!(decay(1), 0);
        assert_eq!(decay(0), 0);
    }
}
