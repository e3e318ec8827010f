//! In-memory store and scripted node shared by the processor tests.

use crate::entities::{
    AggregateInterval, Balance, BlockInsert, Coin, CoinInsert, CoinUpdate, RewardInsert,
    SlashInsert,
};
use crate::node::NodeApi;
use crate::store::ExtenderStore;
use async_trait::async_trait;
use compact_str::CompactString;
use extender_sdk::address::{remove_address_prefix, with_address_prefix};
use extender_sdk::client::ClientError;
use extender_sdk::objects::{AddressBalances, Block, CoinInfo, Event};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct StoreState {
    next_id: i64,
    pub addresses: BTreeMap<String, i64>,
    pub validators: BTreeMap<String, i64>,
    pub coins: Vec<Coin>,
    pub balances: BTreeMap<(i64, i64), String>,
    pub blocks: BTreeMap<u64, BlockInsert>,
    pub rewards: Vec<RewardInsert>,
    pub slashes: Vec<SlashInsert>,
    /// Summed rewards keyed by (bucket start in unix seconds, address id,
    /// validator id, role).
    pub aggregated_rewards: BTreeMap<(i64, i64, i64, String), u128>,
    pub balance_inserts: usize,
    pub balance_updates: usize,
    pub balance_deletes: usize,
    pub coin_lookups: usize,
    pub fail_balance_reads: bool,
    pub fail_coin_balance_deletes: bool,
    pub fail_coin_lookups: bool,
    pub coin_lookup_delay: Duration,
    pub balance_insert_delay: Duration,
}

impl StoreState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn live_coin(&self, symbol: &str) -> Option<&Coin> {
        self.coins
            .iter()
            .find(|c| c.symbol == symbol && c.deleted_at.is_none())
    }

    pub fn reset_counters(&mut self) {
        self.balance_inserts = 0;
        self.balance_updates = 0;
        self.balance_deletes = 0;
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    pub fn add_address(&self, address: &str) -> i64 {
        let mut state = self.state();
        let address = remove_address_prefix(address).to_string();
        if let Some(id) = state.addresses.get(&address) {
            return *id;
        }
        let id = state.next_id();
        state.addresses.insert(address, id);
        id
    }

    pub fn add_validator(&self, public_key: &str) -> i64 {
        let mut state = self.state();
        let id = state.next_id();
        state.validators.insert(public_key.to_string(), id);
        id
    }

    pub fn add_coin(&self, symbol: &str) -> i64 {
        let mut state = self.state();
        let id = state.next_id();
        state.coins.push(Coin {
            id,
            symbol: CompactString::from(symbol),
            name: symbol.to_string(),
            crr: 100,
            volume: "0".to_string(),
            reserve_balance: "0".to_string(),
            creation_address_id: None,
            deleted_at: None,
        });
        id
    }

    pub fn add_balance(&self, address: &str, symbol: &str, value: &str) {
        let address_id = self.add_address(address);
        let mut state = self.state();
        let coin_id = state
            .live_coin(symbol)
            .map(|c| c.id)
            .expect("coin must be added first");
        state
            .balances
            .insert((address_id, coin_id), value.to_string());
    }

    /// Balances of an address keyed by coin symbol.
    pub fn balances_of(&self, address: &str) -> BTreeMap<String, String> {
        let state = self.state();
        let Some(address_id) = state.addresses.get(remove_address_prefix(address)) else {
            return BTreeMap::new();
        };
        state
            .balances
            .iter()
            .filter(|((a, _), _)| a == address_id)
            .map(|((_, coin_id), value)| {
                let symbol = state
                    .coins
                    .iter()
                    .find(|c| c.id == *coin_id)
                    .map(|c| c.symbol.to_string())
                    .unwrap_or_default();
                (symbol, value.clone())
            })
            .collect()
    }
}

fn failure(what: &str) -> sqlx::Error {
    sqlx::Error::Protocol(format!("injected failure: {what}"))
}

#[async_trait]
impl ExtenderStore for MemoryStore {
    async fn insert_addresses_if_absent(&self, addresses: &[String]) -> Result<u64, sqlx::Error> {
        let mut inserted = 0;
        for address in addresses {
            let mut state = self.state();
            if !state.addresses.contains_key(address) {
                let id = state.next_id();
                state.addresses.insert(address.clone(), id);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn find_address_id(&self, address: &str) -> Result<Option<i64>, sqlx::Error> {
        Ok(self.state().addresses.get(address).copied())
    }

    async fn find_validator_id(&self, public_key: &str) -> Result<Option<i64>, sqlx::Error> {
        Ok(self.state().validators.get(public_key).copied())
    }

    async fn find_balances_by_addresses(
        &self,
        addresses: &[String],
    ) -> Result<Vec<Balance>, sqlx::Error> {
        let state = self.state();
        if state.fail_balance_reads {
            return Err(failure("find_balances_by_addresses"));
        }
        let ids: HashSet<i64> = addresses
            .iter()
            .filter_map(|a| state.addresses.get(a).copied())
            .collect();
        Ok(state
            .balances
            .iter()
            .filter(|((address_id, _), _)| ids.contains(address_id))
            .map(|(&(address_id, coin_id), value)| Balance::new(address_id, coin_id, value.clone()))
            .collect())
    }

    async fn insert_balances(&self, balances: Vec<Balance>) -> Result<u64, sqlx::Error> {
        let delay = self.state().balance_insert_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        let mut inserted = 0;
        for balance in balances {
            if !state.balances.contains_key(&balance.key()) {
                state.balances.insert(balance.key(), balance.value);
                inserted += 1;
            }
        }
        state.balance_inserts += inserted;
        Ok(inserted as u64)
    }

    async fn update_balances(&self, balances: Vec<Balance>) -> Result<u64, sqlx::Error> {
        let mut state = self.state();
        let mut updated = 0;
        for balance in balances {
            if let Some(value) = state.balances.get_mut(&balance.key()) {
                *value = balance.value;
                updated += 1;
            }
        }
        state.balance_updates += updated;
        Ok(updated as u64)
    }

    async fn delete_balances(&self, balances: Vec<Balance>) -> Result<u64, sqlx::Error> {
        let mut state = self.state();
        let mut deleted = 0;
        for balance in balances {
            if state.balances.remove(&balance.key()).is_some() {
                deleted += 1;
            }
        }
        state.balance_deletes += deleted;
        Ok(deleted as u64)
    }

    async fn delete_balances_by_coin(&self, coin_id: i64) -> Result<u64, sqlx::Error> {
        let mut state = self.state();
        if state.fail_coin_balance_deletes {
            return Err(failure("delete_balances_by_coin"));
        }
        let before = state.balances.len();
        state.balances.retain(|(_, c), _| *c != coin_id);
        Ok((before - state.balances.len()) as u64)
    }

    async fn find_coin_id_by_symbol(&self, symbol: &str) -> Result<Option<i64>, sqlx::Error> {
        let delay = {
            let mut state = self.state();
            state.coin_lookups += 1;
            if state.fail_coin_lookups {
                return Err(failure("find_coin_id_by_symbol"));
            }
            state.coin_lookup_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state().live_coin(symbol).map(|c| c.id))
    }

    async fn insert_coins_if_absent(&self, coins: Vec<CoinInsert>) -> Result<u64, sqlx::Error> {
        let mut state = self.state();
        let mut inserted = 0;
        for coin in coins {
            if state.live_coin(&coin.symbol).is_some() {
                continue;
            }
            let id = state.next_id();
            state.coins.push(Coin {
                id,
                symbol: coin.symbol,
                name: coin.name,
                crr: coin.crr,
                volume: coin.volume,
                reserve_balance: coin.reserve_balance,
                creation_address_id: coin.creation_address_id,
                deleted_at: None,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn upsert_coins(&self, coins: Vec<CoinUpdate>) -> Result<u64, sqlx::Error> {
        let mut state = self.state();
        let mut written = 0;
        for update in coins {
            match state.coins.iter_mut().find(|c| c.id == update.id) {
                Some(coin) => {
                    coin.name = update.name;
                    coin.crr = update.crr;
                    coin.volume = update.volume;
                    coin.reserve_balance = update.reserve_balance;
                    coin.deleted_at = None;
                }
                None => state.coins.push(Coin {
                    id: update.id,
                    symbol: update.symbol,
                    name: update.name,
                    crr: update.crr,
                    volume: update.volume,
                    reserve_balance: update.reserve_balance,
                    creation_address_id: None,
                    deleted_at: None,
                }),
            }
            written += 1;
        }
        Ok(written)
    }

    async fn delete_coin_by_symbol(&self, symbol: &str) -> Result<u64, sqlx::Error> {
        let mut state = self.state();
        let now = time::OffsetDateTime::now_utc();
        let now = time::PrimitiveDateTime::new(now.date(), now.time());
        let mut deleted = 0;
        for coin in state
            .coins
            .iter_mut()
            .filter(|c| c.symbol == symbol && c.deleted_at.is_none())
        {
            coin.deleted_at = Some(now);
            deleted += 1;
        }
        Ok(deleted)
    }

    async fn insert_rewards(&self, rewards: Vec<RewardInsert>) -> Result<u64, sqlx::Error> {
        let count = rewards.len() as u64;
        self.state().rewards.extend(rewards);
        Ok(count)
    }

    async fn insert_slashes(&self, slashes: Vec<SlashInsert>) -> Result<u64, sqlx::Error> {
        let count = slashes.len() as u64;
        self.state().slashes.extend(slashes);
        Ok(count)
    }

    async fn save_block(&self, block: BlockInsert) -> Result<u64, sqlx::Error> {
        let mut state = self.state();
        if state.blocks.contains_key(&block.id) {
            return Ok(0);
        }
        state.blocks.insert(block.id, block);
        Ok(1)
    }

    async fn aggregate_rewards(
        &self,
        interval: AggregateInterval,
        before_block_id: u64,
    ) -> Result<u64, sqlx::Error> {
        let width = match interval {
            AggregateInterval::Minute => 60,
            AggregateInterval::Hour => 3_600,
            AggregateInterval::Day => 86_400,
        };
        let mut state = self.state();
        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.rewards)
            .into_iter()
            .partition(|r| r.block_id < before_block_id);
        state.rewards = kept;

        let mut buckets = HashSet::new();
        for reward in moved {
            let created = state
                .blocks
                .get(&reward.block_id)
                .map(|b| b.created_at.unix_timestamp())
                .ok_or_else(|| failure("reward without block row"))?;
            let key = (
                created - created.rem_euclid(width),
                reward.address_id,
                reward.validator_id,
                reward.role,
            );
            let amount: u128 = reward.amount.parse().unwrap_or_default();
            *state.aggregated_rewards.entry(key.clone()).or_default() += amount;
            buckets.insert(key);
        }
        Ok(buckets.len() as u64)
    }
}

#[derive(Debug, Default)]
pub struct NodeState {
    /// Balances keyed by normalized address, then coin symbol.
    pub balances: HashMap<String, BTreeMap<String, String>>,
    pub coins: HashMap<String, CoinInfo>,
    pub blocks: HashMap<u64, Block>,
    pub events: HashMap<u64, Vec<Event>>,
    pub latest_height: u64,
    /// Addresses whose balance query fails outright.
    pub failing_addresses: HashSet<String>,
    /// Answer balance queries with an empty list.
    pub empty_balance_responses: bool,
    pub balance_delay: Duration,
    pub balance_calls: usize,
}

#[derive(Debug, Default)]
pub struct ScriptedNode {
    state: Mutex<NodeState>,
}

impl ScriptedNode {
    pub fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap()
    }

    pub fn set_balance(&self, address: &str, symbol: &str, value: &str) {
        self.state()
            .balances
            .entry(remove_address_prefix(address).to_string())
            .or_default()
            .insert(symbol.to_string(), value.to_string());
    }

    pub fn clear_balances(&self, address: &str) {
        self.state()
            .balances
            .insert(remove_address_prefix(address).to_string(), BTreeMap::new());
    }

    pub fn set_coin(&self, symbol: &str, volume: &str, reserve: &str) {
        self.state().coins.insert(
            symbol.to_string(),
            CoinInfo {
                name: format!("{symbol} coin"),
                symbol: symbol.to_string(),
                volume: volume.to_string(),
                crr: "50".to_string(),
                reserve_balance: reserve.to_string(),
            },
        );
    }
}

#[async_trait]
impl NodeApi for ScriptedNode {
    async fn latest_height(&self) -> Result<u64, ClientError> {
        Ok(self.state().latest_height)
    }

    async fn block(&self, height: u64) -> Result<Block, ClientError> {
        self.state()
            .blocks
            .get(&height)
            .cloned()
            .ok_or(ClientError::Node {
                code: 404,
                message: format!("block {height} not found"),
            })
    }

    async fn events(&self, height: u64) -> Result<Vec<Event>, ClientError> {
        Ok(self.state().events.get(&height).cloned().unwrap_or_default())
    }

    async fn address_balances(
        &self,
        addresses: &[String],
        _height: u64,
    ) -> Result<Vec<AddressBalances>, ClientError> {
        let delay = {
            let mut state = self.state();
            state.balance_calls += 1;
            state.balance_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let state = self.state();
        if let Some(address) = addresses.iter().find(|a| state.failing_addresses.contains(*a)) {
            return Err(ClientError::Node {
                code: 500,
                message: format!("cannot query {address}"),
            });
        }
        if state.empty_balance_responses {
            return Ok(Vec::new());
        }
        Ok(addresses
            .iter()
            .map(|address| AddressBalances {
                address: with_address_prefix(address),
                balance: state.balances.get(address).cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn coin_info(&self, symbol: &str) -> Result<CoinInfo, ClientError> {
        self.state()
            .coins
            .get(symbol)
            .cloned()
            .ok_or(ClientError::Node {
                code: 102,
                message: "Coin not found".to_string(),
            })
    }
}
