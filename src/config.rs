//! Compile-time tunables and the runtime knobs layered on top of them.
//!
//! Four tunables are fixed at compile time. Wiring up the transport and
//! whatever operational knobs a deployment wants is a caller
//! responsibility; [`BlockCacheConfig`] is the shape that boundary would
//! hand this crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size in bytes of one cached block. Fixed by the wire/on-disk format of
/// the device daemons this client talks to.
pub const BLOCK_SIZE: usize = 4096;

/// `dirty_begin` blocks callers while `nr_dirty >= DIRTY_LIMIT`, shedding
/// write load until background writeback drains dirty sets.
pub const DIRTY_LIMIT: usize = 1024;

/// The writeback pipeline starts promoting dirty sets once
/// `nr_dirty - nr_writeback` reaches this threshold, independent of any
/// explicit sync.
pub const WRITEBACK_THRESH: usize = 256;

/// Maximum number of blocks a single dirty set may hold. A merge that
/// would exceed this forces the larger set to writeback before retrying.
pub const SET_LIMIT: usize = 64;

/// Runtime knobs for a [`crate::core::BlockCache`].
///
/// These are independent of the four hard tunables above, which are never
/// overridable — they govern the wire contract with the device daemons,
/// not this process's scheduling preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockCacheConfig {
    /// How often the writeback worker re-checks `should_writeback` even
    /// absent an explicit kick, so a sync request that arrives between
    /// kicks is never stranded.
    #[serde(with = "duration_secs")]
    pub writeback_tick: Duration,

    /// Bound on the "kick" mpsc channels feeding the submit and writeback
    /// workers. A full channel just means the worker hasn't woken up yet;
    /// kicks are idempotent wake-ups, not work items, so a small bound is
    /// fine.
    pub worker_channel_capacity: usize,

    /// The sync error latch is deliberately coarse by default (broadcast
    /// to every current waiter). Tests that want a single sync caller to
    /// observe an error without affecting concurrently-running unrelated
    /// sync calls can set this to `SyncErrorPolicy::None`, at the cost of
    /// silently losing the error.
    pub sync_error_policy: SyncErrorPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncErrorPolicy {
    /// Default: any completion error latches for every current sync
    /// waiter.
    Broadcast,
    /// Test-only: never latch. Errors are still recorded on the block,
    /// just not surfaced through `sync()`.
    None,
}

impl Default for BlockCacheConfig {
    fn default() -> Self {
        Self {
            writeback_tick: Duration::from_millis(250),
            worker_channel_capacity: 64,
            sync_error_policy: SyncErrorPolicy::Broadcast,
        }
    }
}

impl BlockCacheConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).map_err(anyhow::Error::from)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
