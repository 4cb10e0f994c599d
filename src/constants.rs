//! Consensus constants
//!
//! Network-tunable values live in [`crate::config::ConsensusParams`]; the
//! values here are fixed by the encoding and proof formats.

/// Storage proofs challenge one segment of this many bytes
pub const SEGMENT_SIZE: usize = 64;

/// Smallest currency unit per coin: 10^24
pub const COIN_PRECISION: u128 = 1_000_000_000_000_000_000_000_000;

/// Initial block subsidy in whole coins
pub const INITIAL_COINBASE: u128 = 300_000;

/// Subsidy floor in whole coins
pub const MINIMUM_COINBASE: u128 = 30_000;

/// Target seconds between blocks
pub const BLOCK_FREQUENCY: u64 = 600;

/// Number of blocks the difficulty adjustment looks back over
pub const TARGET_WINDOW: u64 = 5_000;

/// Maximum block size in encoded bytes: 1MB
pub const BLOCK_SIZE_LIMIT: usize = 1_000_000;

/// Blocks more than this many seconds ahead of local time are rejected
pub const FUTURE_THRESHOLD: u64 = 3 * 60 * 60;

/// A block may be at most this many seconds older than its parent
pub const PAST_TIMESTAMP_TOLERANCE: u64 = 2 * 60 * 60;

/// Maximum blocks returned by one SendBlocks request
pub const MAX_CATCH_UP_BLOCKS: usize = 100;

/// Maximum blocks held while waiting for their parent
pub const MAX_ORPHAN_BLOCKS: usize = 256;

/// Maximum rejected block ids remembered
pub const MAX_KNOWN_INVALID_BLOCKS: usize = 4096;

/// Maximum transactions held by the pool
pub const TRANSACTION_POOL_SIZE_LIMIT: usize = 10_000;

/// Maximum inputs, outputs, contracts or proofs per transaction
pub const MAX_TRANSACTION_ELEMENTS: usize = 1000;

/// Genesis timestamp: 2015-06-06 14:13:20 UTC
pub const GENESIS_TIMESTAMP: u64 = 1_433_600_000;

/// Root target (minimum difficulty), big-endian
pub const ROOT_TARGET: [u8; 32] = [
    0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Root target for test networks: roughly one in four hashes qualifies
pub const TESTING_ROOT_TARGET: [u8; 32] = [
    0x3f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];
