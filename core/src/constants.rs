//! Tuning constants from spec §6 ("Environment / compile-time knobs").
//!
//! The teacher's reactor runtime wires comparable knobs through `Config`
//! builders rather than environment variables; these are the defaults an
//! `rti::Config`/`client::Config` starts from and may override.

use std::time::Duration;

/// First port the RTI sweeps from when no specific port was requested.
pub const STARTING_PORT: u16 = 15045;

/// Number of ports the RTI will try above `STARTING_PORT` before giving up.
pub const PORT_RANGE_LIMIT: u16 = 1024;

/// Default timeout for a single read/write on the RTI<->federate TCP socket.
pub const TCP_TIMEOUT_TIME: Duration = Duration::from_secs(10);

/// Default timeout for a single read/write on the clock-sync UDP socket.
pub const UDP_TIMEOUT_TIME: Duration = Duration::from_millis(500);

/// Maximum payload size forwarded per chunk by the message relay (C4).
pub const FED_COM_BUFFER_SIZE: usize = 1 << 16;

/// Number of times a federate retries connecting to the RTI before giving up.
pub const CONNECT_NUM_RETRIES: u32 = 10;

/// Delay between federate connection retries.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Offset added to the maximum proposed start time before broadcasting it.
pub const DELAY_START: Duration = Duration::from_secs(1);

/// Period between rounds of the background clock-sync loop (C6).
pub const CLOCK_SYNCHRONIZATION_T1_PERIOD_NS: u64 = 10_000_000_000;

/// Number of T1/T3/T4 round-trips run per clock-sync attempt.
pub const CLOCK_SYNCHRONIZATION_T4_MESSAGES_PER_INTERVAL: usize = 10;

/// Number of out-of-order/discarded exchanges tolerated before a clock-sync
/// round is abandoned for a given federate.
pub const CLOCK_SYNC_MAX_DISCARDED_MESSAGES: usize = 5;

/// Maximum encodable length, in bytes, of a federation id string (§3, u8 length prefix).
pub const MAX_FEDERATION_ID_LEN: usize = 255;
