use std::time::Duration;

use crate::model::Ms;

pub const MAX_RACKS: usize = 1_000_000;
pub const MAX_BATCH_SIZE: usize = 10_000;
pub const MAX_LABEL_LEN: usize = 256;

/// Longest accepted request line, in bytes.
pub const MAX_LINE_LEN: usize = 8 * 1024 * 1024;

pub const AUDIT_RETRY_INTERVAL: Duration = Duration::from_secs(5);
pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Warehouse local time is UTC+7.
pub const LOCAL_UTC_OFFSET_MS: Ms = 7 * HOUR_MS;
