use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

/// Unix epoch; earlier instants are rejected.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Longest single reservation item.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * DAY_MS;
/// Widest ledger / availability query.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

pub const MAX_ITEMS_PER_RESERVATION: usize = 64;
pub const MAX_EQUIPMENT_QUANTITY: u32 = 100_000;
pub const MAX_RESOURCES: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PURPOSE_LEN: usize = 1024;
pub const MAX_COMMENT_LEN: usize = 2048;
