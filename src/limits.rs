/// Rows fetched by the suggestion scan before sorting.
pub const SUGGESTION_SCAN_CAP: usize = 100;

pub const MAX_CLIENT_NAME_LEN: usize = 256;

/// Per date record, across both tiers.
pub const MAX_SLOTS_PER_DAY: usize = 1_440;

pub const MAX_DATE_RECORDS: usize = 100_000;

pub const MAX_APPOINTMENTS: usize = 1_000_000;

/// Stale appointments retried per reconciliation pass.
pub const MAX_RECONCILE_BATCH: usize = 500;
