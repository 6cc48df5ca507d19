use std::sync::LazyLock;
use ustore_o11y::metrics::{
    IntCounter, IntCounterVec, try_create_int_counter, try_create_int_counter_vec,
};

pub(crate) static OPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    try_create_int_counter_vec(
        "ustore_worker_ops_total",
        "Worker operations served, by operation",
        &["op"],
    )
    .unwrap()
});

pub(crate) static MERGE_CONFLICTS: LazyLock<IntCounter> = LazyLock::new(|| {
    try_create_int_counter(
        "ustore_worker_merge_conflicts_total",
        "Merges that could not be auto-resolved",
    )
    .unwrap()
});

pub(crate) static LOG_RECORDS: LazyLock<IntCounter> = LazyLock::new(|| {
    try_create_int_counter(
        "ustore_recovery_log_records_total",
        "Records appended to the recovery log",
    )
    .unwrap()
});

pub(crate) static LOG_FLUSHES: LazyLock<IntCounter> = LazyLock::new(|| {
    try_create_int_counter(
        "ustore_recovery_log_flushes_total",
        "Buffer flushes of the recovery log",
    )
    .unwrap()
});
