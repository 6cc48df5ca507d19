use std::sync::LazyLock;
use ustore_o11y::metrics::{IntCounter, try_create_int_counter};

pub(crate) static CHUNKS_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    try_create_int_counter("ustore_chunks_written_total", "Chunks persisted to the chunk store")
        .unwrap()
});

pub(crate) static CHUNK_BYTES_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    try_create_int_counter(
        "ustore_chunk_bytes_written_total",
        "Bytes of chunk records persisted to the chunk store",
    )
    .unwrap()
});

pub(crate) static CHUNKS_LOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    try_create_int_counter(
        "ustore_chunks_loaded_total",
        "Chunk loads that missed the per-operation cache",
    )
    .unwrap()
});
