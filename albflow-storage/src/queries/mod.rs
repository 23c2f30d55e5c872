pub mod batches;
pub mod filter_sql;
pub mod log_entries;
pub mod summaries;
