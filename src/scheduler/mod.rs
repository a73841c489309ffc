//! The DAG Scheduler (C9, §4.9): ready-set admission, concurrency and
//! file-boundary gating, and tier selection.

pub mod admission;
pub mod tiers;
