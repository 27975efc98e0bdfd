//! Resources and data sources, grouped by cloud service

pub mod cci;
pub mod ecs;
pub mod iam;
pub mod obs;
pub(crate) mod tags;
pub mod vpc;
