//! Elastic Cloud Server

pub(crate) mod api;
mod availability_zones;

pub use availability_zones::AvailabilityZonesDataSource;
