//! Virtual Private Cloud: VPCs, subnets and security groups

pub(crate) mod api;
mod secgroups;
mod subnets;
mod vpcs;

pub use secgroups::{SecGroupDataSource, SecGroupResource};
pub use subnets::{SubnetDataSource, SubnetResource};
pub use vpcs::{VpcDataSource, VpcResource};
