//! Identity and Access Management

mod agency;
pub(crate) mod api;

pub use agency::AgencyResource;
