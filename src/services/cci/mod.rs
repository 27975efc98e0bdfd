//! Cloud Container Instance

pub(crate) mod api;
mod pvc;

pub use pvc::PvcResource;
