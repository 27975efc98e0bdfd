//! Object Storage Service

mod bucket;
mod bucket_blocks;

pub use bucket::BucketResource;
