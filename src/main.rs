use anyhow::Result;
use provider::HuaweiCloudProvider;
use tf_provider::serve;

mod client;
mod config;
mod credentials;
mod obs;
mod provider;
mod services;
mod utils;
mod wait;

#[tokio::main]
async fn main() -> Result<()> {
    serve("huaweicloud", HuaweiCloudProvider::default()).await
}
