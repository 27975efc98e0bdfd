//! Compute v2.1 requests: availability zones

use serde::Deserialize;

use crate::client::{Result, ServiceClient};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ZoneState {
    pub available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AvailabilityZone {
    pub zone_name: String,
    pub zone_state: ZoneState,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AvailabilityZoneList {
    availability_zone_info: Vec<AvailabilityZone>,
}

pub async fn list_availability_zones(client: &ServiceClient) -> Result<Vec<AvailabilityZone>> {
    let list: Option<AvailabilityZoneList> = client.get(&client.service_url(&["os-availability-zone"])).await?;
    Ok(list.unwrap_or_default().availability_zone_info)
}
