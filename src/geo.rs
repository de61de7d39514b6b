use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::config::PairwiseConfig;
use crate::errors::AuthError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoInfo {
    pub asn: u32,
    pub country: String,
    pub region: String,
    pub org: String,
}

impl Default for GeoInfo {
    fn default() -> Self {
        GeoInfo {
            asn: 0,
            country: "Unknown".to_string(),
            region: "Unknown".to_string(),
            org: "Unknown".to_string(),
        }
    }
}

/// Injected capability mapping a source address to network ownership data.
/// Implementations may block; callers bound the lookup with a timeout and
/// degrade to `GeoInfo::default()` on any failure.
pub trait GeoResolver: Send + Sync {
    fn lookup(&self, ip: &str) -> Result<GeoInfo, AuthError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoPrefix {
    pub prefix: String,
    pub info: GeoInfo,
}

/// Table-backed resolver. Loopback, private and unspecified addresses resolve
/// deterministically without consulting the table; everything else matches on
/// the longest configured prefix.
pub struct StaticGeoResolver {
    prefixes: Vec<GeoPrefix>,
    local_override: Option<GeoInfo>,
}

impl StaticGeoResolver {
    pub fn new(prefixes: Vec<GeoPrefix>) -> Self {
        StaticGeoResolver {
            prefixes,
            local_override: None,
        }
    }

    pub fn from_config(pairwise: &PairwiseConfig) -> Self {
        StaticGeoResolver {
            prefixes: Vec::new(),
            local_override: pairwise
                .geo_override_for_local
                .as_deref()
                .and_then(parse_local_override),
        }
    }

    pub fn with_local_override(mut self, info: GeoInfo) -> Self {
        self.local_override = Some(info);
        self
    }

    fn is_local(ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                v4.is_loopback() || v4.is_private() || v4.is_unspecified() || v4.is_link_local()
            }
            IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
        }
    }
}

impl GeoResolver for StaticGeoResolver {
    fn lookup(&self, ip: &str) -> Result<GeoInfo, AuthError> {
        let addr: IpAddr = ip
            .parse()
            .map_err(|_| AuthError::GeoUnavailable(format!("unparseable address {}", ip)))?;

        if Self::is_local(addr) {
            if let Some(info) = &self.local_override {
                return Ok(info.clone());
            }
            return Ok(GeoInfo {
                org: "Private".to_string(),
                ..GeoInfo::default()
            });
        }

        self.prefixes
            .iter()
            .filter(|entry| ip.starts_with(&entry.prefix))
            .max_by_key(|entry| entry.prefix.len())
            .map(|entry| entry.info.clone())
            .ok_or_else(|| AuthError::GeoUnavailable(format!("no route data for {}", ip)))
    }
}

/// Parse `asn,region` into a local-range override.
fn parse_local_override(raw: &str) -> Option<GeoInfo> {
    let (asn, region) = raw.split_once(',')?;
    let asn: u32 = asn.trim().parse().ok()?;
    Some(GeoInfo {
        asn,
        region: region.trim().to_string(),
        ..GeoInfo::default()
    })
}
