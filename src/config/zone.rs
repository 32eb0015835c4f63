//! Per-zone configuration (`DOMAINS__<i>__*` env vars).

use std::collections::BTreeMap;

use super::{ConfigError, EnvLayer};

/// A single managed DNS zone (spec §3 "Zone spec").
#[derive(Debug, Clone)]
pub struct ZoneSpec {
    pub name: String,
    pub zone_id: String,
    pub proxied: bool,
    pub ttl: u32,
    pub target: String,
    pub comment: Option<String>,
    pub excluded_subdomains: Vec<String>,
}

impl ZoneSpec {
    pub fn validate(&self) -> Result<(), String> {
        if self.ttl < 1 {
            return Err("ttl must be >= 1".into());
        }
        if self.target.is_empty() {
            return Err("target must not be empty".into());
        }
        if self.zone_id.is_empty() {
            return Err("zone_id must not be empty".into());
        }
        Ok(())
    }
}

/// Scans `DOMAINS__<i>__<FIELD>` keys, groups them by index, and builds
/// one [`ZoneSpec`] per group. Indices need not be contiguous; they are
/// only used to group fields belonging to the same zone and are sorted
/// numerically before assembly so `DOMAINS__0__*`/`DOMAINS__1__*` land in
/// a stable, predictable order.
pub(super) fn load_zones(
    env: &EnvLayer,
    default_ttl: u32,
    default_target: &str,
) -> Result<Vec<ZoneSpec>, ConfigError> {
    const PREFIX: &str = "DOMAINS__";

    let mut by_index: BTreeMap<u32, BTreeMap<String, String>> = BTreeMap::new();
    for key in env.all_keys_with_prefix(PREFIX) {
        let rest = &key[PREFIX.len()..];
        let Some((idx_str, field)) = rest.split_once("__") else {
            continue;
        };
        let Ok(idx) = idx_str.parse::<u32>() else {
            continue;
        };
        if let Some(value) = env.get(&key) {
            by_index
                .entry(idx)
                .or_default()
                .insert(field.to_uppercase(), value);
        }
    }

    let mut zones = Vec::with_capacity(by_index.len());
    for (idx, fields) in by_index {
        let name = fields
            .get("NAME")
            .cloned()
            .ok_or_else(|| ConfigError::Invalid {
                field: format!("DOMAINS__{}__NAME", idx),
                value: String::new(),
                reason: "zone entry is missing a name".into(),
            })?;
        let zone_id = fields.get("ZONE_ID").cloned().unwrap_or_default();
        let proxied = fields
            .get("PROXIED")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(true);
        let ttl = fields
            .get("TTL")
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| ConfigError::Invalid {
                field: format!("DOMAINS__{}__TTL", idx),
                value: fields.get("TTL").cloned().unwrap_or_default(),
                reason: e.to_string(),
            })?
            .unwrap_or(default_ttl);
        let target = fields
            .get("TARGET_DOMAIN")
            .cloned()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default_target.to_string());
        let comment = fields.get("COMMENT").cloned();
        let excluded_subdomains = fields
            .get("EXCLUDED_SUB_DOMAINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        zones.push(ZoneSpec {
            name,
            zone_id,
            proxied,
            ttl,
            target,
            comment,
            excluded_subdomains,
        });
    }

    Ok(zones)
}
