//! Cloud provider catalog: advertised regions and instance-size availability.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Provider {
    Aws,
    Gcp,
    Azure,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Aws, Provider::Gcp, Provider::Azure];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "AWS",
            Provider::Gcp => "GCP",
            Provider::Azure => "AZURE",
        }
    }

    /// Regions Atlas advertises for the provider, in Atlas naming.
    pub fn regions(&self) -> &'static [&'static str] {
        match self {
            Provider::Aws => AWS_REGIONS,
            Provider::Gcp => GCP_REGIONS,
            Provider::Azure => AZURE_REGIONS,
        }
    }

    pub fn has_region(&self, region: &str) -> bool {
        let region = normalize_region(region);
        self.regions().contains(&region.as_str())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AWS" => Ok(Provider::Aws),
            "GCP" => Ok(Provider::Gcp),
            "AZURE" => Ok(Provider::Azure),
            other => Err(format!("unknown provider '{other}' (expected AWS, GCP or AZURE)")),
        }
    }
}

/// Atlas region names are upper snake case; manifests often use the cloud
/// spelling (`us-east-1`).
pub fn normalize_region(region: &str) -> String {
    region.trim().to_ascii_uppercase().replace('-', "_")
}

const AWS_REGIONS: &[&str] = &[
    "US_EAST_1",
    "US_EAST_2",
    "US_WEST_1",
    "US_WEST_2",
    "CA_CENTRAL_1",
    "SA_EAST_1",
    "EU_WEST_1",
    "EU_WEST_2",
    "EU_WEST_3",
    "EU_CENTRAL_1",
    "EU_NORTH_1",
    "EU_SOUTH_1",
    "AP_SOUTHEAST_1",
    "AP_SOUTHEAST_2",
    "AP_NORTHEAST_1",
    "AP_NORTHEAST_2",
    "AP_SOUTH_1",
    "ME_SOUTH_1",
    "AF_SOUTH_1",
];

const GCP_REGIONS: &[&str] = &[
    "CENTRAL_US",
    "EASTERN_US",
    "US_EAST_4",
    "WESTERN_US",
    "US_WEST_2",
    "NORTH_AMERICA_NORTHEAST_1",
    "SOUTH_AMERICA_EAST_1",
    "WESTERN_EUROPE",
    "EUROPE_WEST_2",
    "EUROPE_WEST_3",
    "EUROPE_NORTH_1",
    "EASTERN_ASIA_PACIFIC",
    "NORTHEASTERN_ASIA_PACIFIC",
    "SOUTHEASTERN_ASIA_PACIFIC",
    "ASIA_EAST_2",
    "ASIA_SOUTH_1",
    "AUSTRALIA_SOUTHEAST_1",
];

const AZURE_REGIONS: &[&str] = &[
    "US_EAST",
    "US_EAST_2",
    "US_CENTRAL",
    "US_NORTH_CENTRAL",
    "US_SOUTH_CENTRAL",
    "US_WEST",
    "US_WEST_2",
    "CANADA_CENTRAL",
    "BRAZIL_SOUTH",
    "EUROPE_NORTH",
    "EUROPE_WEST",
    "UK_SOUTH",
    "FRANCE_CENTRAL",
    "GERMANY_WEST_CENTRAL",
    "ASIA_EAST",
    "ASIA_SOUTH_EAST",
    "AUSTRALIA_EAST",
    "JAPAN_EAST",
    "INDIA_CENTRAL",
];

/// Instance sizes accepted in a Cluster spec.
pub const INSTANCE_SIZES: &[&str] = &[
    "M0", "M2", "M5", "M10", "M20", "M30", "M40", "M50", "M60", "M80", "M140", "M200", "M300",
    "M400", "M700", "R40", "R50", "R60", "R80", "R200", "R300", "R400", "R700",
];

/// Shared tiers are only offered in a handful of regions per provider.
const SHARED_TIER_REGIONS: &[(Provider, &str)] = &[
    (Provider::Aws, "US_EAST_1"),
    (Provider::Aws, "US_WEST_2"),
    (Provider::Aws, "EU_WEST_1"),
    (Provider::Aws, "EU_CENTRAL_1"),
    (Provider::Aws, "AP_SOUTHEAST_1"),
    (Provider::Aws, "AP_SOUTH_1"),
    (Provider::Gcp, "CENTRAL_US"),
    (Provider::Gcp, "WESTERN_EUROPE"),
    (Provider::Gcp, "ASIA_SOUTH_1"),
    (Provider::Azure, "US_EAST_2"),
    (Provider::Azure, "EUROPE_NORTH"),
    (Provider::Azure, "ASIA_EAST"),
];

/// Large tiers not offered in these regions.
const LARGE_TIER_EXCLUDED_REGIONS: &[(Provider, &str)] = &[
    (Provider::Aws, "ME_SOUTH_1"),
    (Provider::Aws, "AF_SOUTH_1"),
    (Provider::Aws, "EU_SOUTH_1"),
    (Provider::Gcp, "SOUTH_AMERICA_EAST_1"),
    (Provider::Azure, "BRAZIL_SOUTH"),
    (Provider::Azure, "INDIA_CENTRAL"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// The size is valid but probably not offered in this region.
    Restricted(String),
    UnknownSize,
}

pub fn is_shared_tier(size: &str) -> bool {
    matches!(size.trim().to_ascii_uppercase().as_str(), "M0" | "M2" | "M5")
}

fn is_large_tier(size: &str) -> bool {
    matches!(
        size.trim().to_ascii_uppercase().as_str(),
        "M300" | "M400" | "M700" | "R300" | "R400" | "R700"
    )
}

/// Best-effort availability of an instance size in a provider region.
pub fn instance_size_availability(provider: Provider, region: &str, size: &str) -> Availability {
    let size_upper = size.trim().to_ascii_uppercase();
    if !INSTANCE_SIZES.contains(&size_upper.as_str()) {
        return Availability::UnknownSize;
    }
    let region = normalize_region(region);

    if is_shared_tier(&size_upper)
        && !SHARED_TIER_REGIONS
            .iter()
            .any(|(p, r)| *p == provider && *r == region)
    {
        return Availability::Restricted(format!(
            "shared tier {size_upper} is not offered in {provider} {region}"
        ));
    }

    if is_large_tier(&size_upper)
        && LARGE_TIER_EXCLUDED_REGIONS
            .iter()
            .any(|(p, r)| *p == provider && *r == region)
    {
        return Availability::Restricted(format!(
            "{size_upper} is not offered in {provider} {region}"
        ));
    }

    Availability::Available
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_membership_normalizes_spelling() {
        assert!(Provider::Aws.has_region("us-east-1"));
        assert!(Provider::Aws.has_region("US_EAST_1"));
        assert!(!Provider::Gcp.has_region("US_EAST_1"));
        assert!(Provider::Azure.has_region("europe_west"));
    }

    #[test]
    fn shared_tier_outside_supported_regions_is_restricted() {
        assert_eq!(
            instance_size_availability(Provider::Aws, "US_EAST_1", "M0"),
            Availability::Available
        );
        assert!(matches!(
            instance_size_availability(Provider::Aws, "SA_EAST_1", "M0"),
            Availability::Restricted(_)
        ));
        assert_eq!(
            instance_size_availability(Provider::Aws, "US_EAST_1", "M11"),
            Availability::UnknownSize
        );
    }

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("gcp".parse::<Provider>(), Ok(Provider::Gcp));
        assert!("IBM".parse::<Provider>().is_err());
    }
}
