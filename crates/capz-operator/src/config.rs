//! Operator configuration from flags and environment

use std::time::Duration;

use clap::Args;

use capz_common::leader_election::LEADER_LEASE_NAME;
use capz_common::telemetry::TelemetryConfig;
use capz_common::CAPZ_SYSTEM_NAMESPACE;
use capz_services::StaticZoneResolver;

/// Service name reported to telemetry
const SERVICE_NAME: &str = "capz-controller-manager";

/// Settings of the controller manager
#[derive(Args, Debug, Clone)]
pub struct OperatorConfig {
    /// Only watch objects in this namespace (default: all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Deadline of the Azure work in a single reconcile, in seconds
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value_t = 90)]
    pub reconcile_timeout_secs: u64,

    /// Requeue delay while waiting on Azure, in seconds
    #[arg(long, env = "REQUEUE_SECS", default_value_t = 15)]
    pub requeue_secs: u64,

    /// Resync period after a successful reconcile, in seconds
    #[arg(long, env = "SYNC_PERIOD_SECS", default_value_t = 600)]
    pub sync_period_secs: u64,

    /// Run controllers only while holding the leader lease
    #[arg(long, env = "LEADER_ELECT", default_value_t = true, action = clap::ArgAction::Set)]
    pub leader_elect: bool,

    /// Namespace of the leader lease
    #[arg(long, env = "LEADER_ELECTION_NAMESPACE", default_value = CAPZ_SYSTEM_NAMESPACE)]
    pub leader_election_namespace: String,

    /// Name of the leader lease
    #[arg(long, default_value = LEADER_LEASE_NAME)]
    pub lease_name: String,

    /// Name of this pod, used as lease identity and event instance
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Availability zones of locations without an override
    #[arg(long, env = "DEFAULT_ZONES", value_delimiter = ',', default_values = ["1", "2", "3"])]
    pub default_zones: Vec<String>,

    /// Zones of one location (format: LOCATION=Z1,Z2; can be repeated)
    #[arg(long = "zone-override", value_parser = parse_zone_override)]
    pub zone_overrides: Vec<(String, Vec<String>)>,

    /// OTLP gRPC endpoint for traces and metrics
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

/// Parse `LOCATION=Z1,Z2`; an empty zone list means the location has none
fn parse_zone_override(s: &str) -> Result<(String, Vec<String>), String> {
    let (location, zones) = s
        .split_once('=')
        .ok_or("Expected format: LOCATION=Z1,Z2".to_string())?;
    let location = location.trim();
    if location.is_empty() {
        return Err("Location must not be empty".to_string());
    }
    let zones = zones
        .split(',')
        .map(str::trim)
        .filter(|z| !z.is_empty())
        .map(str::to_string)
        .collect();
    Ok((location.to_string(), zones))
}

impl OperatorConfig {
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period_secs)
    }

    /// Lease identity: the pod name, else the hostname
    pub fn identity(&self) -> String {
        self.pod_name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| SERVICE_NAME.to_string())
    }

    /// Zone resolver with the configured defaults and overrides
    pub fn zone_resolver(&self) -> StaticZoneResolver {
        self.zone_overrides.iter().fold(
            StaticZoneResolver::new(self.default_zones.clone()),
            |resolver, (location, zones)| resolver.with_override(location, zones.clone()),
        )
    }

    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: SERVICE_NAME.to_string(),
            otlp_endpoint: self.otlp_endpoint.clone(),
        }
    }
}
