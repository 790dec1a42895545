//! The built-in `STATUS` op: opaque host/process telemetry plus a slot for a
//! service-specific extension payload.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sysinfo::{Pid, System};

use crate::{
    envelope::{ErrorDetail, StackCap},
    error::Error,
};

/// OS/process telemetry gathered via `sysinfo`. Treated as opaque by peers —
/// the framework makes no claim about schema stability across versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostTelemetry {
    pub pid: u32,
    pub hostname: Option<String>,
    pub uptime_secs: u64,
    pub cpu_usage_percent: f32,
    pub process_memory_bytes: u64,
    pub total_memory_bytes: u64,
}

/// Full `STATUS` reply body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub telemetry: HostTelemetry,
    /// Either the caller-supplied extension payload, or (if the extension
    /// itself failed) a serialized [`ErrorDetail`] describing why — the
    /// `STATUS` handler never fails outright.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<Value>,
}

/// Hook a [`crate::service::Service`] can install to add service-specific
/// data to the `STATUS` payload's `extension` field.
#[async_trait]
pub trait StatusExtension: Send + Sync {
    async fn extend(&self) -> Result<Value, Error>;
}

#[must_use]
pub fn collect_host_telemetry() -> HostTelemetry {
    let mut system = System::new_all();
    system.refresh_all();
    let pid = std::process::id();
    let process_memory_bytes = system
        .process(Pid::from_u32(pid))
        .map(sysinfo::Process::memory)
        .unwrap_or(0);
    HostTelemetry {
        pid,
        hostname: System::host_name(),
        uptime_secs: System::uptime(),
        cpu_usage_percent: system.global_cpu_usage(),
        process_memory_bytes,
        total_memory_bytes: system.total_memory(),
    }
}

/// Build the `STATUS` reply body, applying `extension` if one is installed.
/// Never returns `Err`: an extension failure is folded into the `extension`
/// field as a serialized error rather than failing the whole request.
pub async fn build_status(extension: Option<&(dyn StatusExtension)>) -> ServiceStatus {
    let telemetry = collect_host_telemetry();
    let extension = match extension {
        None => None,
        Some(ext) => match ext.extend().await {
            Ok(value) => Some(value),
            Err(e) => serde_json::to_value(ErrorDetail::from_error(&e, StackCap::Default)).ok(),
        },
    };
    ServiceStatus { telemetry, extension }
}
