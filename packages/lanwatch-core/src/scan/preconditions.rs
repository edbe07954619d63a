//! Readiness checks run before a scan enters `SCANNING`.

use async_trait::async_trait;
use serde::Serialize;

use super::progress::ScanPhase;
use crate::scanner::{self, ScanCapabilities, privileges};

/// Hint for the client on where the user can fix a blocker.
pub const FIX_NETWORK_SETTINGS: &str = "network_settings";
pub const FIX_APP_SETTINGS: &str = "app_settings";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preconditions {
    pub ready: bool,
    /// `PRECONDITION_BLOCKED` or `PERMISSION_BLOCKED` when not ready
    pub blocker: Option<ScanPhase>,
    pub reason: Option<String>,
    pub fix_action: Option<String>,
    /// Subnet the scan would target
    pub subnet: Option<String>,
    pub link_up: bool,
    pub capabilities: Option<ScanCapabilities>,
}

impl Preconditions {
    pub fn ready(subnet: impl Into<String>) -> Self {
        Self {
            ready: true,
            blocker: None,
            reason: None,
            fix_action: None,
            subnet: Some(subnet.into()),
            link_up: true,
            capabilities: None,
        }
    }

    pub fn link_down(reason: impl Into<String>) -> Self {
        Self {
            ready: false,
            blocker: Some(ScanPhase::PreconditionBlocked),
            reason: Some(reason.into()),
            fix_action: Some(FIX_NETWORK_SETTINGS.to_string()),
            subnet: None,
            link_up: false,
            capabilities: None,
        }
    }

    pub fn permission_denied(reason: impl Into<String>, subnet: Option<String>) -> Self {
        Self {
            ready: false,
            blocker: Some(ScanPhase::PermissionBlocked),
            reason: Some(reason.into()),
            fix_action: Some(FIX_APP_SETTINGS.to_string()),
            subnet,
            link_up: true,
            capabilities: None,
        }
    }
}

#[async_trait]
pub trait PreconditionProbe: Send + Sync {
    /// Check readiness for scanning `requested`, or the local subnet when
    /// no subnet was requested.
    async fn check(&self, requested: Option<&str>) -> Preconditions;
}

/// Checks the real interfaces and process privileges.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPreconditions;

#[async_trait]
impl PreconditionProbe for SystemPreconditions {
    async fn check(&self, requested: Option<&str>) -> Preconditions {
        let Some(network) = scanner::detect_local_network() else {
            return Preconditions::link_down("No active network interface");
        };

        let subnet = requested
            .map(str::to_string)
            .unwrap_or_else(|| network.subnet.clone());

        let caps = privileges::detect_capabilities().await;
        if caps.mode == privileges::ScanMode::Blocked {
            let reason = format!(
                "{} {}",
                caps.warning.as_deref().unwrap_or("Scanning is not permitted."),
                privileges::get_elevation_instructions()
            );
            let mut blocked = Preconditions::permission_denied(reason, Some(subnet));
            blocked.capabilities = Some(caps);
            return blocked;
        }

        let mut ready = Preconditions::ready(subnet);
        ready.capabilities = Some(caps);
        ready
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Returns a fixed answer, echoing the requested subnet when ready.
    pub struct FixedPreconditions {
        pub answer: Mutex<Preconditions>,
    }

    impl FixedPreconditions {
        pub fn ready(default_subnet: &str) -> Self {
            Self {
                answer: Mutex::new(Preconditions::ready(default_subnet)),
            }
        }

        pub fn blocked(answer: Preconditions) -> Self {
            Self {
                answer: Mutex::new(answer),
            }
        }
    }

    #[async_trait]
    impl PreconditionProbe for FixedPreconditions {
        async fn check(&self, requested: Option<&str>) -> Preconditions {
            let mut answer = self.answer.lock().clone();
            if answer.ready {
                if let Some(subnet) = requested {
                    answer.subnet = Some(subnet.to_string());
                }
            }
            answer
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_constructors() {
        let down = Preconditions::link_down("wifi off");
        assert!(!down.ready);
        assert_eq!(down.blocker, Some(ScanPhase::PreconditionBlocked));
        assert_eq!(down.fix_action.as_deref(), Some(FIX_NETWORK_SETTINGS));
        assert!(!down.link_up);

        let denied = Preconditions::permission_denied("no ping", None);
        assert_eq!(denied.blocker, Some(ScanPhase::PermissionBlocked));
        assert_eq!(denied.fix_action.as_deref(), Some(FIX_APP_SETTINGS));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(Preconditions::ready("192.168.1.0/24")).unwrap();
        assert_eq!(json["ready"], true);
        assert_eq!(json["subnet"], "192.168.1.0/24");
        assert_eq!(json["linkUp"], true);
        assert!(json["blocker"].is_null());
    }
}
