//! Generation context — the process-wide value every agent reads.
//!
//! Built once by the orchestrator after port allocation and pre-flight,
//! then shared read-only via `Arc`.

use serde::Serialize;

// ─────────────────────────────────────────────
// Ports and credentials
// ─────────────────────────────────────────────

/// The four TCP ports of the generated application.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct ServicePorts {
    /// Host port mapped to the backend API.
    pub api: u16,
    /// Host port serving the frontend.
    pub ui: u16,
    /// Host port of the database.
    pub db: u16,
    /// Container-internal backend port.
    pub backend_internal: u16,
}

/// Credentials the User agent uses to exercise login flows.
#[derive(Clone, Debug, Serialize)]
pub struct TestCredentials {
    pub email: String,
    pub password: String,
}

impl Default for TestCredentials {
    fn default() -> Self {
        TestCredentials {
            email: "admin@example.com".to_string(),
            password: "admin123".to_string(),
        }
    }
}

// ─────────────────────────────────────────────
// Pre-flight
// ─────────────────────────────────────────────

/// Availability of one host tool.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RuntimeCheck {
    pub available: bool,
    pub message: String,
}

impl RuntimeCheck {
    pub fn available(message: impl Into<String>) -> Self {
        RuntimeCheck {
            available: true,
            message: message.into(),
        }
    }

    pub fn missing(message: impl Into<String>) -> Self {
        RuntimeCheck {
            available: false,
            message: message.into(),
        }
    }
}

/// Result of the boot-time environment check. Blocked ports and missing
/// runtimes are warnings, never fatal.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PreflightReport {
    pub docker: RuntimeCheck,
    pub node: RuntimeCheck,
    pub blocked_ports: Vec<u16>,
}

impl PreflightReport {
    pub fn ports_clear(&self) -> bool {
        self.blocked_ports.is_empty()
    }
}

// ─────────────────────────────────────────────
// GenerationContext
// ─────────────────────────────────────────────

/// Shared, immutable run state.
#[derive(Clone, Debug, Serialize)]
pub struct GenerationContext {
    /// Run/project name (e.g. "generated_app").
    pub name: String,
    pub ports: ServicePorts,
    pub credentials: TestCredentials,
    pub preflight: PreflightReport,
}

impl GenerationContext {
    pub fn new(name: impl Into<String>, ports: ServicePorts, preflight: PreflightReport) -> Self {
        GenerationContext {
            name: name.into(),
            ports,
            credentials: TestCredentials::default(),
            preflight,
        }
    }

    /// Human-readable port summary for prompts and logs.
    pub fn ports_summary(&self) -> String {
        format!(
            "API http://localhost:{api} · UI http://localhost:{ui} · DB localhost:{db} · backend internal {internal}",
            api = self.ports.api,
            ui = self.ports.ui,
            db = self.ports.db,
            internal = self.ports.backend_internal,
        )
    }
}
