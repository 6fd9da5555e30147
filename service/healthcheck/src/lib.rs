use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Outcome of a single health check run.
///
/// Kept local to this crate: the workspace this was generalised from reached out to a shared
/// models crate for this type, but a consumer coordination engine has no other reason to depend
/// on the wider API model tree just for three variants.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// The component is fully functional.
    Healthy,

    /// The component works but with reduced guarantees (details in the message).
    Degraded(String),

    /// The component is not functional (details in the message).
    Failed(String),
}

/// Generic health check for a component.
pub trait HealthCheck: Send + Sync {
    /// Execute the status check.
    fn check(&self) -> HealthStatus;
}

impl<CheckFn> HealthCheck for CheckFn
where
    CheckFn: Fn() -> HealthStatus + Send + Sync + 'static,
{
    fn check(&self) -> HealthStatus {
        self()
    }
}

/// Generic health check manager and register.
#[derive(Default)]
pub struct HealthChecks {
    checks: BTreeMap<String, Box<dyn HealthCheck>>,
}

impl HealthChecks {
    pub fn new() -> HealthChecks {
        let checks = BTreeMap::new();
        HealthChecks { checks }
    }

    /// Register a named health check.
    ///
    /// Check names are exposed to operators and should be meaningful for them.
    ///
    /// If a check with the given name already exists it will be replaced with the new check.
    pub fn register<C, S>(&mut self, name: S, check: C)
    where
        C: HealthCheck + 'static,
        S: Into<String>,
    {
        self.checks.insert(name.into(), Box::new(check));
    }

    /// Run all the registered checks and report the results.
    pub fn run(&self) -> HealthResults {
        let mut results = HealthResults::new();
        for (name, check) in self.checks.iter() {
            let result = check.check();
            results.insert(name.to_string(), result);
        }
        results
    }
}

/// Alias type to a map of health check results.
pub type HealthResults = BTreeMap<String, HealthStatus>;

#[cfg(test)]
mod tests {
    use super::HealthChecks;
    use super::HealthStatus;

    #[test]
    fn run_reports_all_registered_checks() {
        let mut checks = HealthChecks::new();
        checks.register("always-healthy", || HealthStatus::Healthy);
        checks.register("always-failed", || HealthStatus::Failed("nope".into()));
        let results = checks.run();
        assert_eq!(results.get("always-healthy"), Some(&HealthStatus::Healthy));
        assert_eq!(
            results.get("always-failed"),
            Some(&HealthStatus::Failed("nope".into()))
        );
    }

    #[test]
    fn register_replaces_existing_check_with_same_name() {
        let mut checks = HealthChecks::new();
        checks.register("check", || HealthStatus::Healthy);
        checks.register("check", || HealthStatus::Failed("replaced".into()));
        let results = checks.run();
        assert_eq!(
            results.get("check"),
            Some(&HealthStatus::Failed("replaced".into()))
        );
    }
}
