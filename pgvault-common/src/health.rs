//! Liveness reporting for the long-running loops of a process.
//!
//! Each loop registers a component with a deadline and reports healthy on
//! every tick. The process is healthy only while every component has
//! reported within its deadline, which is what `/_liveness` serves.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Newly registered, not yet reported.
    Starting,
    /// Healthy until the deadline; must report again before it.
    HealthyUntil(DateTime<Utc>),
    /// Explicitly reported unhealthy.
    Unhealthy,
}

#[derive(Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{:?}", self);
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

/// Reporting handle held by one component's loop.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthHandle {
    /// Must be called more frequently than the registered deadline.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(Utc::now() + self.deadline));
    }

    pub fn report_unhealthy(&self) {
        self.report_status(ComponentStatus::Unhealthy);
    }

    fn report_status(&self, status: ComponentStatus) {
        let mut components = self
            .components
            .write()
            .expect("health registry lock poisoned");
        components.insert(self.component.clone(), status);
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            components: self.components.clone(),
        };
        {
            let mut components = self
                .components
                .write()
                .expect("health registry lock poisoned");
            components.insert(component.to_owned(), ComponentStatus::Starting);
        }
        handle
    }

    pub fn get_status(&self) -> HealthStatus {
        let components = self
            .components
            .read()
            .expect("health registry lock poisoned");

        let now = Utc::now();
        let healthy = !components.is_empty()
            && components.values().all(|status| match status {
                ComponentStatus::HealthyUntil(until) => *until > now,
                ComponentStatus::Starting => true,
                ComponentStatus::Unhealthy => false,
            });

        if !healthy {
            tracing::warn!("{} health check failing: {:?}", self.name, *components);
        }

        HealthStatus {
            healthy,
            components: components.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_is_not_healthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn starting_components_are_given_the_benefit_of_the_doubt() {
        let registry = HealthRegistry::new("liveness");
        let _worker = registry.register("worker", Duration::seconds(30));
        assert!(registry.get_status().healthy);
    }

    #[test]
    fn stale_or_unhealthy_components_fail_the_process() {
        let registry = HealthRegistry::new("liveness");
        let worker = registry.register("worker", Duration::seconds(-1));
        let scheduler = registry.register("scheduler", Duration::seconds(30));

        scheduler.report_healthy();
        worker.report_healthy(); // Deadline already in the past: stalled.
        assert!(!registry.get_status().healthy);

        let registry = HealthRegistry::new("liveness");
        let worker = registry.register("worker", Duration::seconds(30));
        worker.report_healthy();
        assert!(registry.get_status().healthy);
        worker.report_unhealthy();
        assert!(!registry.get_status().healthy);
    }
}
