use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Liveness reporting for the long-running loops of a process.
///
/// The leaderboard service only deserves traffic while both its
/// asynchronous loops (the stream consumer and the snapshot broadcaster)
/// are making progress. Each loop registers itself and must report in
/// before its deadline elapses, otherwise the probe fails and the
/// orchestrator restarts the process.
///
/// Liveness and readiness are deliberately not merged into one state:
/// give each probe its own registry instance.
#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set on registration, before the first report.
    Starting,
    /// Healthy until the embedded deadline passes.
    HealthyUntil(time::OffsetDateTime),
    /// The component reported a failure it cannot recover from alone.
    Unhealthy,
    /// Deadline passed without a report.
    Stalled,
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

/// Held by a component to report its own status.
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    /// Report healthy for another deadline window. Must be called more
    /// often than the deadline configured at registration.
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            time::OffsetDateTime::now_utc().add(self.deadline),
        ))
        .await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!("failed to report health status: {}", err);
        }
    }
}

/// Aggregated process status, usable as an axum handler response.
#[derive(Default, Debug)]
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

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        let (tx, mut rx) = mpsc::channel::<HealthMessage>(16);
        let registry = Self {
            name: name.to_owned(),
            components: Default::default(),
            sender: tx,
        };

        let components = registry.components.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match components.write() {
                    Ok(mut map) => {
                        _ = map.insert(message.component, message.status);
                    }
                    // Poisoned lock: the probes will fail and the process restart.
                    Err(_) => warn!("poisoned HealthRegistry lock"),
                }
            }
        });

        registry
    }

    /// Register a component; the returned handle is passed to the component
    /// so it can report on its own schedule.
    pub async fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component,
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Compute the process status from all registered components. A registry
    /// with no components is unhealthy: nothing registered means nothing is
    /// running yet.
    pub fn get_status(&self) -> HealthStatus {
        let components = self
            .components
            .read()
            .expect("poisoned HealthRegistry lock");

        let now = time::OffsetDateTime::now_utc();
        let mut result = HealthStatus {
            healthy: !components.is_empty(),
            components: Default::default(),
        };

        for (name, status) in components.iter() {
            match status {
                ComponentStatus::HealthyUntil(until) if until.gt(&now) => {
                    _ = result.components.insert(name.clone(), status.clone());
                }
                ComponentStatus::HealthyUntil(_) => {
                    result.healthy = false;
                    _ = result
                        .components
                        .insert(name.clone(), ComponentStatus::Stalled);
                }
                _ => {
                    result.healthy = false;
                    _ = result.components.insert(name.clone(), status.clone());
                }
            }
        }

        match result.healthy {
            true => tracing::debug!("{} health check ok", self.name),
            false => warn!("{} health check failed: {:?}", self.name, result.components),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Sub;
    use time::OffsetDateTime;

    async fn eventually<F>(check: F)
    where
        F: Fn() -> bool,
    {
        let deadline = OffsetDateTime::now_utc().add(Duration::seconds(5));
        while !check() && OffsetDateTime::now_utc().lt(&deadline) {
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }
        assert!(check())
    }

    #[tokio::test]
    async fn empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[tokio::test]
    async fn component_lifecycle() {
        let registry = HealthRegistry::new("liveness");

        let handle = registry
            .register("consumer".to_string(), Duration::seconds(30))
            .await;
        eventually(|| registry.get_status().components.len() == 1).await;

        // Starting components do not make the process healthy.
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("consumer"),
            Some(&ComponentStatus::Starting)
        );

        handle.report_healthy().await;
        eventually(|| registry.get_status().healthy).await;

        handle.report_status(ComponentStatus::Unhealthy).await;
        eventually(|| !registry.get_status().healthy).await;
    }

    #[tokio::test]
    async fn missed_deadline_stalls_component() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("broadcaster".to_string(), Duration::seconds(30))
            .await;

        handle.report_healthy().await;
        eventually(|| registry.get_status().healthy).await;

        handle
            .report_status(ComponentStatus::HealthyUntil(
                OffsetDateTime::now_utc().sub(Duration::seconds(1)),
            ))
            .await;
        eventually(|| !registry.get_status().healthy).await;
        assert_eq!(
            registry.get_status().components.get("broadcaster"),
            Some(&ComponentStatus::Stalled)
        );
    }

    #[tokio::test]
    async fn all_components_must_be_healthy() {
        let registry = HealthRegistry::new("liveness");
        let consumer = registry
            .register("consumer".to_string(), Duration::seconds(30))
            .await;
        let broadcaster = registry
            .register("broadcaster".to_string(), Duration::seconds(30))
            .await;

        consumer.report_healthy().await;
        eventually(|| {
            registry.get_status().components.get("consumer")
                != Some(&ComponentStatus::Starting)
        })
        .await;
        assert!(!registry.get_status().healthy);

        broadcaster.report_healthy().await;
        eventually(|| registry.get_status().healthy).await;
    }
}
