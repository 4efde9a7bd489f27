//! In-memory container engine.
//!
//! `build_and_start` reads the generated manifest and marks its containers
//! running; `tear_down` removes every container of the scope.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use labdock::engine::{ContainerEngine, EngineOutput, EngineScope};
use labdock::RuntimeError;

#[derive(Default)]
pub struct FakeEngine {
    /// compose project -> container names
    running: Mutex<HashMap<String, Vec<String>>>,
    failure: Mutex<Option<EngineOutput>>,
    build_delay: Mutex<Duration>,
    pub builds: AtomicUsize,
    pub teardowns: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following build exit with `exit_code` and `stderr`.
    pub fn fail_builds(&self, exit_code: i32, stderr: &str) {
        *self.failure.lock().unwrap() = Some(EngineOutput {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        });
    }

    pub fn set_build_delay(&self, delay: Duration) {
        *self.build_delay.lock().unwrap() = delay;
    }

    /// Simulates containers disappearing behind the runtime's back.
    pub fn kill_all(&self) {
        self.running.lock().unwrap().clear();
    }

    pub fn containers(&self, project: &str) -> Vec<String> {
        self.running
            .lock()
            .unwrap()
            .get(project)
            .cloned()
            .unwrap_or_default()
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

fn manifest_containers(scope: &EngineScope) -> Vec<String> {
    let text = std::fs::read_to_string(scope.manifest_path()).unwrap_or_default();
    let doc: serde_yaml::Value = serde_yaml::from_str(&text).unwrap_or_default();
    doc["services"]
        .as_mapping()
        .map(|services| {
            services
                .values()
                .filter_map(|s| s["container_name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn build_and_start(&self, scope: &EngineScope) -> Result<EngineOutput, RuntimeError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let delay = *self.build_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failure.lock().unwrap().clone();
        if let Some(failure) = failure {
            return Ok(failure);
        }

        let containers = manifest_containers(scope);
        let stdout = containers
            .iter()
            .map(|c| format!("Container {}  Started", c))
            .collect::<Vec<_>>()
            .join("\n");
        self.running
            .lock()
            .unwrap()
            .insert(scope.project.clone(), containers);
        Ok(EngineOutput {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }

    async fn tear_down(&self, scope: &EngineScope) -> Result<EngineOutput, RuntimeError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        self.running.lock().unwrap().remove(&scope.project);
        Ok(EngineOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }

    async fn list_running(&self, prefix: &str) -> Result<Vec<String>, RuntimeError> {
        Ok(self
            .running
            .lock()
            .unwrap()
            .values()
            .flatten()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn stream_logs(&self, scope: &EngineScope, tail: usize) -> Result<String, RuntimeError> {
        let lines: Vec<String> = (1..=tail.max(1) + 5)
            .map(|i| format!("{} | runtime line {}", scope.project, i))
            .collect();
        Ok(lines.join("\n"))
    }
}
