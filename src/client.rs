//! Client for connecting to the tasktree daemon.

use crate::daemon::{is_daemon_running, start_daemon};
use crate::paths::Paths;
use crate::protocol::{ErrorKind, Request, Response};
use crate::types::{Dependency, Feature, FeaturePatch, NewTask, Task, TaskFilter, TaskPatch};
use eyre::{Context, Result, bail};
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// Error reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Client for communicating with the tasktree daemon.
pub struct Client {
    paths: Paths,
    stream: UnixStream,
}

impl Client {
    /// Connect to the daemon, optionally auto-starting it if not running.
    pub fn connect(paths: &Paths, auto_start: bool) -> Result<Self> {
        let socket_path = paths.socket_path();

        let stream = match UnixStream::connect(&socket_path) {
            Ok(stream) => stream,
            Err(_) if auto_start => {
                if !is_daemon_running(paths) {
                    start_daemon(paths).context("Failed to auto-start daemon")?;

                    let mut attempts = 0;
                    loop {
                        if attempts > 20 {
                            bail!("Daemon failed to start in time");
                        }
                        std::thread::sleep(Duration::from_millis(50));
                        if let Ok(stream) = UnixStream::connect(&socket_path) {
                            break stream;
                        }
                        attempts += 1;
                    }
                } else {
                    UnixStream::connect(&socket_path).context("Failed to connect to daemon")?
                }
            }
            Err(e) => {
                bail!("Failed to connect to daemon: {}. Is it running?", e);
            }
        };

        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .context("Failed to set read timeout")?;

        Ok(Self {
            paths: paths.clone(),
            stream,
        })
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Send a request and receive a response.
    fn request(&mut self, request: Request) -> Result<Response> {
        let request_json = serde_json::to_string(&request)?;
        writeln!(self.stream, "{}", request_json)?;
        self.stream.flush()?;

        let mut reader = BufReader::new(&self.stream);
        let mut response_line = String::new();
        reader.read_line(&mut response_line)?;
        if response_line.is_empty() {
            bail!("Daemon closed the connection");
        }

        let response: Response = serde_json::from_str(&response_line)?;
        Ok(response)
    }

    /// Send a request, turning error responses into [`RemoteError`]s.
    fn call(&mut self, request: Request) -> Result<Response> {
        match self.request(request)? {
            Response::Error { kind, message } => Err(eyre::eyre!(RemoteError { kind, message })),
            response => Ok(response),
        }
    }

    pub fn add_feature(&mut self, name: &str, description: Option<&str>, enabled: bool) -> Result<Feature> {
        match self.call(Request::AddFeature {
            name: name.to_string(),
            description: description.map(String::from),
            enabled: Some(enabled),
        })? {
            Response::Feature { feature } => Ok(feature),
            _ => bail!("Unexpected response"),
        }
    }

    pub fn update_feature(&mut self, name: &str, patch: FeaturePatch) -> Result<Feature> {
        match self.call(Request::UpdateFeature {
            name: name.to_string(),
            clear_description: matches!(patch.description, Some(None)),
            description: patch.description.flatten(),
            enabled: patch.enabled,
        })? {
            Response::Feature { feature } => Ok(feature),
            _ => bail!("Unexpected response"),
        }
    }

    pub fn delete_feature(&mut self, name: &str) -> Result<()> {
        match self.call(Request::DeleteFeature { name: name.to_string() })? {
            Response::Ok => Ok(()),
            _ => bail!("Unexpected response"),
        }
    }

    pub fn list_features(&mut self, enabled: Option<bool>) -> Result<Vec<Feature>> {
        match self.call(Request::ListFeatures { enabled })? {
            Response::Features { features } => Ok(features),
            _ => bail!("Unexpected response"),
        }
    }

    /// Create a task together with its initial dependencies.
    pub fn add_task(&mut self, new_task: NewTask) -> Result<Task> {
        match self.call(Request::AddTask {
            name: new_task.name,
            description: new_task.description,
            details: new_task.details,
            priority: Some(new_task.priority.into()),
            feature_name: Some(new_task.feature_name),
            tests_required: Some(new_task.tests_required),
            dependencies: new_task.dependencies,
        })? {
            Response::Task { task } => Ok(task),
            _ => bail!("Unexpected response"),
        }
    }

    pub fn get_task(&mut self, name: &str) -> Result<Option<Task>> {
        match self.call(Request::GetTask { name: name.to_string() })? {
            Response::Task { task } => Ok(Some(task)),
            Response::NotFound { .. } => Ok(None),
            _ => bail!("Unexpected response"),
        }
    }

    /// Apply a partial update; any status is accepted here.
    pub fn update_task(&mut self, name: &str, patch: TaskPatch) -> Result<Task> {
        match self.call(Request::UpdateTask {
            name: name.to_string(),
            description: patch.description,
            clear_details: matches!(patch.details, Some(None)),
            details: patch.details.flatten(),
            priority: patch.priority.map(i64::from),
            status: patch.status.map(|s| s.as_str().to_string()),
            tests_required: patch.tests_required,
            feature_name: patch.feature_name,
        })? {
            Response::Task { task } => Ok(task),
            _ => bail!("Unexpected response"),
        }
    }

    pub fn delete_task(&mut self, name: &str) -> Result<()> {
        match self.call(Request::DeleteTask { name: name.to_string() })? {
            Response::Ok => Ok(()),
            _ => bail!("Unexpected response"),
        }
    }

    /// Start a task, returning it along with its feature.
    pub fn start_task(&mut self, name: &str) -> Result<(Task, Feature)> {
        match self.call(Request::StartTask { name: name.to_string() })? {
            Response::Started { task, feature } => Ok((task, feature)),
            _ => bail!("Unexpected response"),
        }
    }

    pub fn complete_task(&mut self, name: &str) -> Result<Task> {
        match self.call(Request::CompleteTask { name: name.to_string() })? {
            Response::Task { task } => Ok(task),
            _ => bail!("Unexpected response"),
        }
    }

    pub fn add_dependency(&mut self, task_name: &str, depends_on: &str) -> Result<Dependency> {
        match self.call(Request::AddDependency {
            task_name: task_name.to_string(),
            depends_on: depends_on.to_string(),
        })? {
            Response::Dependency { dependency } => Ok(dependency),
            _ => bail!("Unexpected response"),
        }
    }

    pub fn remove_dependency(&mut self, task_name: &str, depends_on: &str) -> Result<bool> {
        match self.call(Request::RemoveDependency {
            task_name: task_name.to_string(),
            depends_on: depends_on.to_string(),
        })? {
            Response::Removed { removed } => Ok(removed),
            _ => bail!("Unexpected response"),
        }
    }

    pub fn list_dependencies(&mut self, task_name: Option<&str>) -> Result<Vec<Dependency>> {
        match self.call(Request::ListDependencies {
            task_name: task_name.map(String::from),
        })? {
            Response::Dependencies { dependencies } => Ok(dependencies),
            _ => bail!("Unexpected response"),
        }
    }

    pub fn list_tasks(&mut self, filter: &TaskFilter) -> Result<Vec<Task>> {
        match self.call(Request::ListTasks {
            status: filter.status.map(|s| s.as_str().to_string()),
            min_priority: filter.min_priority.map(i64::from),
            feature_name: filter.feature_name.clone(),
        })? {
            Response::Tasks { tasks } => Ok(tasks),
            _ => bail!("Unexpected response"),
        }
    }

    /// Tasks that can be started now.
    pub fn available(&mut self) -> Result<Vec<Task>> {
        match self.call(Request::Available)? {
            Response::Tasks { tasks } => Ok(tasks),
            _ => bail!("Unexpected response"),
        }
    }

    /// Snapshot of the daemon's graph.
    pub fn export(&mut self) -> Result<String> {
        match self.call(Request::Export)? {
            Response::Snapshot { content } => Ok(content),
            _ => bail!("Unexpected response"),
        }
    }

    /// Shutdown the daemon.
    pub fn shutdown(&mut self) -> Result<()> {
        match self.call(Request::Shutdown)? {
            Response::Ok => Ok(()),
            _ => bail!("Unexpected response"),
        }
    }

    /// Ping the daemon.
    pub fn ping(&mut self) -> Result<()> {
        match self.call(Request::Ping)? {
            Response::Pong => Ok(()),
            _ => bail!("Unexpected response"),
        }
    }
}
