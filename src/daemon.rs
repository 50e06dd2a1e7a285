//! Background daemon serving the task graph over a Unix socket.
//!
//! Every request is funneled through one event loop that owns the store, so
//! requests from all connected clients execute one at a time.

use crate::paths::Paths;
use crate::protocol::{ErrorKind, Request, Response};
use crate::store::Store;
use crate::types::{FeaturePatch, NewTask, Status, TaskFilter, TaskPatch, ValidationError, priority_from_i64};
use eyre::{Context, Result};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, mpsc, oneshot};

/// Pending requests the event loop will buffer.
const REQUEST_QUEUE: usize = 100;

type RequestSender = mpsc::Sender<(Request, oneshot::Sender<Response>)>;

/// Configuration for the daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub paths: Paths,

    /// Rewrite the snapshot after each mutation
    pub auto_export: bool,
}

impl DaemonConfig {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            auto_export: true,
        }
    }
}

/// The tasktree daemon.
pub struct Daemon {
    config: DaemonConfig,
    store: Store,
    shutdown: Arc<Notify>,
}

impl Daemon {
    /// Create a new daemon instance.
    pub fn new(config: DaemonConfig) -> Result<Self> {
        let mut store = Store::open(&config.paths.db_path).context("Failed to open store")?;
        if config.auto_export {
            store = store.with_auto_export(&config.paths.snapshot_path);
        }

        Ok(Self {
            config,
            store,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Handle that stops [`Daemon::run`] when notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Run the daemon until a `Shutdown` request, the shutdown handle, or Ctrl-C.
    pub async fn run(&mut self) -> Result<()> {
        let socket_path = self.config.paths.socket_path();
        let pid_path = self.config.paths.pid_path();

        fs::create_dir_all(&self.config.paths.state_dir).context("Failed to create state directory")?;
        if socket_path.exists() {
            fs::remove_file(&socket_path).ok();
        }

        let listener = UnixListener::bind(&socket_path).context("Failed to bind to Unix socket")?;
        fs::write(&pid_path, std::process::id().to_string()).context("Failed to write PID file")?;

        log::info!("Daemon listening on {:?}", socket_path);

        let (tx, mut rx) = mpsc::channel(REQUEST_QUEUE);
        let shutdown = Arc::clone(&self.shutdown);
        let acceptor = tokio::spawn(Self::accept_connections(listener, tx, Arc::clone(&shutdown)));

        loop {
            tokio::select! {
                Some((request, response_tx)) = rx.recv() => {
                    let response = self.handle_request(request);
                    let _ = response_tx.send(response);
                }

                _ = shutdown.notified() => {
                    log::info!("Daemon shutting down");
                    break;
                }

                _ = tokio::signal::ctrl_c() => {
                    log::info!("Interrupted");
                    break;
                }
            }
        }

        acceptor.abort();
        fs::remove_file(&socket_path).ok();
        fs::remove_file(&pid_path).ok();

        Ok(())
    }

    /// Accept connections in a background task.
    async fn accept_connections(listener: UnixListener, tx: RequestSender, shutdown: Arc<Notify>) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let tx = tx.clone();
                    let shutdown = Arc::clone(&shutdown);
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, tx, shutdown).await {
                            log::warn!("Connection error: {:#}", e);
                        }
                    });
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Handle a single client connection.
    ///
    /// A `Shutdown` request stops the daemon only after its reply is written.
    async fn handle_connection(stream: UnixStream, tx: RequestSender, shutdown: Arc<Notify>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await.context("Failed to read line")? {
            if line.trim().is_empty() {
                continue;
            }

            let request: Request = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    let response = Response::error(ErrorKind::Protocol, format!("Malformed request: {}", e));
                    write_response(&mut writer, &response).await?;
                    continue;
                }
            };

            let is_shutdown = matches!(request, Request::Shutdown);

            let (resp_tx, resp_rx) = oneshot::channel();
            tx.send((request, resp_tx))
                .await
                .context("Failed to send request to daemon")?;
            let response = resp_rx.await.context("Daemon dropped the request")?;
            write_response(&mut writer, &response).await?;

            if is_shutdown {
                shutdown.notify_one();
                break;
            }
        }

        Ok(())
    }

    /// Handle a single request.
    pub(crate) fn handle_request(&mut self, request: Request) -> Response {
        match request {
            Request::AddFeature {
                name,
                description,
                enabled,
            } => respond(
                self.store
                    .add_feature(&name, description.as_deref(), enabled.unwrap_or(true)),
                |feature| Response::Feature { feature },
            ),

            Request::UpdateFeature {
                name,
                description,
                clear_description,
                enabled,
            } => {
                let patch = FeaturePatch {
                    description: if clear_description { Some(None) } else { description.map(Some) },
                    enabled,
                };
                respond(self.store.update_feature(&name, patch), |feature| Response::Feature {
                    feature,
                })
            }

            Request::DeleteFeature { name } => respond(self.store.delete_feature(&name), |()| Response::Ok),

            Request::ListFeatures { enabled } => respond(self.store.list_features(enabled), |features| {
                Response::Features { features }
            }),

            Request::AddTask {
                name,
                description,
                details,
                priority,
                feature_name,
                tests_required,
                dependencies,
            } => {
                let priority = match wire_priority(priority) {
                    Ok(priority) => priority,
                    Err(e) => return invalid(e),
                };
                let mut new_task = NewTask::new(name, description);
                new_task.details = details;
                new_task.dependencies = dependencies;
                if let Some(priority) = priority {
                    new_task = new_task.priority(priority);
                }
                if let Some(feature_name) = feature_name {
                    new_task = new_task.feature(feature_name);
                }
                if let Some(tests_required) = tests_required {
                    new_task = new_task.tests_required(tests_required);
                }
                respond(self.store.add_task(new_task), |task| Response::Task { task })
            }

            Request::GetTask { name } => match self.store.get_task(&name) {
                Ok(Some(task)) => Response::Task { task },
                Ok(None) => Response::NotFound { name },
                Err(e) => Response::from_report(&e),
            },

            Request::UpdateTask {
                name,
                description,
                details,
                clear_details,
                priority,
                status,
                tests_required,
                feature_name,
            } => {
                let status = match parse_status(status) {
                    Ok(status) => status,
                    Err(e) => return invalid(e),
                };
                let priority = match wire_priority(priority) {
                    Ok(priority) => priority,
                    Err(e) => return invalid(e),
                };
                let patch = TaskPatch {
                    description,
                    details: if clear_details { Some(None) } else { details.map(Some) },
                    priority,
                    status,
                    tests_required,
                    feature_name,
                };
                respond(self.store.update_task(&name, patch), |task| Response::Task { task })
            }

            Request::DeleteTask { name } => respond(self.store.delete_task(&name), |()| Response::Ok),

            Request::StartTask { name } => {
                let started = self.store.start_task(&name).and_then(|task| {
                    let feature = self.store.get_feature(&task.feature_name)?.ok_or_else(|| {
                        eyre::eyre!("Feature {} of task {} is missing", task.feature_name, task.name)
                    })?;
                    Ok((task, feature))
                });
                respond(started, |(task, feature)| Response::Started { task, feature })
            }

            Request::CompleteTask { name } => {
                respond(self.store.complete_task(&name), |task| Response::Task { task })
            }

            Request::AddDependency { task_name, depends_on } => {
                respond(self.store.add_dependency(&task_name, &depends_on), |dependency| {
                    Response::Dependency { dependency }
                })
            }

            Request::RemoveDependency { task_name, depends_on } => {
                respond(self.store.remove_dependency(&task_name, &depends_on), |removed| {
                    Response::Removed { removed }
                })
            }

            Request::ListDependencies { task_name } => {
                respond(self.store.list_dependencies(task_name.as_deref()), |dependencies| {
                    Response::Dependencies { dependencies }
                })
            }

            Request::ListTasks {
                status,
                min_priority,
                feature_name,
            } => {
                let status = match parse_status(status) {
                    Ok(status) => status,
                    Err(e) => return invalid(e),
                };
                let min_priority = match wire_priority(min_priority) {
                    Ok(min_priority) => min_priority,
                    Err(e) => return invalid(e),
                };
                let filter = TaskFilter {
                    status,
                    min_priority,
                    feature_name,
                };
                respond(self.store.list_tasks(&filter), |tasks| Response::Tasks { tasks })
            }

            Request::Available => respond(self.store.available_tasks(), |tasks| Response::Tasks { tasks }),

            Request::Export => respond(self.store.export_string(), |content| Response::Snapshot { content }),

            // The connection stops the loop once this reply is on the wire
            Request::Shutdown => Response::Ok,

            Request::Ping => Response::Pong,
        }
    }
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn wire_priority(priority: Option<i64>) -> Result<Option<u8>, ValidationError> {
    priority.map(priority_from_i64).transpose()
}

fn parse_status(status: Option<String>) -> Result<Option<Status>, ValidationError> {
    status.map(|s| s.parse::<Status>()).transpose()
}

fn invalid(e: ValidationError) -> Response {
    Response::error(ErrorKind::Validation, e.to_string())
}

fn respond<T>(result: Result<T>, ok: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => ok(value),
        Err(e) => {
            log::debug!("Request failed: {:#}", e);
            Response::from_report(&e)
        }
    }
}

/// Check if a daemon is running for the given state directory.
pub fn is_daemon_running(paths: &Paths) -> bool {
    let socket_path = paths.socket_path();
    let pid_path = paths.pid_path();

    if !socket_path.exists() {
        return false;
    }

    if let Ok(pid_str) = fs::read_to_string(&pid_path)
        && let Ok(pid) = pid_str.trim().parse::<i32>()
    {
        // Signal 0 only checks that the process exists
        unsafe {
            if libc::kill(pid, 0) == 0 {
                return true;
            }
        }
    }

    // Stale socket, clean up
    fs::remove_file(&socket_path).ok();
    fs::remove_file(&pid_path).ok();
    false
}

/// Start the daemon as a background process.
pub fn start_daemon(paths: &Paths) -> Result<()> {
    use std::process::Command;

    let exe = std::env::current_exe().context("Failed to get current executable")?;

    Command::new(exe)
        .arg("--dir")
        .arg(&paths.root)
        .arg("daemon")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("Failed to spawn daemon process")?;

    std::thread::sleep(Duration::from_millis(100));

    Ok(())
}
