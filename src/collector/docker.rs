use super::CollectorError;
use crate::domain::{ContainerDescriptor, LogMessage};
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::models::ContainerInspectResponse;
use bollard::query_parameters::{
    EventsOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct LogStreamOptions {
    pub stdout: bool,
    pub stderr: bool,
    /// Lines of history to replay on attach; "0" means only new lines.
    pub tail: String,
}

impl Default for LogStreamOptions {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            tail: "0".to_string(),
        }
    }
}

/// Tails every running container (and every container started later) and
/// feeds their lines into the forwarding channel.
#[derive(Clone)]
pub struct DockerLogSource {
    docker: Docker,
    options: LogStreamOptions,
    own_hostname: Option<String>,
    attached: Arc<Mutex<HashSet<String>>>,
}

impl DockerLogSource {
    pub fn connect(socket_path: &str, options: LogStreamOptions) -> Result<Self, CollectorError> {
        let docker = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)?;
        let own_hostname = hostname::get()
            .ok()
            .and_then(|h| h.to_str().map(str::to_string));

        Ok(Self {
            docker,
            options,
            own_hostname,
            attached: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub async fn can_connect(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    /// Run until `cancel` fires or the channel closes.
    pub async fn run(
        self,
        tx: mpsc::Sender<LogMessage>,
        cancel: CancellationToken,
    ) -> Result<(), CollectorError> {
        let options = ListContainersOptions {
            all: false, // Only running containers
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        info!("Found {} running containers", containers.len());

        for id in containers.into_iter().filter_map(|c| c.id) {
            self.attach(&id, &tx, &cancel).await;
        }

        let filters = HashMap::from([
            ("type".to_string(), vec!["container".to_string()]),
            ("event".to_string(), vec!["start".to_string()]),
        ]);
        let mut events = self.docker.events(Some(EventsOptions {
            filters: Some(filters),
            ..Default::default()
        }));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tx.closed() => return Err(CollectorError::CollectionStopped),
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        if let Some(id) = event.actor.and_then(|actor| actor.id) {
                            self.attach(&id, &tx, &cancel).await;
                        }
                    }
                    Some(Err(e)) => {
                        error!("Docker event stream error: {}", e);
                        return Err(e.into());
                    }
                    None => {
                        warn!("Docker event stream ended");
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn attach(&self, id: &str, tx: &mpsc::Sender<LogMessage>, cancel: &CancellationToken) {
        if self.is_self(id) {
            debug!(container_id = %id, "Skipping own container");
            return;
        }
        if !self.attached.lock().insert(id.to_string()) {
            return;
        }

        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(CollectorError::from)
            .and_then(|response| {
                descriptor_from_inspect(response)
                    .ok_or_else(|| CollectorError::IncompleteInspect(id.to_string()))
            });

        let descriptor = match inspect {
            Ok(descriptor) => Arc::new(descriptor),
            Err(e) => {
                warn!(container_id = %id, "Could not inspect container: {}", e);
                self.attached.lock().remove(id);
                return;
            }
        };

        let source = self.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            source.tail(descriptor, tx, cancel).await;
        });
    }

    async fn tail(
        &self,
        container: Arc<ContainerDescriptor>,
        tx: mpsc::Sender<LogMessage>,
        cancel: CancellationToken,
    ) {
        info!(
            "Starting to tail logs for container: {} ({})",
            container.display_name(),
            container.id
        );

        let options = LogsOptions {
            follow: true,
            stdout: self.options.stdout,
            stderr: self.options.stderr,
            timestamps: true,
            tail: self.options.tail.clone(),
            ..Default::default()
        };
        let mut stream = self.docker.logs(&container.id, Some(options));
        let mut stdout = LineBuffer::default();
        let mut stderr = LineBuffer::default();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = stream.next() => chunk,
            };

            let (source, buffer, bytes) = match chunk {
                Some(Ok(LogOutput::StdErr { message })) => ("stderr", &mut stderr, message),
                Some(Ok(output)) => ("stdout", &mut stdout, output.into_bytes()),
                Some(Err(e)) => {
                    error!(container_id = %container.id, "Error reading logs: {}", e);
                    break;
                }
                None => break,
            };

            for line in buffer.push(&bytes) {
                if !send_line(&container, source, &line, &tx) {
                    self.attached.lock().remove(&container.id);
                    return;
                }
            }
        }

        // An unterminated last line still counts once the stream is over.
        for (source, buffer) in [("stdout", &mut stdout), ("stderr", &mut stderr)] {
            if let Some(line) = buffer.finish() {
                send_line(&container, source, &line, &tx);
            }
        }

        self.attached.lock().remove(&container.id);
        info!("Stopped tailing logs for container: {}", container.display_name());
    }

    fn is_self(&self, id: &str) -> bool {
        self.own_hostname
            .as_deref()
            .is_some_and(|hostname| !hostname.is_empty() && id.starts_with(hostname))
    }
}

/// Queue one line without waiting. Returns false once the channel is closed.
fn send_line(
    container: &Arc<ContainerDescriptor>,
    source: &str,
    line: &str,
    tx: &mpsc::Sender<LogMessage>,
) -> bool {
    if line.trim().is_empty() {
        return true;
    }
    let (time, data) = split_timestamp(line);
    let message = LogMessage {
        data: data.to_string(),
        time,
        source: source.to_string(),
        container: container.clone(),
    };

    match tx.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(container_id = %container.id, "Log queue full, dropping line");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Lines longer than this are cut and forwarded in pieces.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Reassembles lines that Docker delivers across several frames, such as
/// its 16 KiB partial messages. One buffer per output stream.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a frame and return the lines it completes, terminators removed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let complete = match self.pending.iter().rposition(|b| *b == b'\n') {
            Some(last) => {
                let rest = self.pending.split_off(last + 1);
                std::mem::replace(&mut self.pending, rest)
            }
            None if self.pending.len() >= MAX_LINE_BYTES => std::mem::take(&mut self.pending),
            None => return Vec::new(),
        };

        String::from_utf8_lossy(&complete)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Drain whatever is left without a terminator.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Build a descriptor from `docker inspect`; `None` when the id is missing.
pub fn descriptor_from_inspect(response: ContainerInspectResponse) -> Option<ContainerDescriptor> {
    let config = response.config.unwrap_or_default();
    Some(ContainerDescriptor {
        id: response.id?,
        name: response.name.unwrap_or_default(),
        image: config.image.unwrap_or_default(),
        hostname: config.hostname.unwrap_or_default(),
        env: config.env.unwrap_or_default(),
        labels: config.labels.unwrap_or_default(),
    })
}

/// Split the RFC 3339 prefix Docker adds with `timestamps=true`.
pub fn split_timestamp(line: &str) -> (DateTime<Utc>, &str) {
    line.split_once(' ')
        .and_then(|(prefix, rest)| {
            DateTime::parse_from_rfc3339(prefix)
                .ok()
                .map(|time| (time.with_timezone(&Utc), rest))
        })
        .unwrap_or_else(|| (Utc::now(), line))
}
