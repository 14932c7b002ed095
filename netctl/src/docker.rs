//! Keeps the [`Store`] in sync with the Docker daemon.

use std::{collections::HashMap, sync::Arc};

use bollard::{
    container::{InspectContainerOptions, ListContainersOptions},
    errors::Error as DockerError,
    models::{ContainerInspectResponse, ContainerStateStatusEnum, EventMessage, EventMessageTypeEnum},
    system::EventsOptions,
    Docker,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rustc_hash::FxHashSet;

use crate::store::{ContainerEvent, ContainerRecord, ContainerState, Store};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("docker error: {0}")]
    Docker(#[from] DockerError),
    #[error("docker event stream ended")]
    StreamEnded,
}

pub type Result<T> = std::result::Result<T, Error>;

/// The lifecycle transition an event action stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Create,
    Start,
    Stop,
    Destroy,
}

fn classify(action: &str) -> Option<Transition> {
    // Some actions carry details after a colon, e.g. `health_status: healthy`.
    match action.split(':').next().unwrap_or_default().trim() {
        "create" => Some(Transition::Create),
        "start" | "restart" | "unpause" => Some(Transition::Start),
        // `kill` is also emitted for non-fatal signals. `die` marks the exit.
        "die" | "stop" | "pause" => Some(Transition::Stop),
        "destroy" => Some(Transition::Destroy),
        _ => None,
    }
}

/// Builds a record out of an inspection. Returns `None` if the response carries no id.
pub fn record_from_inspect(inspect: &ContainerInspectResponse) -> Option<ContainerRecord> {
    let id = inspect.id.clone()?;
    let status = inspect.state.as_ref().and_then(|s| s.status);
    let pid = inspect
        .state
        .as_ref()
        .and_then(|s| s.pid)
        .and_then(|pid| u32::try_from(pid).ok())
        .unwrap_or_default();

    let state = match status {
        Some(ContainerStateStatusEnum::RUNNING | ContainerStateStatusEnum::RESTARTING) if pid != 0 => {
            ContainerState::Running
        }
        Some(ContainerStateStatusEnum::CREATED) | None => ContainerState::Created,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerState::Destroyed,
        _ => ContainerState::Stopped,
    };
    let pid = if state.is_running() { pid } else { 0 };

    let mut record = ContainerRecord::new(id, pid, state);
    record.name = inspect.name.clone();
    Some(record)
}

/// Container events from `since` on.
fn events_options(since: DateTime<Utc>) -> EventsOptions<String> {
    let filters = HashMap::from([("type".to_string(), vec!["container".to_string()])]);
    EventsOptions { since: Some(since), filters, ..Default::default() }
}

/// Feeds a [`Store`] from the Docker API.
#[derive(Debug, Clone)]
pub struct DockerWatcher {
    docker: Docker,
    store: Arc<Store>,
}

impl DockerWatcher {
    /// Connects to the local daemon, honoring `DOCKER_HOST`.
    pub fn connect(store: Arc<Store>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker, store })
    }

    pub const fn new(docker: Docker, store: Arc<Store>) -> Self {
        Self { docker, store }
    }

    /// Records every existing container and forgets those the daemon no longer knows.
    pub async fn sync(&self) -> Result<()> {
        let options = ListContainersOptions::<String> { all: true, ..Default::default() };
        let containers = self.docker.list_containers(Some(options)).await?;

        let mut listed = FxHashSet::default();
        for id in containers.into_iter().filter_map(|c| c.id) {
            match self.inspect(&id).await {
                Ok(Some(record)) if record.state == ContainerState::Destroyed => continue,
                Ok(Some(record)) => self.store.upsert(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(%id, ?e, "failed to inspect container"),
            }
            listed.insert(id);
        }

        let removed = self.store.retain(|record| listed.contains(&record.id));
        tracing::info!(containers = self.store.len(), removed, "synced containers");
        Ok(())
    }

    /// Syncs, then applies container events until the stream fails or ends.
    ///
    /// The event stream only subscribes once polled, so it starts from the instant the sync
    /// began and the daemon replays whatever happened in between.
    pub async fn run(&self) -> Result<()> {
        let since = Utc::now();
        self.sync().await?;

        let events = self.docker.events(Some(events_options(since)));
        let mut events = std::pin::pin!(events);

        while let Some(event) = events.next().await {
            self.handle(event?).await;
        }

        Err(Error::StreamEnded)
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerRecord>> {
        let inspect = self.docker.inspect_container(id, None::<InspectContainerOptions>).await?;
        Ok(record_from_inspect(&inspect))
    }

    async fn handle(&self, event: EventMessage) {
        if event.typ.is_some_and(|typ| typ != EventMessageTypeEnum::CONTAINER) {
            return;
        }
        let Some(actor) = event.actor else { return };
        let Some(id) = actor.id else { return };
        let Some(transition) = event.action.as_deref().and_then(classify) else { return };

        let name = actor.attributes.as_ref().and_then(|attrs| attrs.get("name")).map(|name| format!("/{name}"));
        tracing::debug!(%id, ?transition, "container event");

        let event = match transition {
            Transition::Create => ContainerEvent::Created { id, name },
            Transition::Start => match self.inspect(&id).await {
                Ok(Some(record)) if record.state.is_running() => {
                    ContainerEvent::Started { id, name: record.name.or(name), pid: record.pid }
                }
                Ok(_) => return,
                Err(e) => {
                    tracing::warn!(%id, ?e, "failed to inspect started container");
                    return;
                }
            },
            Transition::Stop => ContainerEvent::Stopped { id },
            Transition::Destroy => ContainerEvent::Destroyed { id },
        };

        self.store.apply(event);
    }
}
