//! Station-side adapter: keeps a station's view of the hub current across disconnects.
//!
//! On every (re)connect the adapter subscribes first and pulls the snapshot second, so
//! nothing emitted in between is lost; the overlap is de-duplicated by event id. The
//! local roster cache is only ever built from events, never from command replies.

use crate::application::command::{CommandOutcome, StationCommand};
use crate::application::coordinator::Coordinator;
use crate::broadcast::{ConnectionState, Subscription};
use crate::config::ClientConfig;
use crate::domain::action_log::{ActionKind, Actor};
use crate::domain::distribution::Distribution;
use crate::domain::event::{
    ComplimentaryPayload, DistributionPayload, DomainEvent, ImportPayload, PaymentPayload,
    StudentPayload,
};
use crate::domain::student::Student;
use crate::error::{Result, StationError};
use crate::interfaces::station::protocol::{
    StationReply, StationRequest, decode_line, write_line,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// A live event stream. `None` means the stream is gone for good.
#[async_trait]
pub trait EventSource: Send {
    async fn next(&mut self) -> Option<DomainEvent>;
}

#[async_trait]
impl EventSource for Subscription {
    async fn next(&mut self) -> Option<DomainEvent> {
        self.recv().await
    }
}

/// How a station reaches the hub.
#[async_trait]
pub trait StationLink: Send + Sync {
    async fn snapshot(&self, limit: usize) -> Result<Vec<DomainEvent>>;
    async fn subscribe(&self, station: &str) -> Result<Box<dyn EventSource>>;
    async fn execute(&self, actor: &Actor, command: StationCommand) -> Result<CommandOutcome>;
}

/// In-process link, for stations embedded in the hub binary and for tests.
#[derive(Clone)]
pub struct LocalLink {
    coordinator: Arc<Coordinator>,
}

impl LocalLink {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl StationLink for LocalLink {
    async fn snapshot(&self, limit: usize) -> Result<Vec<DomainEvent>> {
        self.coordinator.snapshot(limit).await
    }

    async fn subscribe(&self, station: &str) -> Result<Box<dyn EventSource>> {
        Ok(Box::new(self.coordinator.broadcaster().connect(station)))
    }

    async fn execute(&self, actor: &Actor, command: StationCommand) -> Result<CommandOutcome> {
        self.coordinator.execute(actor, command).await
    }
}

/// Link to a remote hub through the TCP gateway. Queries and commands use a short-lived
/// connection each; a subscription holds its own connection open.
#[derive(Debug, Clone)]
pub struct TcpLink {
    addr: String,
}

impl TcpLink {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    async fn round_trip(&self, request: &StationRequest) -> Result<StationReply> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (reader, mut writer) = stream.into_split();
        write_line(&mut writer, request).await?;
        let mut lines = BufReader::new(reader).lines();
        match lines.next_line().await? {
            Some(line) => decode_line(&line),
            None => Err(gateway_closed()),
        }
    }
}

fn gateway_closed() -> StationError {
    io::Error::new(io::ErrorKind::UnexpectedEof, "gateway closed the connection").into()
}

fn unexpected(reply: StationReply) -> StationError {
    StationError::Internal(format!("unexpected reply from gateway: {reply:?}"))
}

#[async_trait]
impl StationLink for TcpLink {
    async fn snapshot(&self, limit: usize) -> Result<Vec<DomainEvent>> {
        match self.round_trip(&StationRequest::Snapshot { limit }).await? {
            StationReply::Snapshot { events } => Ok(events),
            StationReply::Error { error } => Err(error.into_error()),
            other => Err(unexpected(other)),
        }
    }

    async fn subscribe(&self, station: &str) -> Result<Box<dyn EventSource>> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (reader, mut writer) = stream.into_split();
        write_line(
            &mut writer,
            &StationRequest::Subscribe {
                station: station.to_string(),
            },
        )
        .await?;

        let mut lines = BufReader::new(reader).lines();
        let line = lines.next_line().await?.ok_or_else(gateway_closed)?;
        match decode_line::<StationReply>(&line)? {
            StationReply::Subscribed { connection } => {
                tracing::debug!(connection, station, "Subscribed through gateway");
                Ok(Box::new(TcpEventStream {
                    lines,
                    _writer: writer,
                }))
            }
            StationReply::Error { error } => Err(error.into_error()),
            other => Err(unexpected(other)),
        }
    }

    async fn execute(&self, actor: &Actor, command: StationCommand) -> Result<CommandOutcome> {
        let request = StationRequest::Command {
            actor: actor.clone(),
            command,
        };
        match self.round_trip(&request).await? {
            StationReply::Ok { outcome } => Ok(outcome),
            StationReply::Error { error } => Err(error.into_error()),
            other => Err(unexpected(other)),
        }
    }
}

struct TcpEventStream {
    lines: Lines<BufReader<OwnedReadHalf>>,
    // Dropping the write half would end the subscription on the hub side.
    _writer: OwnedWriteHalf,
}

#[async_trait]
impl EventSource for TcpEventStream {
    async fn next(&mut self) -> Option<DomainEvent> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(err) => {
                    tracing::warn!(error = %err, "Event stream read failed");
                    return None;
                }
            };
            match decode_line::<StationReply>(&line) {
                Ok(StationReply::Event { event }) => return Some(event),
                Ok(other) => tracing::debug!(reply = ?other, "Ignoring non-event line"),
                Err(err) => tracing::warn!(error = %err, "Undecodable line on event stream"),
            }
        }
    }
}

/// Rolling window of the most recent events, ordered by id, plus every id seen so far.
///
/// Log ids are reserved before commit, so commands on different students can arrive out
/// of id order. A late event below the window is still new; only the seen set decides.
#[derive(Debug)]
pub struct Feed {
    capacity: usize,
    events: BTreeMap<u64, DomainEvent>,
    seen: BTreeSet<u64>,
}

impl Feed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: BTreeMap::new(),
            seen: BTreeSet::new(),
        }
    }

    /// Returns false when the event was already seen.
    pub fn insert(&mut self, event: &DomainEvent) -> bool {
        if !self.seen.insert(event.id) {
            return false;
        }
        self.events.insert(event.id, event.clone());
        while self.events.len() > self.capacity {
            self.events.pop_first();
        }
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &DomainEvent> {
        self.events.values()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Read cache of the roster, maintained purely from events.
#[derive(Debug, Default)]
pub struct RosterView {
    students: BTreeMap<String, Student>,
    distributions: BTreeMap<u64, Distribution>,
}

impl RosterView {
    pub fn student(&self, student_id: &str) -> Option<&Student> {
        self.students.get(student_id)
    }

    pub fn students(&self) -> impl Iterator<Item = &Student> {
        self.students.values()
    }

    pub fn distribution(&self, id: u64) -> Option<&Distribution> {
        self.distributions.get(&id)
    }

    pub fn distributions_for<'a>(
        &'a self,
        student_id: &'a str,
    ) -> impl Iterator<Item = &'a Distribution> + 'a {
        self.distributions
            .values()
            .filter(move |d| d.student_id == student_id)
    }

    fn put_student(&mut self, student: Student) {
        self.students.insert(student.student_id.clone(), student);
    }

    fn put_distribution(&mut self, distribution: Distribution) {
        // Events from different commands can arrive out of order; never un-verify.
        if self
            .distributions
            .get(&distribution.id)
            .is_some_and(|known| known.verified && !distribution.verified)
        {
            return;
        }
        self.distributions.insert(distribution.id, distribution);
    }

    fn apply(&mut self, event: &DomainEvent) -> serde_json::Result<()> {
        match event.kind {
            ActionKind::StudentRegistered | ActionKind::StudentUpdated => {
                let payload: StudentPayload = event.decode()?;
                self.put_student(payload.student);
            }
            ActionKind::PaymentProcessed => {
                let payload: PaymentPayload = event.decode()?;
                self.put_student(payload.student);
            }
            ActionKind::DistributionCreated | ActionKind::DistributionVerified => {
                let payload: DistributionPayload = event.decode()?;
                self.put_distribution(payload.distribution);
            }
            ActionKind::ComplimentaryIssued => {
                let payload: ComplimentaryPayload = event.decode()?;
                self.put_student(payload.student);
                self.put_distribution(payload.distribution);
            }
            ActionKind::RosterImported => {
                let payload: ImportPayload = event.decode()?;
                for student in payload.students {
                    self.put_student(student);
                }
            }
            ActionKind::RosterWiped => {
                self.students.clear();
                self.distributions.clear();
            }
            ActionKind::LogsPurged => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum PendingKey {
    Student(String),
    Distribution(u64),
}

impl PendingKey {
    fn for_command(command: &StationCommand) -> Option<Self> {
        match command {
            StationCommand::RegisterOrCreate { student_id, .. }
            | StationCommand::CreateDistribution { student_id } => {
                Some(Self::Student(student_id.trim().to_string()))
            }
            StationCommand::ProcessPayment(request) => {
                Some(Self::Student(request.student_id.trim().to_string()))
            }
            StationCommand::UpdateStudent(edit) => {
                Some(Self::Student(edit.student_id.trim().to_string()))
            }
            StationCommand::VerifyDistribution { distribution_id } => {
                Some(Self::Distribution(*distribution_id))
            }
            StationCommand::IssueComplimentary { .. }
            | StationCommand::Import { .. }
            | StationCommand::WipeRoster
            | StationCommand::PurgeLogs => None,
        }
    }
}

/// A station's connection to the hub plus everything it has learned from it.
pub struct StationClient<L: StationLink> {
    link: L,
    actor: Actor,
    config: ClientConfig,
    state: ConnectionState,
    stream: Option<Box<dyn EventSource>>,
    backlog: VecDeque<DomainEvent>,
    feed: Feed,
    roster: RosterView,
    pending: BTreeSet<PendingKey>,
}

impl<L: StationLink> StationClient<L> {
    pub fn new(link: L, actor: Actor, config: ClientConfig) -> Self {
        Self {
            link,
            actor,
            feed: Feed::new(config.feed_capacity),
            config,
            state: ConnectionState::Closed,
            stream: None,
            backlog: VecDeque::new(),
            roster: RosterView::default(),
            pending: BTreeSet::new(),
        }
    }

    /// Connection indicator for the station UI.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    pub fn roster(&self) -> &RosterView {
        &self.roster
    }

    pub fn is_student_pending(&self, student_id: &str) -> bool {
        self.pending
            .contains(&PendingKey::Student(student_id.to_string()))
    }

    pub fn is_distribution_pending(&self, id: u64) -> bool {
        self.pending.contains(&PendingKey::Distribution(id))
    }

    /// Subscribes and catches up, retrying with backoff. Gives up with `Disconnected`
    /// once the reconnect policy is exhausted, leaving the client `Closed`.
    pub async fn connect(&mut self) -> Result<()> {
        let policy = self.config.reconnect;
        let max_attempts = policy.max_attempts();
        self.state = ConnectionState::Connecting;

        for attempt in 0..max_attempts {
            match self.open().await {
                Ok(caught_up) => {
                    self.state = ConnectionState::Open;
                    tracing::info!(
                        station = %self.actor.station,
                        caught_up,
                        "Connected to hub"
                    );
                    return Ok(());
                }
                Err(err) if is_link_failure(&err) => {
                    tracing::warn!(
                        station = %self.actor.station,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %err,
                        "Hub unreachable"
                    );
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(policy.delay(attempt)).await;
                    }
                }
                Err(err) => {
                    self.state = ConnectionState::Closed;
                    return Err(err);
                }
            }
        }

        self.state = ConnectionState::Closed;
        Err(StationError::Disconnected {
            attempts: max_attempts,
        })
    }

    /// Drops the live stream. Cached state is kept for the next `connect`.
    pub fn disconnect(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Closed;
    }

    /// Next event this station has not seen yet, reconnecting when the stream drops.
    pub async fn next_event(&mut self) -> Result<DomainEvent> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                return Ok(event);
            }

            let received = match self.stream.as_mut() {
                Some(stream) => stream.next().await,
                None => None,
            };
            match received {
                Some(event) => {
                    if self.absorb(&event) {
                        return Ok(event);
                    }
                }
                None => {
                    if self.state == ConnectionState::Open {
                        tracing::warn!(station = %self.actor.station, "Event stream closed, reconnecting");
                    }
                    self.stream = None;
                    self.connect().await?;
                }
            }
        }
    }

    /// Sends a command. The affected student or distribution is marked pending until the
    /// confirming event arrives; the returned outcome is not applied to the cache.
    pub async fn execute(&mut self, command: StationCommand) -> Result<CommandOutcome> {
        let marker = PendingKey::for_command(&command);
        if let Some(key) = &marker {
            self.pending.insert(key.clone());
        }

        let result = self.link.execute(&self.actor, command).await;
        if let Some(key) = marker
            && !result
                .as_ref()
                .is_ok_and(|outcome| self.expects_event(outcome))
        {
            self.pending.remove(&key);
        }
        result
    }

    fn expects_event(&self, outcome: &CommandOutcome) -> bool {
        match outcome {
            CommandOutcome::Registration(registration) => registration.created,
            CommandOutcome::Verification(verification) => verification.newly_verified,
            CommandOutcome::Student(student) => {
                self.roster.student(&student.student_id) != Some(student)
            }
            _ => true,
        }
    }

    async fn open(&mut self) -> Result<usize> {
        let stream = self.link.subscribe(&self.actor.station).await?;
        let snapshot = self.link.snapshot(self.config.snapshot_limit).await?;
        self.stream = Some(stream);

        let mut caught_up = 0;
        for event in snapshot {
            if self.absorb(&event) {
                self.backlog.push_back(event);
                caught_up += 1;
            }
        }
        Ok(caught_up)
    }

    fn absorb(&mut self, event: &DomainEvent) -> bool {
        if !self.feed.insert(event) {
            return false;
        }
        if let Err(err) = self.roster.apply(event) {
            tracing::warn!(event = event.id, kind = %event.kind, error = %err, "Undecodable event payload");
        }
        self.confirm(event);
        true
    }

    fn confirm(&mut self, event: &DomainEvent) {
        if let Some(student_id) = &event.student_id {
            self.pending.remove(&PendingKey::Student(student_id.clone()));
        }
        if matches!(
            event.kind,
            ActionKind::DistributionVerified | ActionKind::ComplimentaryIssued
        ) && let Some(id) = event
            .payload
            .get("distribution")
            .and_then(|d| d.get("id"))
            .and_then(|id| id.as_u64())
        {
            self.pending.remove(&PendingKey::Distribution(id));
        }
    }
}

fn is_link_failure(err: &StationError) -> bool {
    matches!(
        err,
        StationError::Io(_) | StationError::StoreUnavailable(_) | StationError::Disconnected { .. }
    )
}
