//! Job execution coordinator.
//!
//! Runs at most one job at a time for a thing. Incoming messages are decoded
//! by the [`JobsClient`] and dispatched to one handler per event kind; every
//! handler feeds a [`Trigger`] into the [`CoordinatorState`] under a single
//! lock and then performs the returned [`Action`] with the lock released.
//!
//! Work runs on its own task and reports back through a completion channel,
//! so message delivery is never blocked by a long deployment.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::executor::WorkExecutor;
use crate::jobs::types::{
    GetPendingJobExecutionsResponse, NextJobExecutionChangedEvent, StartNextJobExecutionResponse,
    UpdateJobExecutionResponse,
};
use crate::jobs::{EventKind, JobEvent, JobExecutionSummary, JobsClient, JobsError, Request};
use crate::state_machine::{
    Action, CoordinatorState, JobDescriptor, Phase, ShutdownReason, Trigger, WorkCompletion,
};
use crate::transport::IncomingMessage;

pub struct JobCoordinator {
    jobs: JobsClient,
    executor: Arc<dyn WorkExecutor>,
    state: Mutex<CoordinatorState>,
    /// Job handed to the executor, until its status update is accepted.
    current_job: Mutex<Option<String>>,
    /// Result of the initial listing. Diagnostic only.
    pending_jobs: Mutex<Vec<JobExecutionSummary>>,
    reason: Mutex<Option<ShutdownReason>>,
    finished: CancellationToken,
    completions_tx: mpsc::UnboundedSender<WorkCompletion>,
    completions_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkCompletion>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobCoordinator {
    pub fn new(jobs: JobsClient, executor: Arc<dyn WorkExecutor>) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            jobs,
            executor,
            state: Mutex::new(CoordinatorState::default()),
            current_job: Mutex::new(None),
            pending_jobs: Mutex::new(Vec::new()),
            reason: Mutex::new(None),
            finished: CancellationToken::new(),
            completions_tx,
            completions_rx: tokio::sync::Mutex::new(completions_rx),
        }
    }

    /// Run the startup protocol, then handle events until the session ends.
    ///
    /// Returns once the transport has been disconnected. Cancelling `stop`
    /// requests a clean shutdown.
    pub async fn run(
        &self,
        mut inbox: mpsc::UnboundedReceiver<IncomingMessage>,
        stop: CancellationToken,
    ) -> ShutdownReason {
        tracing::info!(thing = %self.jobs.thing_name(), "Starting job coordinator");

        tokio::select! {
            result = self.start() => {
                if let Err(e) = result {
                    self.shutdown(e.into()).await;
                }
            }
            _ = stop.cancelled() => self.shutdown(ShutdownReason::Requested).await,
        }

        let mut completions = self.completions_rx.lock().await;
        loop {
            tokio::select! {
                biased;
                _ = self.finished.cancelled() => break,
                _ = stop.cancelled() => self.shutdown(ShutdownReason::Requested).await,
                Some(completion) = completions.recv() => self.complete(completion).await,
                message = inbox.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => self.shutdown(ShutdownReason::TransportClosed).await,
                },
            }
        }

        let reason = lock(&self.reason).take();
        reason.unwrap_or(ShutdownReason::Requested)
    }

    /// Subscriptions are confirmed one by one before the request whose
    /// responses they carry is published.
    async fn start(&self) -> Result<(), JobsError> {
        for kind in EventKind::LISTING {
            self.jobs.subscribe(kind).await?;
        }
        self.jobs.publish_get_pending().await?;

        for kind in EventKind::STEADY_STATE {
            self.jobs.subscribe(kind).await?;
        }
        tracing::info!("Subscribed to job streams");

        self.try_start_next_job().await;
        Ok(())
    }

    /// Decode `message` and dispatch it to its handler.
    pub async fn handle_message(&self, message: IncomingMessage) {
        let event = match self.jobs.decode(&message) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::debug!(topic = %message.topic, "Ignoring message on unrouted topic");
                return;
            }
            Err(e) => {
                self.shutdown(e.into()).await;
                return;
            }
        };

        match event {
            JobEvent::PendingJobs(response) => self.on_pending_jobs(response),
            JobEvent::PendingJobsRejected(error) => {
                let error = JobsError::rejected(Request::GetPendingJobExecutions, error);
                self.shutdown(error.into()).await
            }
            JobEvent::NextJobChanged(event) => self.on_next_job_changed(event).await,
            JobEvent::StartNextAccepted(response) => self.on_start_next_accepted(response).await,
            JobEvent::StartNextRejected(error) => {
                let error = JobsError::rejected(Request::StartNextPendingJobExecution, error);
                self.shutdown(error.into()).await
            }
            JobEvent::UpdateAccepted { job_id, response } => {
                self.on_update_accepted(&job_id, response).await
            }
            JobEvent::UpdateRejected { job_id, error } => {
                tracing::error!(job_id = %job_id, code = %error.code, "Status update rejected");
                let error = JobsError::rejected(Request::UpdateJobExecution, error);
                self.shutdown(error.into()).await
            }
        }
    }

    /// Request the next pending job unless one is in progress or the
    /// session is shutting down.
    pub async fn try_start_next_job(&self) {
        match self.apply(Trigger::RequestStart) {
            Action::RequestStart => self.request_start().await,
            _ if self.snapshot().disconnect_requested() => {
                tracing::debug!("Not requesting next job: disconnecting")
            }
            _ => tracing::debug!("Not requesting next job: job in progress"),
        }
    }

    /// Disconnect and finish. Only the first call has any effect.
    pub async fn shutdown(&self, reason: ShutdownReason) {
        let before = self.snapshot();
        if self.apply(Trigger::Shutdown) != Action::Disconnect {
            tracing::debug!(reason = %reason, "Shutdown already in progress");
            return;
        }

        let code = match &reason {
            ShutdownReason::Failed(e) => e.rejection_code(),
            _ => None,
        };
        if reason.is_failure() {
            tracing::error!(reason = %reason, code = ?code, "Shutting down");
        } else {
            tracing::info!(reason = %reason, "Shutting down");
        }
        tracing::info!(
            phase = %before.phase(),
            executing = before.is_executing(),
            next_waiting = before.is_next_waiting(),
            initial_listing = before.has_received_initial_listing(),
            pending_jobs = self.pending_jobs().len(),
            "Coordinator state at shutdown"
        );
        *lock(&self.reason) = Some(reason);

        if let Err(e) = self.jobs.disconnect().await {
            tracing::warn!(error = %e, "Disconnect failed");
        }
        tracing::info!("Job coordinator finished");
        self.finished.cancel();
    }

    pub fn snapshot(&self) -> CoordinatorState {
        lock(&self.state).clone()
    }

    pub fn pending_jobs(&self) -> Vec<JobExecutionSummary> {
        lock(&self.pending_jobs).clone()
    }

    fn apply(&self, trigger: Trigger) -> Action {
        let mut state = lock(&self.state);
        let from = state.phase();
        let action = state.transition(trigger);
        if state.phase() != from {
            tracing::debug!(from = %from, to = %state.phase(), ?trigger, "Phase changed");
        }
        action
    }

    fn on_pending_jobs(&self, response: GetPendingJobExecutionsResponse) {
        tracing::info!(
            in_progress = response.in_progress_jobs.len(),
            queued = response.queued_jobs.len(),
            "Received pending job listing"
        );
        for job in response.in_progress_jobs.iter().chain(&response.queued_jobs) {
            tracing::debug!(job_id = %job.job_id, "Pending job");
        }

        let mut jobs = response.in_progress_jobs;
        jobs.extend(response.queued_jobs);
        *lock(&self.pending_jobs) = jobs;
        lock(&self.state).mark_initial_listing();
    }

    async fn on_next_job_changed(&self, event: NextJobExecutionChangedEvent) {
        let Some(execution) = event.execution else {
            tracing::info!("No job queued for this thing");
            return;
        };
        tracing::info!(job_id = %execution.job_id, "Next job changed");

        match self.apply(Trigger::JobChanged { has_job: true }) {
            Action::RequestStart => self.request_start().await,
            _ => tracing::debug!(job_id = %execution.job_id, "Busy, deferring next job"),
        }
    }

    async fn on_start_next_accepted(&self, response: StartNextJobExecutionResponse) {
        let has_job = response.execution.is_some();
        let action = self.apply(Trigger::StartAccepted { has_job });

        match (action, response.execution) {
            (Action::Execute, Some(execution)) => {
                *lock(&self.current_job) = Some(execution.job_id.clone());
                self.spawn_work(execution.into())
            }
            (Action::RequestStart, _) => self.request_start().await,
            (_, None) => tracing::info!("No pending jobs"),
            (_, Some(execution)) => {
                tracing::warn!(job_id = %execution.job_id, "Ignoring job started out of turn")
            }
        }
    }

    async fn on_update_accepted(&self, job_id: &str, response: UpdateJobExecutionResponse) {
        {
            let mut current = lock(&self.current_job);
            if current.as_deref() != Some(job_id) {
                tracing::warn!(
                    job_id,
                    current = ?current.as_deref(),
                    "Ignoring status update acceptance for another job"
                );
                return;
            }
            current.take();
        }

        tracing::info!(job_id, timestamp = ?response.timestamp, "Status update accepted");
        if self.apply(Trigger::UpdateAccepted) == Action::RequestStart {
            tracing::info!("Job changed while busy, checking for next job");
            self.request_start().await;
        }
    }

    async fn request_start(&self) {
        tracing::info!("Requesting next pending job");
        if let Err(e) = self.jobs.publish_start_next().await {
            self.shutdown(e.into()).await;
        }
    }

    fn spawn_work(&self, job: JobDescriptor) {
        tracing::info!(job_id = %job.job_id, "Executing job");
        let executor = Arc::clone(&self.executor);
        let completions = self.completions_tx.clone();

        tokio::spawn(async move {
            let job_id = job.job_id.clone();
            let work =
                tokio::spawn(async move { executor.execute(&job.job_id, &job.job_document).await });
            let succeeded = match work.await {
                Ok(succeeded) => succeeded,
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Work executor panicked");
                    false
                }
            };
            // Receiver lives as long as the coordinator.
            let _ = completions.send(WorkCompletion { job_id, succeeded });
        });
    }

    async fn complete(&self, completion: WorkCompletion) {
        match self.apply(Trigger::WorkFinished) {
            Action::Report => self.report_status(&completion).await,
            _ => match self.snapshot().phase() {
                Phase::Disconnecting => tracing::info!(
                    job_id = %completion.job_id,
                    "Work finished after disconnect, status not reported"
                ),
                phase => tracing::warn!(
                    job_id = %completion.job_id,
                    phase = %phase,
                    "Unexpected work completion"
                ),
            },
        }
    }

    async fn report_status(&self, completion: &WorkCompletion) {
        let status = completion.status();
        tracing::info!(job_id = %completion.job_id, status = %status, "Reporting job status");
        if let Err(e) = self.jobs.publish_update(&completion.job_id, status).await {
            self.shutdown(e.into()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{Call, MemoryTransport, Published};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tokio::task::JoinHandle;

    const THING: &str = "device-1-agent";

    fn topic(suffix: &str) -> String {
        format!("$aws/things/{THING}/jobs/{suffix}")
    }

    fn message(suffix: &str, body: Value) -> IncomingMessage {
        IncomingMessage::new(topic(suffix), serde_json::to_vec(&body).unwrap())
    }

    fn job(id: &str) -> Value {
        json!({
            "execution": {
                "jobId": id,
                "jobDocument": {"operation": "Deploy-ROS-Firmware", "version": "2"}
            },
            "timestamp": 1700000000
        })
    }

    /// Executor that blocks each job until the test releases it.
    struct GatedExecutor {
        gate: Semaphore,
        succeed: AtomicBool,
        panic: AtomicBool,
        started: Mutex<Vec<String>>,
    }

    impl GatedExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                succeed: AtomicBool::new(true),
                panic: AtomicBool::new(false),
                started: Mutex::new(Vec::new()),
            })
        }

        fn release(&self) {
            self.gate.add_permits(1);
        }

        fn started(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl WorkExecutor for GatedExecutor {
        async fn execute(&self, job_id: &str, _job_document: &Value) -> bool {
            self.started.lock().unwrap().push(job_id.to_string());
            self.gate.acquire().await.unwrap().forget();
            if self.panic.load(Ordering::SeqCst) {
                panic!("executor blew up");
            }
            self.succeed.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        coordinator: Arc<JobCoordinator>,
        transport: Arc<MemoryTransport>,
        executor: Arc<GatedExecutor>,
        published: mpsc::UnboundedReceiver<Published>,
        inbox: Option<mpsc::UnboundedSender<IncomingMessage>>,
        stop: CancellationToken,
        run: JoinHandle<ShutdownReason>,
    }

    fn coordinator() -> (
        Arc<JobCoordinator>,
        Arc<MemoryTransport>,
        Arc<GatedExecutor>,
        mpsc::UnboundedReceiver<Published>,
    ) {
        let (transport, published) = MemoryTransport::new();
        let executor = GatedExecutor::new();
        let jobs = JobsClient::new(THING, transport.clone());
        let coordinator = Arc::new(JobCoordinator::new(jobs, executor.clone()));
        (coordinator, transport, executor, published)
    }

    impl Harness {
        fn start() -> Self {
            Self::start_with(|_| {})
        }

        fn start_with(prepare: impl FnOnce(&MemoryTransport)) -> Self {
            let (coordinator, transport, executor, published) = coordinator();
            prepare(transport.as_ref());
            let (inbox, rx) = mpsc::unbounded_channel();
            let stop = CancellationToken::new();
            let run = {
                let coordinator = coordinator.clone();
                let stop = stop.clone();
                tokio::spawn(async move { coordinator.run(rx, stop).await })
            };
            Self {
                coordinator,
                transport,
                executor,
                published,
                inbox: Some(inbox),
                stop,
                run,
            }
        }

        /// Start and consume the two startup requests.
        async fn started() -> Self {
            let mut harness = Self::start();
            assert!(harness.next_publish().await.topic.ends_with("/jobs/get"));
            assert!(harness.next_publish().await.topic.ends_with("/jobs/start-next"));
            harness
        }

        /// Started and idle with nothing queued.
        async fn idle() -> Self {
            let harness = Self::started().await;
            harness.send("start-next/accepted", json!({"timestamp": 1}));
            harness.wait_for(|s| s.phase() == Phase::Idle).await;
            harness
        }

        fn send(&self, suffix: &str, body: Value) {
            self.send_message(message(suffix, body));
        }

        fn send_message(&self, message: IncomingMessage) {
            self.inbox.as_ref().unwrap().send(message).unwrap();
        }

        async fn next_publish(&mut self) -> Published {
            tokio::time::timeout(Duration::from_secs(2), self.published.recv())
                .await
                .expect("timed out waiting for a publish")
                .expect("publish channel closed")
        }

        async fn assert_no_publish(&mut self) {
            let next = tokio::time::timeout(Duration::from_millis(100), self.published.recv()).await;
            assert!(next.is_err(), "unexpected publish: {:?}", next.unwrap());
        }

        async fn wait_for(&self, condition: impl Fn(&CoordinatorState) -> bool) {
            tokio::time::timeout(Duration::from_secs(2), async {
                while !condition(&self.coordinator.snapshot()) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("timed out waiting for coordinator state");
        }

        async fn finish(self) -> (ShutdownReason, Arc<MemoryTransport>) {
            let reason = tokio::time::timeout(Duration::from_secs(2), self.run)
                .await
                .expect("coordinator did not finish")
                .unwrap();
            (reason, self.transport)
        }
    }

    #[tokio::test]
    async fn startup_confirms_subscriptions_before_requests() {
        let harness = Harness::started().await;
        let calls = harness.transport.calls();
        assert_eq!(
            calls,
            vec![
                Call::Subscribe(topic("get/accepted")),
                Call::Subscribe(topic("get/rejected")),
                Call::Publish(topic("get")),
                Call::Subscribe(topic("notify-next")),
                Call::Subscribe(topic("start-next/accepted")),
                Call::Subscribe(topic("start-next/rejected")),
                Call::Subscribe(topic("+/update/accepted")),
                Call::Subscribe(topic("+/update/rejected")),
                Call::Publish(topic("start-next")),
            ]
        );
        assert_eq!(harness.coordinator.snapshot().phase(), Phase::Starting);
    }

    #[tokio::test]
    async fn empty_queue_stays_idle_without_status_update() {
        let mut harness = Harness::idle().await;
        harness.assert_no_publish().await;
        assert!(harness.executor.started().is_empty());
        assert!(!harness.coordinator.snapshot().is_executing());
    }

    #[tokio::test]
    async fn successful_job_reports_succeeded_once() {
        let mut harness = Harness::started().await;
        harness.send("start-next/accepted", job("job-1"));
        harness.wait_for(|s| s.phase() == Phase::Executing).await;
        harness.executor.release();

        let update = harness.next_publish().await;
        assert_eq!(update.topic, topic("job-1/update"));
        assert_eq!(update.payload["status"], "SUCCEEDED");

        harness.send("job-1/update/accepted", json!({"timestamp": 2}));
        harness.wait_for(|s| s.phase() == Phase::Idle).await;
        harness.assert_no_publish().await;
        assert_eq!(harness.executor.started(), vec!["job-1"]);
    }

    #[tokio::test]
    async fn failed_job_reports_failed() {
        let mut harness = Harness::started().await;
        harness.executor.succeed.store(false, Ordering::SeqCst);
        harness.send("start-next/accepted", job("job-1"));
        harness.executor.release();

        let update = harness.next_publish().await;
        assert_eq!(update.topic, topic("job-1/update"));
        assert_eq!(update.payload["status"], "FAILED");
        assert!(!harness.coordinator.snapshot().disconnect_requested());
    }

    #[tokio::test]
    async fn panicking_executor_reports_failed() {
        let mut harness = Harness::started().await;
        harness.executor.panic.store(true, Ordering::SeqCst);
        harness.send("start-next/accepted", job("job-1"));
        harness.executor.release();

        let update = harness.next_publish().await;
        assert_eq!(update.payload["status"], "FAILED");
    }

    #[tokio::test]
    async fn start_next_rejection_disconnects() {
        let mut harness = Harness::started().await;
        harness.send(
            "start-next/rejected",
            json!({"code": "LimitExceeded", "message": "Too many requests"}),
        );
        harness.assert_no_publish().await;

        let (reason, transport) = harness.finish().await;
        match reason {
            ShutdownReason::Failed(e) => assert_eq!(e.rejection_code(), Some("LimitExceeded")),
            other => panic!("unexpected reason: {other}"),
        }
        assert_eq!(transport.disconnects(), 1);
        assert_eq!(transport.calls().last(), Some(&Call::Disconnect));
    }

    #[tokio::test]
    async fn job_changes_while_busy_coalesce_into_one_start() {
        let mut harness = Harness::started().await;
        harness.send("start-next/accepted", job("job-a"));
        harness.wait_for(|s| s.phase() == Phase::Executing).await;

        harness.send("notify-next", job("job-b"));
        harness.send("notify-next", job("job-c"));
        harness.wait_for(|s| s.is_next_waiting()).await;
        harness.executor.release();

        let update = harness.next_publish().await;
        assert_eq!(update.topic, topic("job-a/update"));
        harness.send("job-a/update/accepted", json!({}));

        let start = harness.next_publish().await;
        assert_eq!(start.topic, topic("start-next"));
        harness.assert_no_publish().await;
        let state = harness.coordinator.snapshot();
        assert_eq!(state.phase(), Phase::Starting);
        assert!(!state.is_next_waiting());
    }

    #[tokio::test]
    async fn job_change_while_idle_starts_next_job() {
        let mut harness = Harness::idle().await;
        harness.send("notify-next", job("job-2"));
        let start = harness.next_publish().await;
        assert_eq!(start.topic, topic("start-next"));
        assert!(start.payload["clientToken"].is_string());
    }

    #[tokio::test]
    async fn empty_job_change_is_ignored() {
        let mut harness = Harness::idle().await;
        harness.send("notify-next", json!({"timestamp": 5}));
        harness.assert_no_publish().await;
        assert_eq!(harness.coordinator.snapshot().phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn initial_listing_is_recorded_only() {
        let mut harness = Harness::started().await;
        harness.send(
            "get/accepted",
            json!({
                "inProgressJobs": [],
                "queuedJobs": [{"jobId": "job-1", "queuedAt": 1700000000}],
                "timestamp": 1700000001
            }),
        );
        harness.wait_for(|s| s.has_received_initial_listing()).await;

        let pending = harness.coordinator.pending_jobs();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_id, "job-1");
        harness.assert_no_publish().await;
        assert!(harness.executor.started().is_empty());
    }

    #[tokio::test]
    async fn update_rejection_disconnects() {
        let mut harness = Harness::started().await;
        harness.send("start-next/accepted", job("job-1"));
        harness.executor.release();
        harness.next_publish().await;

        harness.send(
            "job-1/update/rejected",
            json!({"code": "InvalidStateTransition", "message": "already terminal"}),
        );
        let (reason, transport) = harness.finish().await;
        assert!(matches!(
            reason,
            ShutdownReason::Failed(JobsError::Rejected {
                request: Request::UpdateJobExecution,
                ..
            })
        ));
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test]
    async fn listing_rejection_disconnects() {
        let harness = Harness::started().await;
        harness.send("get/rejected", json!({"code": "Throttled"}));
        let (reason, _) = harness.finish().await;
        assert!(reason.is_failure());
    }

    #[tokio::test]
    async fn malformed_payload_is_fatal() {
        let harness = Harness::started().await;
        harness.send_message(IncomingMessage::new(topic("start-next/accepted"), "not json"));
        let (reason, transport) = harness.finish().await;
        assert!(matches!(
            reason,
            ShutdownReason::Failed(JobsError::Decode { .. })
        ));
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test]
    async fn unrouted_topic_is_ignored() {
        let mut harness = Harness::idle().await;
        harness.send_message(IncomingMessage::new("clients/other/hello", "{}"));
        harness.assert_no_publish().await;
        assert!(!harness.coordinator.snapshot().disconnect_requested());
    }

    #[tokio::test]
    async fn publish_failure_shuts_down() {
        let harness = Harness::start_with(|t| t.fail_publishes_to("/start-next"));
        let (reason, transport) = harness.finish().await;
        assert!(matches!(
            reason,
            ShutdownReason::Failed(JobsError::Publish {
                request: Request::StartNextPendingJobExecution,
                ..
            })
        ));
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test]
    async fn stop_request_disconnects_cleanly() {
        let harness = Harness::idle().await;
        harness.stop.cancel();
        let (reason, transport) = harness.finish().await;
        assert!(matches!(reason, ShutdownReason::Requested));
        assert!(!reason.is_failure());
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test]
    async fn closed_inbox_ends_session() {
        let mut harness = Harness::started().await;
        harness.inbox.take();
        let (reason, transport) = harness.finish().await;
        assert!(matches!(reason, ShutdownReason::TransportClosed));
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (coordinator, transport, _, _) = coordinator();
        coordinator.shutdown(ShutdownReason::Requested).await;
        coordinator.shutdown(ShutdownReason::TransportClosed).await;

        assert_eq!(transport.disconnects(), 1);
        assert!(matches!(
            lock(&coordinator.reason).as_ref(),
            Some(ShutdownReason::Requested)
        ));
    }

    #[tokio::test]
    async fn no_requests_after_disconnect() {
        let (coordinator, transport, _, _) = coordinator();
        coordinator.shutdown(ShutdownReason::Requested).await;

        coordinator.try_start_next_job().await;
        coordinator
            .handle_message(message("notify-next", job("job-1")))
            .await;
        coordinator
            .handle_message(message("start-next/accepted", job("job-1")))
            .await;

        assert_eq!(transport.calls(), vec![Call::Disconnect]);
        assert!(coordinator.snapshot().disconnect_requested());
    }

    #[tokio::test]
    async fn repeated_start_acceptance_while_executing_runs_one_job() {
        let mut harness = Harness::started().await;
        harness.send("start-next/accepted", job("job-1"));
        harness.wait_for(|s| s.phase() == Phase::Executing).await;

        harness.send("start-next/accepted", job("job-2"));
        harness.assert_no_publish().await;
        assert_eq!(harness.coordinator.snapshot().phase(), Phase::Executing);

        harness.executor.release();
        harness.executor.release();
        let update = harness.next_publish().await;
        assert_eq!(update.topic, topic("job-1/update"));
        harness.assert_no_publish().await;
        assert_eq!(harness.executor.started(), vec!["job-1"]);
    }

    #[tokio::test]
    async fn update_acceptance_for_another_job_is_ignored() {
        let mut harness = Harness::started().await;
        harness.send("start-next/accepted", job("job-1"));
        harness.executor.release();
        harness.next_publish().await;
        harness.wait_for(|s| s.phase() == Phase::Reporting).await;

        harness.send("job-9/update/accepted", json!({"timestamp": 3}));
        harness.assert_no_publish().await;
        assert_eq!(harness.coordinator.snapshot().phase(), Phase::Reporting);

        harness.send("job-1/update/accepted", json!({"timestamp": 4}));
        harness.wait_for(|s| s.phase() == Phase::Idle).await;
    }

    #[tokio::test]
    async fn concurrent_job_changes_start_once() {
        let (coordinator, transport, _, _) = coordinator();
        tokio::join!(
            coordinator.handle_message(message("notify-next", job("job-1"))),
            coordinator.handle_message(message("notify-next", job("job-2"))),
            coordinator.handle_message(message("notify-next", job("job-3"))),
        );

        let starts = transport
            .calls()
            .into_iter()
            .filter(|c| *c == Call::Publish(topic("start-next")))
            .count();
        assert_eq!(starts, 1);
        assert!(coordinator.snapshot().is_next_waiting());
    }

    #[tokio::test]
    async fn completion_after_disconnect_is_not_reported() {
        let (coordinator, transport, executor, _) = coordinator();
        coordinator.try_start_next_job().await;
        coordinator
            .handle_message(message("start-next/accepted", job("job-1")))
            .await;
        assert_eq!(coordinator.snapshot().phase(), Phase::Executing);

        coordinator.shutdown(ShutdownReason::Requested).await;
        executor.release();
        let completion = coordinator.completions_rx.lock().await.recv().await.unwrap();
        coordinator.complete(completion).await;

        let updates = transport
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Publish(t) if t.ends_with("/update")))
            .count();
        assert_eq!(updates, 0);
    }
}
