//! Test fixtures and collaborator fakes shared by the engine test modules.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use formflow_core::audit::InMemoryAuditSink;
use formflow_core::config::RetryConfig;
use formflow_core::domain::series::{DocumentSeries, GenerateOn, ProjectId, ResetPolicy, SeriesId};
use formflow_core::domain::submission::{Submission, SubmissionId, SubmissionStatus};
use formflow_core::domain::workflow::{
    Assignee, DocumentTypeId, RoleId, Stage, StageId, UserId, Workflow, WorkflowId,
};
use formflow_core::workflow::gate::SignatureStatus;
use formflow_core::{
    CollaboratorError, DatabaseValueSource, FieldValue, IdentityProvider, NotificationSender,
    SignatureProvider, SubmissionFieldReader,
};
use formflow_db::repositories::{
    InMemoryBlockingLogRepository, InMemoryBlockingRuleRepository, InMemoryDelegationRepository,
    InMemoryHistoryRepository, InMemoryNumberAuditRepository, InMemorySequenceCounterStore,
    InMemorySeriesRepository, InMemorySubmissionRepository, InMemoryWorkflowRepository,
    RepositoryError, SubmissionRepository,
};

use crate::assignees::AssigneeResolver;
use crate::blocking::BlockingService;
use crate::engine::{ApprovalWorkflowEngine, EngineServices};
use crate::numbering::NumberingService;

#[derive(Default)]
pub struct FakeIdentity {
    roles: Mutex<HashMap<RoleId, HashSet<UserId>>>,
}

impl FakeIdentity {
    pub fn with_role(role: &str, members: &[&str]) -> Self {
        let identity = Self::default();
        identity.add_role(role, members);
        identity
    }

    pub fn add_role(&self, role: &str, members: &[&str]) {
        let members = members.iter().map(|m| UserId(m.to_string())).collect();
        self.roles
            .lock()
            .expect("identity lock")
            .insert(RoleId(role.to_string()), members);
    }
}

#[async_trait::async_trait]
impl IdentityProvider for FakeIdentity {
    async fn resolve_role_members(
        &self,
        role: &RoleId,
    ) -> Result<HashSet<UserId>, CollaboratorError> {
        Ok(self.roles.lock().expect("identity lock").get(role).cloned().unwrap_or_default())
    }

    async fn display_name(&self, user: &UserId) -> Result<String, CollaboratorError> {
        Ok(user.0.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentNotification {
    pub users: Vec<UserId>,
    pub template_code: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().expect("notifier lock").clone()
    }
}

#[async_trait::async_trait]
impl NotificationSender for RecordingNotifier {
    async fn notify(
        &self,
        users: &[UserId],
        template_code: &str,
        _data: &BTreeMap<String, String>,
    ) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError("smtp relay unreachable".to_string()));
        }
        self.sent.lock().expect("notifier lock").push(SentNotification {
            users: users.to_vec(),
            template_code: template_code.to_string(),
        });
        Ok(())
    }
}

/// Signature fake: unset (submission, stage) pairs report `Pending`, so a
/// test must explicitly complete a signature to pass the gate.
#[derive(Default)]
pub struct FakeSignatures {
    statuses: Mutex<HashMap<(SubmissionId, StageId), SignatureStatus>>,
}

impl FakeSignatures {
    pub fn set(&self, submission: &str, stage: &str, status: SignatureStatus) {
        self.statuses.lock().expect("signature lock").insert(
            (SubmissionId(submission.to_string()), StageId(stage.to_string())),
            status,
        );
    }
}

#[async_trait::async_trait]
impl SignatureProvider for FakeSignatures {
    async fn signature_status(
        &self,
        submission: &SubmissionId,
        stage: &StageId,
    ) -> Result<SignatureStatus, CollaboratorError> {
        Ok(self
            .statuses
            .lock()
            .expect("signature lock")
            .get(&(submission.clone(), stage.clone()))
            .copied()
            .unwrap_or(SignatureStatus::Pending))
    }
}

#[derive(Default)]
pub struct FakeFields {
    values: Mutex<HashMap<(SubmissionId, String), FieldValue>>,
}

impl FakeFields {
    pub fn set(&self, submission: &str, field_code: &str, value: FieldValue) {
        self.values
            .lock()
            .expect("fields lock")
            .insert((SubmissionId(submission.to_string()), field_code.to_string()), value);
    }
}

#[async_trait::async_trait]
impl SubmissionFieldReader for FakeFields {
    async fn field_value(
        &self,
        submission: &SubmissionId,
        field_code: &str,
    ) -> Result<Option<FieldValue>, CollaboratorError> {
        Ok(self
            .values
            .lock()
            .expect("fields lock")
            .get(&(submission.clone(), field_code.to_string()))
            .cloned())
    }
}

#[derive(Default)]
pub struct FakeDatabaseSource {
    values: Mutex<HashMap<String, FieldValue>>,
}

impl FakeDatabaseSource {
    pub fn set(&self, key: &str, value: FieldValue) {
        self.values.lock().expect("lookup lock").insert(key.to_string(), value);
    }
}

#[async_trait::async_trait]
impl DatabaseValueSource for FakeDatabaseSource {
    async fn lookup(&self, key: &str) -> Result<Option<FieldValue>, CollaboratorError> {
        Ok(self.values.lock().expect("lookup lock").get(key).cloned())
    }
}

/// Submission store that reports version conflicts on demand, for driving
/// the engine's retry loop through the paths a concurrent writer would.
pub struct FaultySubmissionStore {
    inner: Arc<InMemorySubmissionRepository>,
    conflicts_left: AtomicU32,
}

impl FaultySubmissionStore {
    fn new(inner: Arc<InMemorySubmissionRepository>) -> Self {
        Self { inner, conflicts_left: AtomicU32::new(0) }
    }

    /// The next `count` calls to `update_versioned` fail with a stale-token
    /// conflict without touching the stored row.
    pub fn fail_next_updates(&self, count: u32) {
        self.conflicts_left.store(count, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SubmissionRepository for FaultySubmissionStore {
    async fn find_by_id(
        &self,
        id: &SubmissionId,
    ) -> Result<Option<Submission>, RepositoryError> {
        self.inner.find_by_id(id).await
    }

    async fn insert(&self, submission: Submission) -> Result<(), RepositoryError> {
        self.inner.insert(submission).await
    }

    async fn update_versioned(
        &self,
        submission: Submission,
    ) -> Result<Submission, RepositoryError> {
        let planned = self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if planned.is_ok() {
            return Err(RepositoryError::Conflict {
                entity: "submission".to_string(),
                id: submission.id.0.clone(),
            });
        }
        self.inner.update_versioned(submission).await
    }

    async fn list_in_approval(&self) -> Result<Vec<Submission>, RepositoryError> {
        self.inner.list_in_approval().await
    }
}

pub fn parse_assignee(spec: &str) -> Assignee {
    match spec.split_once(':') {
        Some(("role", name)) => Assignee::Role(RoleId(name.to_string())),
        Some(("user", name)) => Assignee::User(UserId(name.to_string())),
        _ => panic!("assignee spec must be `role:<id>` or `user:<id>`, got `{spec}`"),
    }
}

pub fn stage(id: &str, order: u32, assignees: &[&str]) -> Stage {
    Stage {
        id: StageId(id.to_string()),
        workflow_id: WorkflowId("wf-1".to_string()),
        order,
        amount_field_code: None,
        min_amount: None,
        max_amount: None,
        is_final: false,
        minimum_required_assignees: None,
        requires_signature: false,
        assignees: assignees.iter().map(|spec| parse_assignee(spec)).collect(),
    }
}

pub fn workflow(stages: Vec<Stage>) -> Workflow {
    Workflow {
        id: WorkflowId("wf-1".to_string()),
        name: "Purchase approval".to_string(),
        document_type_id: DocumentTypeId("purchase".to_string()),
        active: true,
        stages,
    }
}

/// A one-stage workflow and a clone of that stage, for resolver tests.
pub fn workflow_with_stage(assignees: &[&str]) -> (Workflow, Stage) {
    let wf = workflow(vec![stage("s-10", 10, assignees)]);
    let single = wf.stages[0].clone();
    (wf, single)
}

pub fn draft_submission(id: &str) -> Submission {
    let now = Utc::now();
    Submission {
        id: SubmissionId(id.to_string()),
        document_type_id: DocumentTypeId("purchase".to_string()),
        project_id: ProjectId("proj-1".to_string()),
        workflow_id: None,
        status: SubmissionStatus::Draft,
        current_stage_id: None,
        document_number: None,
        version: 1,
        created_by: UserId("u-author".to_string()),
        created_at: now,
        updated_at: now,
    }
}

pub fn yearly_series(id: &str, trigger: GenerateOn) -> DocumentSeries {
    DocumentSeries {
        id: SeriesId(id.to_string()),
        project_id: ProjectId("proj-1".to_string()),
        document_type_id: DocumentTypeId("purchase".to_string()),
        code: "PRJ".to_string(),
        name: "Project documents".to_string(),
        template: "PRJ-{YYYY}-{SEQ:000}".to_string(),
        sequence_start: 1,
        sequence_padding: 3,
        reset_policy: ResetPolicy::Yearly,
        generate_on: trigger,
        is_default: false,
        active: true,
    }
}

/// Fully wired engine over in-memory stores and fakes.
pub struct Harness {
    pub engine: Arc<ApprovalWorkflowEngine>,
    pub workflows: Arc<InMemoryWorkflowRepository>,
    pub submissions: Arc<InMemorySubmissionRepository>,
    pub submission_faults: Arc<FaultySubmissionStore>,
    pub history: Arc<InMemoryHistoryRepository>,
    pub delegations: Arc<InMemoryDelegationRepository>,
    pub series: Arc<InMemorySeriesRepository>,
    pub number_audits: Arc<InMemoryNumberAuditRepository>,
    pub rules: Arc<InMemoryBlockingRuleRepository>,
    pub blocking_log: Arc<InMemoryBlockingLogRepository>,
    pub identity: Arc<FakeIdentity>,
    pub notifier: Arc<RecordingNotifier>,
    pub signatures: Arc<FakeSignatures>,
    pub fields: Arc<FakeFields>,
    pub lookups: Arc<FakeDatabaseSource>,
    pub audit: InMemoryAuditSink,
}

impl Harness {
    pub fn new() -> Self {
        let workflows = Arc::new(InMemoryWorkflowRepository::new());
        let submissions = Arc::new(InMemorySubmissionRepository::new());
        let submission_faults = Arc::new(FaultySubmissionStore::new(submissions.clone()));
        let history = Arc::new(InMemoryHistoryRepository::new());
        let delegations = Arc::new(InMemoryDelegationRepository::new());
        let series = Arc::new(InMemorySeriesRepository::new());
        let number_audits = Arc::new(InMemoryNumberAuditRepository::new());
        let counter = Arc::new(InMemorySequenceCounterStore::new());
        let rules = Arc::new(InMemoryBlockingRuleRepository::new());
        let blocking_log = Arc::new(InMemoryBlockingLogRepository::new());

        let identity = Arc::new(FakeIdentity::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let signatures = Arc::new(FakeSignatures::default());
        let fields = Arc::new(FakeFields::default());
        let lookups = Arc::new(FakeDatabaseSource::default());
        let audit = InMemoryAuditSink::default();

        let assignees =
            Arc::new(AssigneeResolver::new(identity.clone(), delegations.clone()));
        let numbering = Arc::new(NumberingService::new(
            series.clone(),
            counter,
            number_audits.clone(),
            Arc::new(audit.clone()),
        ));
        let blocking = Arc::new(BlockingService::new(
            rules.clone(),
            blocking_log.clone(),
            fields.clone(),
            lookups.clone(),
            Arc::new(audit.clone()),
        ));

        let engine = Arc::new(ApprovalWorkflowEngine::new(EngineServices {
            workflows: workflows.clone(),
            submissions: submission_faults.clone(),
            history: history.clone(),
            assignees,
            numbering,
            blocking,
            signatures: signatures.clone(),
            fields: fields.clone(),
            notifications: notifier.clone(),
            audit: Arc::new(audit.clone()),
            retry: RetryConfig { max_attempts: 3, backoff_ms: 1 },
        }));

        Self {
            engine,
            workflows,
            submissions,
            submission_faults,
            history,
            delegations,
            series,
            number_audits,
            rules,
            blocking_log,
            identity,
            notifier,
            signatures,
            fields,
            lookups,
            audit,
        }
    }
}
