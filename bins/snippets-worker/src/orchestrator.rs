/// Job Orchestrator - Pipeline Glue
///
/// **Responsibility:**
/// Run one job end to end: resolve → fetch → execute → report.
///
/// **Architecture:**
/// 1. Resolve the language profile first; it is the cheapest check
/// 2. Fetch the file into a directory owned by this job only (fetcher.rs)
/// 3. Run it in the sandbox runtime (engine.rs / process.rs)
/// 4. Send exactly one reply (reporter.rs)
///
/// Every job is an independent task. There is no shared job table and
/// nothing here is mutated after construction.

use crate::engine::SandboxRuntime;
use crate::error::{BridgeError, FetchError, PipelineError};
use crate::fetcher::AssetFetcher;
use crate::reporter::Reporter;
use async_trait::async_trait;
use snippets_common::profile::{LanguageProfile, LanguageTable};
use snippets_common::types::{Credential, FileMetadata, InboundEvent, JobRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Resolves a file reference back to fresh metadata
#[async_trait]
pub trait FileLookup: Send + Sync {
    async fn file_info(&self, file_id: &str) -> Result<FileMetadata, BridgeError>;
}

/// Pipeline stage a failure originated in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Fetch,
    Execute,
}

/// Per-job state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    LanguageResolved,
    Fetched,
    Executed,
    Reported,
    Failed { stage: Stage },
}

/// A reaction on a previously shared file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RerunTrigger {
    pub user: String,
    pub file_id: String,
    pub reaction: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerunOutcome {
    /// Not a re-run request, or our own acknowledgement echoing back
    Ignored,
    LookupFailed,
    Submitted(JobState),
}

/// Static settings shared by every job
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Parent of the per-job working directories
    pub folder: PathBuf,
    pub credential: Credential,
    /// Our own actor identity on the chat platform
    pub identity: String,
    /// Reaction used as acknowledgement, and as the re-run request
    pub ack_marker: String,
    pub keep_workdirs: bool,
}

/// Name the file is stored and run under.
///
/// Placeholder names (`-.py`) and any other name starting with a dash get
/// a random identifier; some runtimes reject files without a proper name. Only the last path component is kept so a name
/// can never point outside the job directory.
pub fn entry_file_name(file_name: &str) -> String {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");

    // Passed after the interpreter, a leading dash reads as an option
    if base.is_empty() || base.starts_with('-') {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        return id;
    }
    base.to_string()
}

/// Directory owned by a single job: `<folder>/<job id>/`
struct JobWorkspace {
    dir: PathBuf,
}

impl JobWorkspace {
    async fn create(folder: &Path, job_id: uuid::Uuid) -> std::io::Result<Self> {
        let dir = folder.join(job_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        // Bind mounts need an absolute host path
        let dir = tokio::fs::canonicalize(&dir).await?;
        Ok(Self { dir })
    }

    async fn cleanup(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "Failed to remove job directory");
        }
    }
}

pub struct Orchestrator {
    languages: LanguageTable,
    settings: OrchestratorSettings,
    fetcher: Arc<dyn AssetFetcher>,
    runtime: Arc<dyn SandboxRuntime>,
    files: Arc<dyn FileLookup>,
    reporter: Reporter,
}

impl Orchestrator {
    pub fn new(
        languages: LanguageTable,
        settings: OrchestratorSettings,
        fetcher: Arc<dyn AssetFetcher>,
        runtime: Arc<dyn SandboxRuntime>,
        files: Arc<dyn FileLookup>,
        reporter: Reporter,
    ) -> Self {
        Self {
            languages,
            settings,
            fetcher,
            runtime,
            files,
            reporter,
        }
    }

    /// Hand an inbound event to its own task. Never blocks on a job.
    pub fn dispatch(self: &Arc<Self>, event: InboundEvent) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match event {
                InboundEvent::FileShared { file, reply_target } => {
                    this.submit_file(file, reply_target).await;
                }
                InboundEvent::ReactionAdded {
                    user,
                    file_id,
                    reaction,
                } => {
                    let trigger = RerunTrigger {
                        user,
                        file_id,
                        reaction,
                    };
                    this.resubmit_from_reference(trigger).await;
                }
                InboundEvent::SupportQuery { reply_target } => {
                    let text = this.languages.support_text();
                    this.reporter.reply(&reply_target, &text).await;
                }
                InboundEvent::ConfigQuery {
                    language,
                    reply_target,
                } => {
                    // Dry run: resolution only, nothing is fetched or executed
                    let text = this.languages.describe(&language);
                    this.reporter.reply(&reply_target, &text).await;
                }
            }
        })
    }

    /// Build a job from collaborator metadata and run it
    pub async fn submit_file(&self, file: FileMetadata, reply_target: String) -> JobState {
        // An unsupported language is reported as such, whatever the locator looks like
        if let Err(e) = self.languages.resolve(&file.filetype) {
            let err = PipelineError::from(e);
            self.reporter.report_error(&reply_target, &err).await;
            return JobState::Failed { stage: err.stage() };
        }

        match JobRequest::from_file(&file, self.settings.credential.clone(), reply_target.clone()) {
            Ok(job) => self.submit(job).await,
            Err(e) => {
                let err = PipelineError::from(FetchError::InvalidLocator(e.to_string()));
                self.reporter.report_error(&reply_target, &err).await;
                JobState::Failed { stage: err.stage() }
            }
        }
    }

    /// Run one job to completion and send its single reply
    pub async fn submit(&self, job: JobRequest) -> JobState {
        let span = info_span!(
            "job",
            job_id = %job.id,
            file_id = %job.file_id,
            language = %job.declared_language
        );

        async {
            info!(file_name = %job.file_name, state = ?JobState::Received, "Received job");

            let mut workspace = None;
            let state = match self.run_pipeline(&job, &mut workspace).await {
                Ok(()) => JobState::Reported,
                Err(err) => {
                    self.reporter.report_error(&job.reply_target, &err).await;
                    JobState::Failed { stage: err.stage() }
                }
            };

            if let Some(workspace) = workspace {
                if self.settings.keep_workdirs {
                    debug!(dir = %workspace.dir.display(), "Keeping job directory");
                } else {
                    workspace.cleanup().await;
                }
            }

            info!(state = ?state, "Job finished");
            state
        }
        .instrument(span)
        .await
    }

    /// Stages in strict sequence; the first failure short-circuits to the caller
    async fn run_pipeline(
        &self,
        job: &JobRequest,
        workspace: &mut Option<JobWorkspace>,
    ) -> Result<(), PipelineError> {
        let profile: LanguageProfile = self.languages.resolve(&job.declared_language)?;
        debug!(
            state = ?JobState::LanguageResolved,
            image = %profile.image,
            timeout_seconds = profile.timeout_seconds,
            memory_mb = profile.memory_limit_mb,
            crop = profile.crop_length,
            "Language resolved"
        );

        self.reporter.acknowledge(&job.file_id).await;

        let entry_file = entry_file_name(&job.file_name);
        let dir = &workspace
            .insert(
                JobWorkspace::create(&self.settings.folder, job.id)
                    .await
                    .map_err(PipelineError::Workspace)?,
            )
            .dir;

        self.fetcher
            .fetch(&job.locator, &job.credential, &dir.join(&entry_file))
            .await?;
        debug!(state = ?JobState::Fetched, entry_file = %entry_file, "Snippet fetched");

        let outcome = self.runtime.launch(&profile, dir, &entry_file).await?;
        info!(
            state = ?JobState::Executed,
            runtime = self.runtime.name(),
            exit_code = outcome.exit_code,
            succeeded = outcome.succeeded(),
            execution_ms = outcome.execution_time_ms,
            "Execution completed"
        );

        self.reporter
            .report_outcome(&job.reply_target, &outcome, profile.crop_length)
            .await;
        Ok(())
    }

    /// Re-run a previously shared file from a reaction on it.
    /// Our own acknowledgement must never trigger a run, or every run
    /// would acknowledge itself into another one.
    pub async fn resubmit_from_reference(&self, trigger: RerunTrigger) -> RerunOutcome {
        if trigger.user == self.settings.identity {
            debug!(file_id = %trigger.file_id, "Ignoring our own acknowledgement");
            return RerunOutcome::Ignored;
        }
        if trigger.reaction != self.settings.ack_marker {
            return RerunOutcome::Ignored;
        }

        info!(file_id = %trigger.file_id, user = %trigger.user, "Re-run requested");

        match self.files.file_info(&trigger.file_id).await {
            Ok(file) => {
                // Replies to a re-run go to the file itself
                let state = self.submit_file(file, trigger.file_id.clone()).await;
                RerunOutcome::Submitted(state)
            }
            Err(e) => {
                error!(file_id = %trigger.file_id, error = %e, "Failed to look up file for re-run");
                self.reporter
                    .reply(&trigger.file_id, "I could not find this snippet anymore")
                    .await;
                RerunOutcome::LookupFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ExecutionOutcome, Termination, TIMEOUT_EXIT_CODE};
    use crate::error::SandboxError;
    use crate::fetcher::HttpFetcher;
    use crate::reporter::ReplySink;
    use snippets_common::config::ServiceConfig;
    use snippets_common::types::{AckOutcome, DownloadLocator};
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tracing_subscriber::layer::SubscriberExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BOT_ID: &str = "UBOT";

    #[derive(Default)]
    struct FakeChat {
        replies: Mutex<Vec<(String, String)>>,
        acked: Mutex<HashSet<String>>,
        files: Mutex<HashMap<String, FileMetadata>>,
    }

    impl FakeChat {
        fn replies(&self) -> Vec<(String, String)> {
            self.replies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReplySink for FakeChat {
        async fn send_reply(&self, target: &str, text: &str) -> Result<(), BridgeError> {
            self.replies
                .lock()
                .unwrap()
                .push((target.to_string(), text.to_string()));
            Ok(())
        }

        async fn acknowledge(&self, file_id: &str) -> Result<AckOutcome, BridgeError> {
            if self.acked.lock().unwrap().insert(file_id.to_string()) {
                Ok(AckOutcome::Acknowledged)
            } else {
                Ok(AckOutcome::AlreadyDone)
            }
        }
    }

    #[async_trait]
    impl FileLookup for FakeChat {
        async fn file_info(&self, file_id: &str) -> Result<FileMetadata, BridgeError> {
            self.files
                .lock()
                .unwrap()
                .get(file_id)
                .cloned()
                .ok_or_else(|| BridgeError::UnknownFile(file_id.to_string()))
        }
    }

    /// Fetcher that only counts calls
    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AssetFetcher for CountingFetcher {
        async fn fetch(
            &self,
            _locator: &DownloadLocator,
            _credential: &Credential,
            destination: &Path,
        ) -> Result<PathBuf, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(destination, "print('hello')")
                .await
                .map_err(|source| FetchError::Io {
                    path: destination.to_path_buf(),
                    source,
                })?;
            Ok(destination.to_path_buf())
        }
    }

    /// Runtime that checks the fetched file and plays back a canned outcome
    struct ScriptedRuntime {
        outcome: Result<ExecutionOutcome, String>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedRuntime {
        fn exits(stdout: &str, exit_code: i64) -> Self {
            Self {
                outcome: Ok(ExecutionOutcome {
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                    exit_code,
                    termination: Termination::Exited,
                    timeout_seconds: 5,
                    execution_time_ms: 3,
                }),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn times_out() -> Self {
            Self {
                outcome: Ok(ExecutionOutcome {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: TIMEOUT_EXIT_CODE,
                    termination: Termination::TimedOut,
                    timeout_seconds: 5,
                    execution_time_ms: 5000,
                }),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn unavailable() -> Self {
            Self {
                outcome: Err("Cannot connect to the Docker daemon".to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SandboxRuntime for ScriptedRuntime {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn launch(
            &self,
            _profile: &LanguageProfile,
            work_dir: &Path,
            entry_file: &str,
        ) -> Result<ExecutionOutcome, SandboxError> {
            let source = tokio::fs::read_to_string(work_dir.join(entry_file))
                .await
                .unwrap_or_default();
            self.seen
                .lock()
                .unwrap()
                .push((entry_file.to_string(), source));
            self.outcome.clone().map_err(SandboxError::Launch)
        }
    }

    /// Counts ERROR level events emitted while installed
    #[derive(Clone, Default)]
    struct ErrorCounter(Arc<AtomicUsize>);

    impl ErrorCounter {
        fn install(&self) -> tracing::subscriber::DefaultGuard {
            tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
        }

        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        chat: Arc<FakeChat>,
        folder: tempfile::TempDir,
    }

    fn languages() -> LanguageTable {
        ServiceConfig::from_json(
            r#"{
                "timeout": 5,
                "crop": 2000,
                "memory": 64,
                "languages": {
                    "python": { "image": "python:3-alpine", "command": "python" },
                    "shell": { "image": "alpine:3", "command": "sh", "timeout": 1, "crop": 40 }
                }
            }"#,
        )
        .unwrap()
        .language_table()
        .unwrap()
    }

    fn harness(fetcher: Arc<dyn AssetFetcher>, runtime: Arc<dyn SandboxRuntime>) -> Harness {
        let folder = tempfile::tempdir().unwrap();
        let chat = Arc::new(FakeChat::default());
        let settings = OrchestratorSettings {
            folder: folder.path().to_path_buf(),
            credential: Credential::new("xoxb-token"),
            identity: BOT_ID.to_string(),
            ack_marker: "repeat".to_string(),
            keep_workdirs: false,
        };
        let orchestrator = Orchestrator::new(
            languages(),
            settings,
            fetcher,
            runtime,
            chat.clone(),
            Reporter::new(chat.clone()),
        );
        Harness {
            orchestrator: Arc::new(orchestrator),
            chat,
            folder,
        }
    }

    fn file(id: &str, name: &str, filetype: &str, url: &str) -> FileMetadata {
        FileMetadata {
            id: id.to_string(),
            name: name.to_string(),
            filetype: filetype.to_string(),
            url_private_download: url.to_string(),
        }
    }

    async fn serve(server: &MockServer, file_path: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(file_path))
            .and(header("authorization", "Bearer xoxb-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(server)
            .await;
    }

    #[test]
    fn test_placeholder_name_is_replaced() {
        let name = entry_file_name("-.py");
        assert_eq!(name.len(), 8);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(entry_file_name("-.py"), entry_file_name("-.py"));
    }

    #[test]
    fn test_leading_dash_name_is_replaced() {
        let name = entry_file_name("-m.py");
        assert_eq!(name.len(), 8);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!entry_file_name("--version").starts_with('-'));
        assert_eq!(entry_file_name("a-b.py"), "a-b.py");
    }

    #[test]
    fn test_real_name_is_kept() {
        assert_eq!(entry_file_name("fizzbuzz.py"), "fizzbuzz.py");
    }

    #[test]
    fn test_name_cannot_escape_job_directory() {
        assert_eq!(entry_file_name("../../etc/passwd"), "passwd");
        assert_eq!(entry_file_name("..").len(), 8);
        assert_eq!(entry_file_name("").len(), 8);
    }

    #[tokio::test]
    async fn test_unknown_language_never_fetches() {
        let fetcher = Arc::new(CountingFetcher::default());
        let h = harness(fetcher.clone(), Arc::new(ScriptedRuntime::exits("", 0)));

        let state = h
            .orchestrator
            .submit_file(file("F1", "x.bf", "brainfuck", "https://files.example.com/x.bf"), "C1".to_string())
            .await;

        assert_eq!(state, JobState::Failed { stage: Stage::Resolve });
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);

        let replies = h.chat.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, "C1");
        assert!(replies[0].1.contains("brainfuck"));
    }

    #[tokio::test]
    async fn test_unknown_language_with_bad_url_names_language() {
        let fetcher = Arc::new(CountingFetcher::default());
        let h = harness(fetcher.clone(), Arc::new(ScriptedRuntime::exits("", 0)));

        let state = h
            .orchestrator
            .submit_file(file("F1", "x.bf", "brainfuck", "not a url"), "C1".to_string())
            .await;

        assert_eq!(state, JobState::Failed { stage: Stage::Resolve });
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);

        let replies = h.chat.replies();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].1.contains("brainfuck"));
        assert!(h.chat.acked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_language_is_not_acknowledged() {
        let h = harness(
            Arc::new(CountingFetcher::default()),
            Arc::new(ScriptedRuntime::exits("", 0)),
        );

        h.orchestrator
            .submit_file(file("F1", "x.bf", "brainfuck", "https://files.example.com/x.bf"), "C1".to_string())
            .await;

        assert!(h.chat.acked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_end_to_end_hello() {
        let server = MockServer::start().await;
        serve(&server, "/files/F1/-.py", "print('hello')\n").await;

        let runtime = Arc::new(ScriptedRuntime::exits("hello\n", 0));
        let h = harness(Arc::new(HttpFetcher::new().unwrap()), runtime.clone());
        let errors = ErrorCounter::default();
        let _guard = errors.install();

        let url = format!("{}/files/F1/-.py", server.uri());
        let state = h
            .orchestrator
            .submit_file(file("F1", "-.py", "python", &url), "C1".to_string())
            .await;

        assert_eq!(state, JobState::Reported);
        assert_eq!(h.chat.replies(), vec![("C1".to_string(), "```hello```".to_string())]);

        let seen = runtime.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_ne!(seen[0].0, "-.py");
        assert_eq!(seen[0].1, "print('hello')\n");
        assert!(h.chat.acked.lock().unwrap().contains("F1"));
        assert_eq!(errors.count(), 0);
    }

    #[tokio::test]
    async fn test_end_to_end_exit_code() {
        let server = MockServer::start().await;
        serve(&server, "/files/F2/-.py", "import sys; sys.exit(2)\n").await;

        let h = harness(
            Arc::new(HttpFetcher::new().unwrap()),
            Arc::new(ScriptedRuntime::exits("", 2)),
        );

        let url = format!("{}/files/F2/-.py", server.uri());
        let state = h
            .orchestrator
            .submit_file(file("F2", "-.py", "python", &url), "C1".to_string())
            .await;

        assert_eq!(state, JobState::Reported);
        let replies = h.chat.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1, "```\nYour snippet failed with exit code: 2```");
    }

    #[tokio::test]
    async fn test_timeout_and_exit_replies_differ() {
        let server = MockServer::start().await;
        serve(&server, "/files/F3/loop.py", "while True: pass\n").await;
        let url = format!("{}/files/F3/loop.py", server.uri());

        let slow = harness(
            Arc::new(HttpFetcher::new().unwrap()),
            Arc::new(ScriptedRuntime::times_out()),
        );
        let failing = harness(
            Arc::new(HttpFetcher::new().unwrap()),
            Arc::new(ScriptedRuntime::exits("", 1)),
        );

        slow.orchestrator
            .submit_file(file("F3", "loop.py", "python", &url), "C1".to_string())
            .await;
        failing
            .orchestrator
            .submit_file(file("F3", "loop.py", "python", &url), "C1".to_string())
            .await;

        let timeout_reply = &slow.chat.replies()[0].1;
        let exit_reply = &failing.chat.replies()[0].1;
        assert!(timeout_reply.contains("timed out"));
        assert!(exit_reply.contains("exit code: 1"));
        assert_ne!(timeout_reply, exit_reply);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_execution() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let runtime = Arc::new(ScriptedRuntime::exits("never", 0));
        let h = harness(Arc::new(HttpFetcher::new().unwrap()), runtime.clone());

        let url = format!("{}/files/F4/a.py", server.uri());
        let state = h
            .orchestrator
            .submit_file(file("F4", "a.py", "python", &url), "C1".to_string())
            .await;

        assert_eq!(state, JobState::Failed { stage: Stage::Fetch });
        assert!(runtime.seen.lock().unwrap().is_empty());
        let replies = h.chat.replies();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].1.contains("403"));
    }

    #[tokio::test]
    async fn test_invalid_download_url_fails_at_fetch() {
        let fetcher = Arc::new(CountingFetcher::default());
        let h = harness(fetcher.clone(), Arc::new(ScriptedRuntime::exits("", 0)));

        let state = h
            .orchestrator
            .submit_file(file("F5", "a.py", "python", "not a url"), "C1".to_string())
            .await;

        assert_eq!(state, JobState::Failed { stage: Stage::Fetch });
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.chat.replies().len(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_reports_generic_error() {
        let h = harness(
            Arc::new(CountingFetcher::default()),
            Arc::new(ScriptedRuntime::unavailable()),
        );

        let state = h
            .orchestrator
            .submit_file(file("F6", "a.py", "python", "https://files.example.com/a.py"), "C1".to_string())
            .await;

        assert_eq!(state, JobState::Failed { stage: Stage::Execute });
        let replies = h.chat.replies();
        assert_eq!(replies.len(), 1);
        assert!(!replies[0].1.contains("Docker"));
    }

    #[tokio::test]
    async fn test_job_directory_is_removed() {
        let h = harness(
            Arc::new(CountingFetcher::default()),
            Arc::new(ScriptedRuntime::exits("ok", 0)),
        );

        h.orchestrator
            .submit_file(file("F7", "a.py", "python", "https://files.example.com/a.py"), "C1".to_string())
            .await;

        let leftovers = std::fs::read_dir(h.folder.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_rerun_from_own_acknowledgement_is_ignored() {
        let fetcher = Arc::new(CountingFetcher::default());
        let h = harness(fetcher.clone(), Arc::new(ScriptedRuntime::exits("hello", 0)));
        h.chat.files.lock().unwrap().insert(
            "F1".to_string(),
            file("F1", "a.py", "python", "https://files.example.com/a.py"),
        );

        let outcome = h
            .orchestrator
            .resubmit_from_reference(RerunTrigger {
                user: BOT_ID.to_string(),
                file_id: "F1".to_string(),
                reaction: "repeat".to_string(),
            })
            .await;

        assert_eq!(outcome, RerunOutcome::Ignored);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(h.chat.replies().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_with_other_reaction_is_ignored() {
        let fetcher = Arc::new(CountingFetcher::default());
        let h = harness(fetcher.clone(), Arc::new(ScriptedRuntime::exits("hello", 0)));

        let outcome = h
            .orchestrator
            .resubmit_from_reference(RerunTrigger {
                user: "U1".to_string(),
                file_id: "F1".to_string(),
                reaction: "thumbsup".to_string(),
            })
            .await;

        assert_eq!(outcome, RerunOutcome::Ignored);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rerun_uses_fresh_metadata_and_replies_to_file() {
        let fetcher = Arc::new(CountingFetcher::default());
        let h = harness(fetcher.clone(), Arc::new(ScriptedRuntime::exits("hello", 0)));
        h.chat.files.lock().unwrap().insert(
            "F1".to_string(),
            file("F1", "a.py", "python", "https://files.example.com/a.py"),
        );

        let outcome = h
            .orchestrator
            .resubmit_from_reference(RerunTrigger {
                user: "U1".to_string(),
                file_id: "F1".to_string(),
                reaction: "repeat".to_string(),
            })
            .await;

        assert_eq!(outcome, RerunOutcome::Submitted(JobState::Reported));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.chat.replies(), vec![("F1".to_string(), "```hello```".to_string())]);
    }

    #[tokio::test]
    async fn test_rerun_of_unknown_file() {
        let h = harness(
            Arc::new(CountingFetcher::default()),
            Arc::new(ScriptedRuntime::exits("", 0)),
        );
        let errors = ErrorCounter::default();
        let _guard = errors.install();

        let outcome = h
            .orchestrator
            .resubmit_from_reference(RerunTrigger {
                user: "U1".to_string(),
                file_id: "F404".to_string(),
                reaction: "repeat".to_string(),
            })
            .await;

        assert_eq!(outcome, RerunOutcome::LookupFailed);
        assert_eq!(h.chat.replies().len(), 1);
        assert!(errors.count() >= 1);
    }

    #[tokio::test]
    async fn test_second_run_of_same_file_acknowledges_once() {
        let fetcher = Arc::new(CountingFetcher::default());
        let h = harness(fetcher.clone(), Arc::new(ScriptedRuntime::exits("hi", 0)));
        let shared = file("F1", "a.py", "python", "https://files.example.com/a.py");

        let first = h.orchestrator.submit_file(shared.clone(), "C1".to_string()).await;
        let second = h.orchestrator.submit_file(shared, "C1".to_string()).await;

        assert_eq!(first, JobState::Reported);
        assert_eq!(second, JobState::Reported);
        assert_eq!(h.chat.acked.lock().unwrap().len(), 1);
        assert_eq!(h.chat.replies().len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_answers_queries_without_running() {
        let fetcher = Arc::new(CountingFetcher::default());
        let h = harness(fetcher.clone(), Arc::new(ScriptedRuntime::exits("", 0)));

        h.orchestrator
            .dispatch(InboundEvent::SupportQuery {
                reply_target: "C1".to_string(),
            })
            .await
            .unwrap();
        h.orchestrator
            .dispatch(InboundEvent::ConfigQuery {
                language: "shell".to_string(),
                reply_target: "C1".to_string(),
            })
            .await
            .unwrap();

        let replies = h.chat.replies();
        assert_eq!(replies[0].1, "I can run: python, shell");
        assert!(replies[1].1.contains("Timeout  : 1 seconds"));
        assert!(replies[1].1.contains("Crops at : 40 characters"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_jobs_use_separate_directories() {
        let fetcher = Arc::new(CountingFetcher::default());
        let runtime = Arc::new(ScriptedRuntime::exits("ok", 0));
        let h = harness(fetcher.clone(), runtime.clone());

        let handles: Vec<_> = (0..5)
            .map(|i| {
                h.orchestrator.dispatch(InboundEvent::FileShared {
                    file: file(&format!("F{}", i), "-.py", "python", "https://files.example.com/a.py"),
                    reply_target: format!("C{}", i),
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 5);
        assert_eq!(h.chat.replies().len(), 5);
        let names: HashSet<String> = runtime.seen.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names.len(), 5);
    }
}
