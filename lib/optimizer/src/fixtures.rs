//! Shared helpers and mock backends for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::executor::{ExecutionError, ProgramExecutor, RuleRequest};
use crate::trajectory::Trajectory;
use crate::types::{ExampleId, Fields, Program, ProgramId, TrainingExample};

pub fn fields<'a>(values: impl IntoIterator<Item = (&'a str, Value)>) -> Fields {
    values
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Successful trajectory without inputs or outputs
pub fn trajectory(program_id: ProgramId, example_id: ExampleId, score: f64) -> Trajectory {
    Trajectory {
        program_id,
        example_id,
        round: 0,
        sample_index: 0,
        inputs: Fields::new(),
        outputs: Some(Fields::new()),
        score,
        success: true,
        duration: Duration::from_millis(1),
        metadata: Fields::new(),
    }
}

/// Successful trajectory answering `question` with `answer`
pub fn trajectory_with_io(
    program_id: ProgramId,
    example_id: ExampleId,
    question: &str,
    answer: &str,
    score: f64,
) -> Trajectory {
    Trajectory {
        inputs: fields([("question", json!(question))]),
        outputs: Some(fields([("answer", json!(answer))])),
        ..trajectory(program_id, example_id, score)
    }
}

/// Ten geography questions, four of them about capitals
pub fn capital_trainset() -> Vec<TrainingExample> {
    [
        ("What is the capital of France?", "Paris"),
        ("What is the largest ocean?", "Pacific"),
        ("What is the capital of Japan?", "Tokyo"),
        ("Which river flows through Cairo?", "Nile"),
        ("What is the longest mountain range?", "Andes"),
        ("What is the capital of Italy?", "Rome"),
        ("Which desert is the largest hot desert?", "Sahara"),
        ("What is the highest mountain?", "Everest"),
        ("What is the capital of Canada?", "Ottawa"),
        ("Which country has the most islands?", "Sweden"),
    ]
    .into_iter()
    .map(|(question, answer)| {
        TrainingExample::new(
            fields([("question", json!(question))]),
            fields([("answer", json!(answer))]),
        )
    })
    .collect()
}

/// `1.0` if the response answer equals the expected one, `0.0` otherwise
pub fn exact_match_metric(example: &TrainingExample, outputs: &Fields) -> f64 {
    match (example.expected.get("answer"), outputs.get("answer")) {
        (Some(expected), Some(actual)) if expected == actual => 1.0,
        _ => 0.0,
    }
}

fn question(inputs: &Fields) -> &str {
    inputs
        .get("question")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Knows the answer to capital questions only, unless the program carries a demonstration.
#[derive(Default)]
pub struct CapitalExecutor {
    calls: AtomicUsize,
    programs: Mutex<Vec<ProgramId>>,
}

impl CapitalExecutor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Ids of executed programs in call order
    pub fn programs(&self) -> Vec<ProgramId> {
        self.programs.lock().clone()
    }

    fn answer(question: &str) -> &'static str {
        match question {
            q if q.contains("France") => "Paris",
            q if q.contains("Japan") => "Tokyo",
            q if q.contains("Italy") => "Rome",
            q if q.contains("Canada") => "Ottawa",
            q if q.contains("ocean") => "Pacific",
            q if q.contains("Cairo") => "Nile",
            q if q.contains("mountain range") => "Andes",
            q if q.contains("desert") => "Sahara",
            q if q.contains("highest mountain") => "Everest",
            q if q.contains("islands") => "Sweden",
            _ => "unknown",
        }
    }
}

#[async_trait]
impl ProgramExecutor for CapitalExecutor {
    async fn execute(&self, program: &Program, inputs: &Fields) -> Result<Fields, ExecutionError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.programs
            .lock()
            .push(program.id().unwrap_or(ProgramId::BASELINE));

        let question = question(inputs);
        let answer = if question.contains("capital") || !program.demos.is_empty() {
            Self::answer(question)
        } else {
            "I don't know"
        };
        Ok(fields([("answer", json!(answer))]))
    }
}

/// Takes `delay` to answer anything
pub struct SlowExecutor {
    delay: Duration,
}

impl SlowExecutor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ProgramExecutor for SlowExecutor {
    async fn execute(&self, _program: &Program, _inputs: &Fields) -> Result<Fields, ExecutionError> {
        tokio::time::sleep(self.delay).await;
        Ok(fields([("answer", json!("late"))]))
    }
}

/// Answers nothing, proposes a fixed rule or fails when there is none
pub struct RuleExecutor {
    rule: Option<String>,
    requests: Mutex<Vec<(ProgramId, ProgramId)>>,
}

impl RuleExecutor {
    pub fn new(rule: Option<&str>) -> Self {
        Self {
            rule: rule.map(str::to_string),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `(better, worse)` program ids of every rule request
    pub fn requests(&self) -> Vec<(ProgramId, ProgramId)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ProgramExecutor for RuleExecutor {
    async fn execute(&self, _program: &Program, _inputs: &Fields) -> Result<Fields, ExecutionError> {
        Err(ExecutionError::failed("backend is offline"))
    }

    async fn propose_rule(&self, request: RuleRequest<'_>) -> Result<String, ExecutionError> {
        self.requests
            .lock()
            .push((request.better.program_id, request.worse.program_id));
        self.rule
            .clone()
            .ok_or_else(|| ExecutionError::failed("no rule to propose"))
    }
}

/// Answers like [`CapitalExecutor`] for the first `fast_calls` calls, then never answers again
pub struct StallingExecutor {
    inner: CapitalExecutor,
    fast_calls: usize,
    calls: AtomicUsize,
}

impl StallingExecutor {
    pub fn new(fast_calls: usize) -> Self {
        Self {
            inner: CapitalExecutor::default(),
            fast_calls,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProgramExecutor for StallingExecutor {
    async fn execute(&self, program: &Program, inputs: &Fields) -> Result<Fields, ExecutionError> {
        if self.calls.fetch_add(1, Ordering::Relaxed) >= self.fast_calls {
            std::future::pending::<()>().await;
        }
        self.inner.execute(program, inputs).await
    }
}

/// How [`LearningExecutor`] answers rule requests
#[derive(Debug, Clone, Copy)]
pub enum RuleReply {
    Rule(&'static str),
    Panic,
    Stall,
}

/// Gets every question wrong the first time it is asked and right afterwards.
///
/// Buckets of programs sampled more than once per example therefore always have a score gap.
pub struct LearningExecutor {
    reply: RuleReply,
    seen: Mutex<HashSet<String>>,
    rule_requests: AtomicUsize,
}

impl LearningExecutor {
    pub fn new(reply: RuleReply) -> Self {
        Self {
            reply,
            seen: Mutex::new(HashSet::new()),
            rule_requests: AtomicUsize::new(0),
        }
    }

    pub fn rule_requests(&self) -> usize {
        self.rule_requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ProgramExecutor for LearningExecutor {
    async fn execute(&self, _program: &Program, inputs: &Fields) -> Result<Fields, ExecutionError> {
        let question = question(inputs);
        let first_time = self.seen.lock().insert(question.to_string());
        let answer = if first_time {
            "I don't know"
        } else {
            CapitalExecutor::answer(question)
        };
        Ok(fields([("answer", json!(answer))]))
    }

    async fn propose_rule(&self, _request: RuleRequest<'_>) -> Result<String, ExecutionError> {
        self.rule_requests.fetch_add(1, Ordering::Relaxed);
        match self.reply {
            RuleReply::Rule(rule) => Ok(rule.to_string()),
            RuleReply::Panic => panic!("rule backend exploded"),
            RuleReply::Stall => std::future::pending().await,
        }
    }
}
