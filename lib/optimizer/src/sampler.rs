use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use cancel::CancellationToken;
use futures::FutureExt;
use rand::seq::index;
use rand::Rng;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

use crate::config::ExampleOrder;
use crate::executor::ProgramExecutor;
use crate::metric::{Evaluation, MetricEvaluator};
use crate::pool::ProgramPool;
use crate::trajectory::{Trajectory, FAILURE_REASON_KEY};
use crate::types::{ExampleId, Fields, Program, ProgramId, TrainingExample};

/// Draws training examples for each round.
#[derive(Debug, Clone)]
pub struct ExampleSelector {
    order: ExampleOrder,
    position: usize,
}

impl ExampleSelector {
    pub fn new(order: ExampleOrder) -> Self {
        Self { order, position: 0 }
    }

    /// Pick `count` examples out of a trainset of `trainset_len` examples.
    ///
    /// Random order samples without replacement, unless the trainset is smaller than `count`.
    pub fn select<R: Rng + ?Sized>(
        &mut self,
        trainset_len: usize,
        count: usize,
        rng: &mut R,
    ) -> Vec<ExampleId> {
        if trainset_len == 0 {
            return Vec::new();
        }
        match &self.order {
            ExampleOrder::Random if trainset_len >= count => index::sample(rng, trainset_len, count)
                .into_iter()
                .map(ExampleId)
                .collect(),
            ExampleOrder::Random => (0..count)
                .map(|_| ExampleId(rng.gen_range(0..trainset_len)))
                .collect(),
            ExampleOrder::Sequential => {
                let selected = (0..count)
                    .map(|i| ExampleId((self.position + i) % trainset_len))
                    .collect();
                self.position = (self.position + count) % trainset_len;
                selected
            }
            ExampleOrder::Custom(order) if order.is_empty() => Vec::new(),
            ExampleOrder::Custom(order) => {
                let selected = (0..count)
                    .map(|i| ExampleId(order[(self.position + i) % order.len()]))
                    .collect();
                self.position = (self.position + count) % order.len();
                selected
            }
        }
    }
}

/// One program execution to perform
#[derive(Debug, Clone)]
pub struct SampleItem {
    pub sample_index: usize,
    pub program: Arc<Program>,
    pub example_id: ExampleId,
}

impl SampleItem {
    pub fn program_id(&self) -> ProgramId {
        self.program.id().unwrap_or(ProgramId::BASELINE)
    }
}

/// Runs (program, example) pairs concurrently and scores them.
#[derive(Clone)]
pub struct TrajectorySampler {
    executor: Arc<dyn ProgramExecutor>,
    evaluator: MetricEvaluator,
    trainset: Arc<[TrainingExample]>,
    max_concurrency: usize,
    call_timeout: Duration,
}

impl TrajectorySampler {
    pub fn new(
        executor: Arc<dyn ProgramExecutor>,
        evaluator: MetricEvaluator,
        trainset: Arc<[TrainingExample]>,
        max_concurrency: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            evaluator,
            trainset,
            max_concurrency: max_concurrency.max(1),
            call_timeout,
        }
    }

    pub fn trainset(&self) -> &[TrainingExample] {
        &self.trainset
    }

    /// Pair each example with `samples_per_example` program variants chosen by softmax sampling
    /// over the pool's eligible programs.
    pub fn plan<R: Rng + ?Sized>(
        &self,
        pool: &ProgramPool,
        examples: &[ExampleId],
        samples_per_example: usize,
        temperature: f64,
        rng: &mut R,
    ) -> Vec<SampleItem> {
        let candidates = pool.eligible_ids();
        let mut items = Vec::with_capacity(examples.len() * samples_per_example);
        for example_id in examples {
            for _ in 0..samples_per_example {
                let program = pool
                    .softmax_sample(&candidates, temperature, rng)
                    .and_then(|id| pool.program(id))
                    .unwrap_or_else(|| pool.baseline().program());
                items.push(SampleItem {
                    sample_index: items.len(),
                    program: program.clone(),
                    example_id: *example_id,
                });
            }
        }
        items
    }

    /// Run every program against every given example.
    pub fn plan_evaluation(programs: &[Arc<Program>], examples: &[ExampleId]) -> Vec<SampleItem> {
        programs
            .iter()
            .flat_map(move |program| examples.iter().map(move |example_id| (program, *example_id)))
            .enumerate()
            .map(|(sample_index, (program, example_id))| SampleItem {
                sample_index,
                program: program.clone(),
                example_id,
            })
            .collect()
    }

    /// Start executing `items` in the background.
    ///
    /// At most `max_concurrency` executions run at once, remaining items wait for a permit before a
    /// task is spawned for them. Every item produces exactly one trajectory on the returned channel,
    /// in completion order. The channel closes once all items are done.
    pub fn dispatch(
        &self,
        items: Vec<SampleItem>,
        round: usize,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Trajectory> {
        let (sender, receiver) = mpsc::channel(items.len().max(1));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let sampler = self.clone();

        tokio::spawn(async move {
            for item in items {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let sampler = sampler.clone();
                let sender = sender.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let trajectory = sampler.run_item(item, round, cancel).await;
                    drop(permit);
                    if sender.send(trajectory).await.is_err() {
                        log::debug!("Trajectory receiver is gone, dropping result");
                    }
                });
            }
        });

        receiver
    }

    /// Execute all items and collect trajectories in completion order.
    pub async fn execute(
        &self,
        items: Vec<SampleItem>,
        round: usize,
        cancel: CancellationToken,
    ) -> Vec<Trajectory> {
        let expected = items.len();
        let mut receiver = self.dispatch(items, round, cancel);
        let mut trajectories = Vec::with_capacity(expected);
        while let Some(trajectory) = receiver.recv().await {
            trajectories.push(trajectory);
        }
        trajectories
    }

    async fn run_item(
        &self,
        item: SampleItem,
        round: usize,
        cancel: CancellationToken,
    ) -> Trajectory {
        let started = Instant::now();
        let program_id = item.program_id();

        let Some(example) = self.trainset.get(item.example_id.0) else {
            return self.trajectory(
                &item,
                round,
                Fields::new(),
                None,
                self.evaluator
                    .failure(format!("{} is out of the trainset", item.example_id)),
                started.elapsed(),
            );
        };

        let call = AssertUnwindSafe(self.executor.execute(&item.program, &example.inputs))
            .catch_unwind();
        let result = cancel::future::timeout_on_token(cancel, self.call_timeout, call).await;

        let (outputs, evaluation) = match result {
            Ok(Ok(Ok(outputs))) => {
                let evaluation = self.evaluator.evaluate(example, &outputs);
                (Some(outputs), evaluation)
            }
            Ok(Ok(Err(err))) => (None, self.evaluator.failure(err.to_string())),
            Ok(Err(_panic)) => (None, self.evaluator.failure("executor panicked")),
            Err(err) => (None, self.evaluator.failure(err.to_string())),
        };

        if let Some(reason) = &evaluation.failure_reason {
            log::debug!(
                "Trajectory of {program_id} on {} failed: {reason}",
                item.example_id
            );
        }

        self.trajectory(
            &item,
            round,
            example.inputs.clone(),
            outputs,
            evaluation,
            started.elapsed(),
        )
    }

    fn trajectory(
        &self,
        item: &SampleItem,
        round: usize,
        inputs: Fields,
        outputs: Option<Fields>,
        evaluation: Evaluation,
        duration: Duration,
    ) -> Trajectory {
        let mut metadata = Fields::new();
        if let Some(reason) = evaluation.failure_reason {
            metadata.insert(FAILURE_REASON_KEY.to_string(), reason.into());
        }
        Trajectory {
            program_id: item.program_id(),
            example_id: item.example_id,
            round,
            sample_index: item.sample_index,
            inputs,
            outputs,
            score: evaluation.score,
            success: evaluation.success,
            duration,
            metadata,
        }
    }
}
