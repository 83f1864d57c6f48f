//! Hybrid sync/async stage pipeline.
//!
//! A pipeline pulls messages from one producer and feeds them through an
//! ordered list of stages. Each stage turns one message into zero or more
//! output messages; the flattened outputs feed the next stage. Within one
//! producer message the declared stage order is preserved; remaining
//! messages fall out at the end (the sink discards them, stages act through
//! their side effects on shared session state).
//!
//! Cancellation is cooperative: a stage always completes its current `send`,
//! then the pipeline unwinds without feeding further messages.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::importer::error::ImportError;

/// One unit of the pipeline. `prime` runs once before any message flows.
#[async_trait]
pub trait Stage<M: Send + 'static>: Send {
    fn name(&self) -> &'static str;

    async fn prime(&mut self) -> Result<(), ImportError> {
        Ok(())
    }

    /// Feed one message, receive zero or more output messages.
    async fn send(&mut self, message: M) -> Result<Vec<M>, ImportError>;
}

/// Source of pipeline messages.
#[async_trait]
pub trait Producer<M: Send + 'static>: Send {
    async fn next(&mut self) -> Result<Option<M>, ImportError>;
}

/// Producer over a fixed list of messages.
pub struct VecProducer<M> {
    items: std::collections::VecDeque<M>,
}

impl<M> VecProducer<M> {
    pub fn new(items: Vec<M>) -> Self {
        Self {
            items: items.into(),
        }
    }
}

#[async_trait]
impl<M: Send + 'static> Producer<M> for VecProducer<M> {
    async fn next(&mut self) -> Result<Option<M>, ImportError> {
        Ok(self.items.pop_front())
    }
}

/// Insertion-ordered, named list of stages.
///
/// Session variants assemble their pipeline through this, then hand it to
/// the executor.
pub struct StageOrder<M: Send + 'static> {
    stages: Vec<Box<dyn Stage<M>>>,
}

impl<M: Send + 'static> Default for StageOrder<M> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<M: Send + 'static> StageOrder<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, stage: Box<dyn Stage<M>>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn prepend(&mut self, stage: Box<dyn Stage<M>>) -> &mut Self {
        self.stages.insert(0, stage);
        self
    }

    fn position(&self, name: &str) -> Result<usize, ImportError> {
        self.stages
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| ImportError::InvalidUsage(format!("no stage named {name:?}")))
    }

    pub fn insert_before(
        &mut self,
        name: &str,
        stage: Box<dyn Stage<M>>,
    ) -> Result<&mut Self, ImportError> {
        let index = self.position(name)?;
        self.stages.insert(index, stage);
        Ok(self)
    }

    pub fn insert_after(
        &mut self,
        name: &str,
        stage: Box<dyn Stage<M>>,
    ) -> Result<&mut Self, ImportError> {
        let index = self.position(name)?;
        self.stages.insert(index + 1, stage);
        Ok(self)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Cancelled,
}

/// Prime every stage, then pull producer messages through the stage list.
pub async fn run<M: Send + 'static>(
    mut producer: Box<dyn Producer<M>>,
    mut order: StageOrder<M>,
    cancel: &CancellationToken,
) -> Result<PipelineOutcome, ImportError> {
    for stage in order.stages.iter_mut() {
        stage.prime().await?;
    }

    loop {
        if cancel.is_cancelled() {
            debug!("pipeline cancelled before next producer message");
            return Ok(PipelineOutcome::Cancelled);
        }

        let Some(message) = producer.next().await? else {
            break;
        };

        let mut messages = vec![message];
        for stage in order.stages.iter_mut() {
            let mut outputs = Vec::new();
            for message in messages {
                outputs.extend(stage.send(message).await?);
            }
            messages = outputs;
            if messages.is_empty() {
                break;
            }
            if cancel.is_cancelled() {
                debug!(stage = stage.name(), "pipeline cancelled after stage");
                return Ok(PipelineOutcome::Cancelled);
            }
        }
    }

    Ok(PipelineOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct AddStage {
        name: &'static str,
        amount: i64,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Stage<i64> for AddStage {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&mut self, message: i64) -> Result<Vec<i64>, ImportError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, message));
            Ok(vec![message + self.amount])
        }
    }

    struct SplitStage;

    #[async_trait]
    impl Stage<i64> for SplitStage {
        fn name(&self) -> &'static str {
            "split"
        }

        async fn send(&mut self, message: i64) -> Result<Vec<i64>, ImportError> {
            Ok(vec![message, message * 10])
        }
    }

    struct DropOddStage;

    #[async_trait]
    impl Stage<i64> for DropOddStage {
        fn name(&self) -> &'static str {
            "drop_odd"
        }

        async fn send(&mut self, message: i64) -> Result<Vec<i64>, ImportError> {
            if message % 2 == 0 {
                Ok(vec![message])
            } else {
                Ok(vec![])
            }
        }
    }

    fn add(name: &'static str, amount: i64, log: &Arc<Mutex<Vec<String>>>) -> Box<dyn Stage<i64>> {
        Box::new(AddStage {
            name,
            amount,
            log: log.clone(),
        })
    }

    #[tokio::test]
    async fn test_messages_flow_in_declared_order() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut order = StageOrder::new();
        order.append(add("one", 1, &log));
        order.append(add("two", 1, &log));

        let outcome = run(
            Box::new(VecProducer::new(vec![0, 10])),
            order,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, PipelineOutcome::Completed);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["one:0", "two:1", "one:10", "two:11"]
        );
    }

    #[tokio::test]
    async fn test_stage_fanout_and_drop() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut order = StageOrder::new();
        order.append(Box::new(SplitStage));
        order.append(Box::new(DropOddStage));
        order.append(add("sink", 0, &log));

        run(
            Box::new(VecProducer::new(vec![1])),
            order,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // 1 splits into [1, 10]; the odd one is dropped.
        assert_eq!(*log.lock().unwrap(), vec!["sink:10"]);
    }

    #[tokio::test]
    async fn test_stage_order_insertion() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut order = StageOrder::new();
        order.append(add("b", 0, &log));
        order.prepend(add("a", 0, &log));
        order.insert_after("b", add("d", 0, &log)).unwrap();
        order.insert_before("d", add("c", 0, &log)).unwrap();

        assert_eq!(order.names(), vec!["a", "b", "c", "d"]);
        assert!(order.insert_before("missing", add("x", 0, &log)).is_err());
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_messages() {
        let log = Arc::new(Mutex::new(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut order = StageOrder::new();
        order.append(add("one", 1, &log));

        let outcome = run(Box::new(VecProducer::new(vec![1, 2, 3])), order, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome, PipelineOutcome::Cancelled);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stage_error_propagates() {
        struct FailStage;

        #[async_trait]
        impl Stage<i64> for FailStage {
            fn name(&self) -> &'static str {
                "fail"
            }

            async fn send(&mut self, _message: i64) -> Result<Vec<i64>, ImportError> {
                Err(ImportError::Integrity("boom".into()))
            }
        }

        let result = run(
            Box::new(VecProducer::new(vec![1])),
            {
                let mut order = StageOrder::new();
                order.append(Box::new(FailStage) as Box<dyn Stage<i64>>);
                order
            },
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(ImportError::Integrity(_))));
    }
}
