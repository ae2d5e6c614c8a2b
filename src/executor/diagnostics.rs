use std::time::{Duration, Instant};

use crate::task::TaskRef;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub task: TaskRef,
    pub start: Instant,
    pub duration: Duration,
}

/// What happened during one executor run, in completion order.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    pub executions: Vec<TaskExecution>,
}

impl Diagnostics {
    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Whether the task called `name` ran.
    pub fn executed(&self, name: &str) -> bool {
        self.executions.iter().any(|exec| exec.task.name() == name)
    }

    /// Names of the tasks that ran, in completion order.
    pub fn names(&self) -> Vec<&str> {
        self.executions.iter().map(|exec| exec.task.name()).collect()
    }

    /// Sum of task durations, not wall time.
    pub fn total(&self) -> Duration {
        self.executions.iter().map(|exec| exec.duration).sum()
    }

    pub(crate) fn extend(&mut self, other: Diagnostics) {
        self.executions.extend(other.executions);
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(first) = self.executions.iter().map(|exec| exec.start).min() else {
            return writeln!(f, "No tasks ran");
        };

        let width = self
            .executions
            .iter()
            .map(|exec| exec.task.name().len())
            .max()
            .unwrap_or_default();

        for exec in &self.executions {
            let offset = exec.start.duration_since(first);
            writeln!(
                f,
                "{:<width$}  +{:>10.2?}  {:>10.2?}",
                exec.task.name(),
                offset,
                exec.duration,
                width = width
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petgraph::graph::NodeIndex;

    fn exec(index: usize, name: &str, millis: u64) -> TaskExecution {
        TaskExecution {
            task: TaskRef::new(NodeIndex::new(index), name.into()),
            start: Instant::now(),
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn test_executed() {
        let diagnostics = Diagnostics {
            executions: vec![exec(0, "createDebugAsset", 2), exec(1, "mergeDebugAssets", 3)],
        };

        assert!(diagnostics.executed("createDebugAsset"));
        assert!(!diagnostics.executed("preBuildValidation"));
        assert_eq!(diagnostics.total(), Duration::from_millis(5));
        assert_eq!(diagnostics.names(), ["createDebugAsset", "mergeDebugAssets"]);
    }

    #[test]
    fn test_display() {
        assert_eq!(Diagnostics::default().to_string(), "No tasks ran\n");

        let diagnostics = Diagnostics {
            executions: vec![exec(0, "mergeDebugAssets", 1)],
        };
        assert!(diagnostics.to_string().starts_with("mergeDebugAssets"));
    }
}
