//! Compensation log for the container creation saga.
//!
//! Each step that commits a side effect pushes the action that undoes it.
//! On failure the log runs newest-first; on success it is discarded.
//! Compensation failures are logged and never retried.
//!
//! A log dropped without [`Rollback::commit`] or [`Rollback::run`] (the
//! creating future was cancelled) hands its remaining steps to a spawned
//! task, so cancellation never leaks a name reservation or directory.

use crate::engine::{DeleteOptions, EngineHandle, ExecutionEngine};
use crate::io::ContainerIo;
use crate::store::NameIndex;
use std::path::PathBuf;
use std::sync::Arc;

/// Undo action for one committed step.
#[derive(Debug)]
pub(crate) enum Compensation {
    ReleaseName(String),
    RemoveDir(PathBuf),
    CloseIo(Arc<ContainerIo>),
    DeleteEngineContainer(EngineHandle),
    RemoveStatus(PathBuf),
}

impl Compensation {
    fn describe(&self) -> &'static str {
        match self {
            Self::ReleaseName(_) => "release name",
            Self::RemoveDir(_) => "remove container root",
            Self::CloseIo(_) => "close container io",
            Self::DeleteEngineContainer(_) => "delete engine container",
            Self::RemoveStatus(_) => "remove status checkpoint",
        }
    }
}

/// Ordered list of committed compensations.
pub(crate) struct Rollback {
    container: String,
    steps: Vec<Compensation>,
    names: Arc<NameIndex>,
    engine: Arc<dyn ExecutionEngine>,
}

impl Rollback {
    pub(crate) fn new(container: &str, names: Arc<NameIndex>, engine: Arc<dyn ExecutionEngine>) -> Self {
        Self {
            container: container.to_string(),
            steps: Vec::new(),
            names,
            engine,
        }
    }

    pub(crate) fn push(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.steps.len()
    }

    /// Discards the log after the saga committed.
    pub(crate) fn commit(mut self) {
        tracing::trace!(container = %self.container, steps = self.steps.len(), "Creation committed");
        self.steps.clear();
    }

    /// Runs every compensation, newest first.
    ///
    /// Steps not yet run when this future is dropped are still run by the
    /// drop handler.
    pub(crate) async fn run(mut self) {
        while let Some(step) = self.steps.pop() {
            let action = step.describe();
            let result = match step {
                Compensation::ReleaseName(name) => self.names.release_by_name(&name),
                Compensation::RemoveDir(path) => remove_dir(&path),
                Compensation::CloseIo(io) => io.close(),
                Compensation::DeleteEngineContainer(handle) => {
                    self.engine
                        .delete_container(
                            &handle,
                            DeleteOptions {
                                cleanup_snapshot: true,
                            },
                        )
                        .await
                }
                Compensation::RemoveStatus(path) => remove_file(&path),
            };
            match result {
                Ok(()) => tracing::debug!(container = %self.container, action, "Rolled back"),
                Err(e) => tracing::warn!(
                    container = %self.container,
                    action,
                    error = %e,
                    "Failed to roll back creation step"
                ),
            }
        }
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        if self.steps.is_empty() {
            return;
        }
        tracing::debug!(
            container = %self.container,
            steps = self.steps.len(),
            "Container creation cancelled, rolling back"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let pending = Rollback {
                    container: self.container.clone(),
                    steps: std::mem::take(&mut self.steps),
                    names: self.names.clone(),
                    engine: self.engine.clone(),
                };
                runtime.spawn(pending.run());
            }
            Err(_) => self.run_local(),
        }
    }
}

impl Rollback {
    /// Runs the steps that need no runtime; engine deletes are skipped.
    fn run_local(&mut self) {
        while let Some(step) = self.steps.pop() {
            let action = step.describe();
            let result = match step {
                Compensation::ReleaseName(name) => self.names.release_by_name(&name),
                Compensation::RemoveDir(path) => remove_dir(&path),
                Compensation::CloseIo(io) => io.close(),
                Compensation::RemoveStatus(path) => remove_file(&path),
                Compensation::DeleteEngineContainer(handle) => {
                    tracing::warn!(
                        container = %self.container,
                        engine_id = %handle.id(),
                        "No runtime to delete engine container, leaving it behind"
                    );
                    continue;
                }
            };
            if let Err(e) = result {
                tracing::warn!(
                    container = %self.container,
                    action,
                    error = %e,
                    "Failed to roll back creation step"
                );
            }
        }
    }
}

impl std::fmt::Debug for Rollback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rollback")
            .field("container", &self.container)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

fn remove_dir(path: &std::path::Path) -> crate::error::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn remove_file(path: &std::path::Path) -> crate::error::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CreateContainerRequest, ExecutionEngine};
    use crate::error::Result;
    use crate::io::FifoSet;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingEngine {
        deleted: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl ExecutionEngine for RecordingEngine {
        fn name(&self) -> &str {
            "recording"
        }
        async fn create_container(&self, request: CreateContainerRequest) -> Result<EngineHandle> {
            Ok(EngineHandle::new(request.id))
        }
        async fn delete_container(&self, handle: &EngineHandle, opts: DeleteOptions) -> Result<()> {
            self.deleted
                .lock()
                .unwrap()
                .push((handle.id().to_string(), opts.cleanup_snapshot));
            Ok(())
        }
        async fn extension(&self, _: &EngineHandle, _: &str) -> Result<Option<serde_json::Value>> {
            Ok(None)
        }
        async fn start_task(&self, _: &EngineHandle, _: &FifoSet) -> Result<u32> {
            Ok(1)
        }
        async fn task_pid(&self, _: &EngineHandle) -> Result<u32> {
            Ok(1)
        }
    }

    #[tokio::test]
    async fn test_rollback_undoes_every_step() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("c1");
        std::fs::create_dir_all(&root).unwrap();
        let status = root.join("status");
        std::fs::write(&status, b"{}").unwrap();
        let io = Arc::new(ContainerIo::create("c1", &root.join("io"), false, false).unwrap());

        let names = Arc::new(NameIndex::new());
        names.reserve("web_pod_ns_uid_0", "c1").unwrap();
        let engine = Arc::new(RecordingEngine::default());

        let mut rollback = Rollback::new("c1", names.clone(), engine.clone());
        rollback.push(Compensation::ReleaseName("web_pod_ns_uid_0".to_string()));
        rollback.push(Compensation::RemoveDir(root.clone()));
        rollback.push(Compensation::CloseIo(io.clone()));
        rollback.push(Compensation::DeleteEngineContainer(EngineHandle::new("c1")));
        rollback.push(Compensation::RemoveStatus(status.clone()));
        assert_eq!(rollback.len(), 5);

        rollback.run().await;

        assert!(!root.exists());
        assert!(io.is_closed());
        assert_eq!(names.get("web_pod_ns_uid_0").unwrap(), None);
        assert_eq!(
            *engine.deleted.lock().unwrap(),
            vec![("c1".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_failed_compensation_does_not_stop_rollback() {
        let dir = TempDir::new().unwrap();
        let names = Arc::new(NameIndex::new());
        names.reserve("n", "c2").unwrap();
        let engine = Arc::new(RecordingEngine::default());

        // A regular file where a directory is expected makes remove_dir_all fail.
        let not_a_dir = dir.path().join("file");
        std::fs::write(&not_a_dir, b"x").unwrap();

        let mut rollback = Rollback::new("c2", names.clone(), engine);
        rollback.push(Compensation::ReleaseName("n".to_string()));
        rollback.push(Compensation::RemoveDir(not_a_dir));
        rollback.run().await;

        assert_eq!(names.get("n").unwrap(), None);
    }

    #[tokio::test]
    async fn test_committed_log_undoes_nothing() {
        let names = Arc::new(NameIndex::new());
        names.reserve("n", "c3").unwrap();
        let engine = Arc::new(RecordingEngine::default());

        let mut rollback = Rollback::new("c3", names.clone(), engine.clone());
        rollback.push(Compensation::ReleaseName("n".to_string()));
        rollback.push(Compensation::DeleteEngineContainer(EngineHandle::new("c3")));
        rollback.commit();
        tokio::task::yield_now().await;

        assert_eq!(names.get("n").unwrap(), Some("c3".to_string()));
        assert!(engine.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_log_rolls_back_in_background() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("c4");
        std::fs::create_dir_all(&root).unwrap();
        let names = Arc::new(NameIndex::new());
        names.reserve("n", "c4").unwrap();
        let engine = Arc::new(RecordingEngine::default());

        {
            let mut rollback = Rollback::new("c4", names.clone(), engine.clone());
            rollback.push(Compensation::ReleaseName("n".to_string()));
            rollback.push(Compensation::RemoveDir(root.clone()));
            rollback.push(Compensation::DeleteEngineContainer(EngineHandle::new("c4")));
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(!root.exists());
        assert_eq!(names.get("n").unwrap(), None);
        assert_eq!(*engine.deleted.lock().unwrap(), vec![("c4".to_string(), true)]);
    }

    #[test]
    fn test_dropped_log_outside_runtime_runs_local_steps() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("c5");
        std::fs::create_dir_all(&root).unwrap();
        let names = Arc::new(NameIndex::new());
        names.reserve("n", "c5").unwrap();
        let engine = Arc::new(RecordingEngine::default());

        {
            let mut rollback = Rollback::new("c5", names.clone(), engine.clone());
            rollback.push(Compensation::ReleaseName("n".to_string()));
            rollback.push(Compensation::RemoveDir(root.clone()));
            rollback.push(Compensation::DeleteEngineContainer(EngineHandle::new("c5")));
        }

        assert!(!root.exists());
        assert_eq!(names.get("n").unwrap(), None);
        assert!(engine.deleted.lock().unwrap().is_empty());
    }
}
