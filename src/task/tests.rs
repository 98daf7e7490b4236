#[cfg(test)]
mod tests {
    use crate::error::TaskingError;
    use crate::progress::{ProgressMonitor, ProgressTracker, TaskProgressTracker};
    use crate::scope::Scope;
    use crate::status::{Severity, Status};
    use crate::task::*;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    // Helper building a context the way the engine does for one task
    fn create_test_context(scope: Scope, amount: u64) -> (TaskContext, ProgressMonitor) {
        let monitor = ProgressMonitor::new("test");
        monitor.begin("test", amount);
        let slice = monitor.split(amount);
        let tracker = Arc::new(TaskProgressTracker::new("test", slice.clone()));
        let ctx = TaskContext::new(scope, tracker, slice, TaskOutput::passthrough("test"));
        (ctx, monitor)
    }

    enum Behaviour {
        Return(Option<Status>),
        Publish(Status),
        Fail,
        Cancel,
        Panic,
    }

    struct Scripted {
        behaviour: Behaviour,
    }

    #[async_trait]
    impl Task for Scripted {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<Option<Status>> {
            match &self.behaviour {
                Behaviour::Return(status) => Ok(status.clone()),
                Behaviour::Publish(status) => {
                    ctx.publish_status(status.clone());
                    Ok(None)
                }
                Behaviour::Fail => Err(anyhow::anyhow!("compiler exploded")),
                Behaviour::Cancel => {
                    Err(anyhow::Error::from(TaskingError::Cancelled).context("while compiling"))
                }
                Behaviour::Panic => panic!("index out of range"),
            }
        }
    }

    async fn run_scripted(behaviour: Behaviour) -> Status {
        let task: Arc<dyn Task> = Arc::new(Scripted { behaviour });
        let (ctx, _monitor) = create_test_context(Scope::root("task"), 1);
        execute_single_task(&task, ctx).await
    }

    #[tokio::test]
    async fn test_single_task_outcomes() {
        let status = run_scripted(Behaviour::Return(None)).await;
        assert_eq!(status.severity(), Severity::Ok);
        assert_eq!(status.message(), "Task: scripted");

        let status = run_scripted(Behaviour::Return(Some(Status::info("built")))).await;
        assert_eq!(status.severity(), Severity::Info);
        assert_eq!(status.message(), "built");

        let status = run_scripted(Behaviour::Publish(Status::warning("partial"))).await;
        assert_eq!(status.severity(), Severity::Warning);

        let status = run_scripted(Behaviour::Fail).await;
        assert_eq!(status.severity(), Severity::Error);
        assert_eq!(status.message(), "Fatal failure while executing scripted");
        assert!(format!("{:#}", status.cause().unwrap()).contains("compiler exploded"));

        let status = run_scripted(Behaviour::Cancel).await;
        assert_eq!(status.severity(), Severity::Cancel);
        assert_eq!(status.message(), "Cancelled: scripted");

        let status = run_scripted(Behaviour::Panic).await;
        assert_eq!(status.severity(), Severity::Error);
        assert!(status.message().contains("index out of range"));
    }

    #[tokio::test]
    async fn test_status_is_published_in_task_scope() {
        let scope = Scope::root("task");
        let task: Arc<dyn Task> = Arc::new(Scripted {
            behaviour: Behaviour::Return(Some(Status::info("done"))),
        });
        let (ctx, _monitor) = create_test_context(scope.clone(), 1);
        execute_single_task(&task, ctx).await;

        let published = scope.get_local::<Status>().unwrap();
        assert_eq!(published.message(), "done");
    }

    struct Counter {
        runs: Arc<AtomicUsize>,
    }

    impl CreatableTask for Counter {
        fn create(scope: &Scope) -> anyhow::Result<Self> {
            Ok(Self {
                runs: scope.resolve::<AtomicUsize>()?,
            })
        }
    }

    #[async_trait]
    impl Task for Counter {
        fn name(&self) -> String {
            "counter".to_string()
        }

        async fn execute(&self, _ctx: &TaskContext) -> anyhow::Result<Option<Status>> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[test]
    fn test_factory_descriptor_instantiation() {
        let descriptor = TaskDescriptor::Factory(TaskFactory::of::<Counter>());
        assert!(descriptor.name().ends_with("Counter"));

        let scope = Scope::root("chain");
        let err = descriptor.instantiate(&scope).err().unwrap();
        assert!(matches!(err, TaskingError::Instantiation { .. }));

        scope.set(AtomicUsize::new(0));
        let task = descriptor.instantiate(&scope).unwrap();
        assert_eq!(task.name(), "counter");
    }

    #[tokio::test]
    async fn test_derived_context_is_restricted() {
        let scope = Scope::root("task");
        scope.set(7u32);
        let (ctx, monitor) = create_test_context(scope, 10);

        let derived = ctx.derive("background");
        assert_eq!(*derived.resolve::<u32>().unwrap(), 7);
        derived.tracker().worked(4);
        assert_eq!(monitor.worked(), 0);

        monitor.cancel();
        assert!(derived.is_canceled());
        assert!(matches!(
            derived.check_canceled(),
            Err(TaskingError::Cancelled)
        ));
    }

    #[test]
    fn test_task_writes_to_its_output() {
        let scope = Scope::root("task");
        let (ctx, _monitor) = create_test_context(scope, 1);
        let ctx = ctx.with_output(TaskOutput::new("task", Some(OutputCapture::default())));
        writeln!(ctx.stdout(), "compiling").unwrap();
        writeln!(ctx.stderr(), "warning: unused").unwrap();
    }

    struct Sleepy {
        finished: Arc<AtomicBool>,
        result: Option<Status>,
        fail: bool,
    }

    #[async_trait]
    impl Task for Sleepy {
        fn name(&self) -> String {
            "sleepy".to_string()
        }

        async fn execute(&self, _ctx: &TaskContext) -> anyhow::Result<Option<Status>> {
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.finished.store(true, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("background work failed");
            }
            Ok(self.result.clone())
        }
    }

    fn background_scope() -> Scope {
        let scope = Scope::root("chain");
        scope.set(BackgroundExecutor::new(2));
        scope
    }

    #[tokio::test]
    async fn test_background_wrapper_returns_before_work_finishes() {
        let finished = Arc::new(AtomicBool::new(false));
        let background = BackgroundTask::wrap(Sleepy {
            finished: finished.clone(),
            result: Some(Status::info("slept")),
            fail: false,
        });
        assert_eq!(background.name(), "sleepy (parallel)");
        assert!(!background.is_started());

        let (ctx, _monitor) = create_test_context(background_scope(), 1);
        let wrapper: Arc<dyn Task> = background.clone();
        let status = execute_single_task(&wrapper, ctx.clone()).await;
        assert!(status.is_ok());
        assert!(background.is_started());
        assert!(!finished.load(Ordering::SeqCst));

        let barrier: Arc<dyn Task> = background.barrier();
        assert_eq!(barrier.name(), "Wait for: sleepy (parallel)");
        let status = execute_single_task(&barrier, ctx).await;
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(status.message(), "slept");
    }

    #[tokio::test]
    async fn test_barrier_surfaces_background_failure() {
        let background = BackgroundTask::wrap(Sleepy {
            finished: Arc::new(AtomicBool::new(false)),
            result: None,
            fail: true,
        });
        let (ctx, _monitor) = create_test_context(background_scope(), 1);

        background.execute(&ctx).await.unwrap();
        let barrier = BackgroundTask::all_barrier(&[background.clone()]).unwrap();
        let err = barrier.execute(&ctx).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TaskingError>(),
            Some(TaskingError::Background { .. })
        ));

        // several barriers may await the same work
        let again = background.barrier();
        assert!(again.execute(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_background_without_executor_fails() {
        let background = BackgroundTask::wrap(Sleepy {
            finished: Arc::new(AtomicBool::new(false)),
            result: None,
            fail: false,
        });
        let (ctx, _monitor) = create_test_context(Scope::root("bare"), 1);
        let err = background.execute(&ctx).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TaskingError>(),
            Some(TaskingError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_executor_bounds_concurrency() {
        let executor = BackgroundExecutor::new(1);
        assert_eq!(executor.size(), 1);

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                executor.submit(&format!("job {}", i), async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(None)
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(executor.available(), 1);
    }

    #[test]
    fn test_all_barrier_of_nothing() {
        assert!(BackgroundTask::all_barrier(&[]).is_none());
    }
}
