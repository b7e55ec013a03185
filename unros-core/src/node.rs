use crate::{runtime::RuntimeContext, setup_logging};

/// The outcome of a node, which knows how to report itself once the node finishes.
pub trait NodeResult: Send + 'static {
    fn finish(self, context: &RuntimeContext);
}

impl NodeResult for () {
    fn finish(self, context: &RuntimeContext) {
        setup_logging!(context);
        info!("Node finished successfully.");
    }
}

impl<T: NodeResult, E: std::fmt::Debug + Send + 'static> NodeResult for Result<T, E> {
    fn finish(self, context: &RuntimeContext) {
        setup_logging!(context);
        match self {
            Ok(result) => result.finish(context),
            Err(err) => error!("Node finished with error: {:?}", err),
        }
    }
}

/// A node that owns the thread it runs on.
///
/// Device drivers that block on hardware are written as `SyncNode`s so that
/// they never block an asynchronous executor.
pub trait SyncNode {
    type Result: NodeResult;

    fn run(self, context: RuntimeContext) -> Self::Result;

    /// Runs the node on the current thread and logs how it finished.
    fn run_to_end(self, context: RuntimeContext)
    where
        Self: Sized,
    {
        let result = self.run(context.clone());
        result.finish(&context);
    }

    /// Runs the node on a new thread.
    fn spawn(self, context: RuntimeContext) -> std::thread::JoinHandle<()>
    where
        Self: Sized + Send + 'static,
    {
        std::thread::spawn(move || self.run_to_end(context))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::SyncNode;
    use crate::runtime::{MainRuntimeContext, RuntimeContext};

    struct CountUntilExit(Arc<AtomicUsize>);

    impl SyncNode for CountUntilExit {
        type Result = anyhow::Result<()>;

        fn run(self, context: RuntimeContext) -> Self::Result {
            while !context.is_runtime_exiting() {
                if self.0.fetch_add(1, Ordering::AcqRel) == 9 {
                    context.request_exit();
                }
            }
            Ok(())
        }
    }

    #[test]
    fn spawned_node_stops_on_exit() {
        let main = MainRuntimeContext::without_signals();
        let count = Arc::new(AtomicUsize::new(0));
        CountUntilExit(count.clone())
            .spawn(main.make_context("counter"))
            .join()
            .unwrap();
        assert_eq!(count.load(Ordering::Acquire), 10);
    }
}
