use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;

use crate::{bus::Bus, logging::init_logger, RunOptions};

struct RuntimeContextInner {
    exiting: AtomicBool,
    bus: Bus,
}

/// A reference to the runtime that a node is running in.
///
/// Contexts are cheap to clone. Each context carries the name of the node
/// it was made for, which `setup_logging!` uses as the log target.
#[derive(Clone)]
pub struct RuntimeContext {
    inner: Arc<RuntimeContextInner>,
    name: Arc<str>,
}

impl RuntimeContext {
    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn clone_new_name(&self, name: impl Into<Arc<str>>) -> Self {
        Self {
            inner: self.inner.clone(),
            name: name.into(),
        }
    }

    /// True once Ctrl-C was received or some node asked the runtime to exit.
    pub fn is_runtime_exiting(&self) -> bool {
        self.inner.exiting.load(Ordering::Acquire)
    }

    /// Asks every node sharing this runtime to stop.
    pub fn request_exit(&self) {
        self.inner.exiting.store(true, Ordering::Release);
    }

    pub fn get_bus(&self) -> &Bus {
        &self.inner.bus
    }
}

/// The context owned by `main`, which hands out `RuntimeContext`s to nodes.
pub struct MainRuntimeContext {
    inner: Arc<RuntimeContextInner>,
}

static CTRL_C_TARGETS: OnceLock<crossbeam::queue::SegQueue<Arc<RuntimeContextInner>>> =
    OnceLock::new();

impl MainRuntimeContext {
    /// Initializes logging and creates a runtime with an empty bus.
    ///
    /// The first runtime created in a process also installs the Ctrl-C handler.
    /// Every runtime alive at that moment is asked to exit on Ctrl-C.
    pub fn new(run_options: &RunOptions) -> anyhow::Result<Self> {
        init_logger(run_options)?;
        let main = Self::without_signals();

        let mut install = false;
        let targets = CTRL_C_TARGETS.get_or_init(|| {
            install = true;
            Default::default()
        });
        targets.push(main.inner.clone());
        if install {
            ctrlc::set_handler(|| {
                log::warn!("Ctrl-C received. Exiting...");
                if let Some(targets) = CTRL_C_TARGETS.get() {
                    for _ in 0..targets.len() {
                        let Some(target) = targets.pop() else {
                            break;
                        };
                        target.exiting.store(true, Ordering::Release);
                        targets.push(target);
                    }
                }
            })
            .context("Failed to initialize Ctrl-C handler")?;
        }
        Ok(main)
    }

    /// Creates a runtime that does not touch logging or signal handlers,
    /// which is what tests want.
    pub fn without_signals() -> Self {
        Self {
            inner: Arc::new(RuntimeContextInner {
                exiting: AtomicBool::new(false),
                bus: Bus::default(),
            }),
        }
    }

    pub fn make_context(&self, name: impl Into<Arc<str>>) -> RuntimeContext {
        RuntimeContext {
            inner: self.inner.clone(),
            name: name.into(),
        }
    }

    pub fn get_bus(&self) -> &Bus {
        &self.inner.bus
    }

    pub fn request_exit(&self) {
        self.inner.exiting.store(true, Ordering::Release);
    }
}

/// Keeps a loop running at a fixed rate.
///
/// If one iteration overruns its period, the next one starts immediately
/// and the schedule is reset instead of trying to catch up.
pub struct Rate {
    period: Duration,
    next: Instant,
}

impl Rate {
    /// Fails if `hz` is not positive or its period does not fit in a `Duration`.
    pub fn new(hz: f64) -> anyhow::Result<Self> {
        if !(hz > 0.0) {
            anyhow::bail!("Rate must be positive, got {hz}");
        }
        let period = Duration::try_from_secs_f64(1.0 / hz)
            .with_context(|| format!("Rate of {hz} Hz has no representable period"))?;
        Ok(Self {
            period,
            next: Instant::now() + period,
        })
    }

    pub fn get_period(&self) -> Duration {
        self.period
    }

    /// Sleeps until the start of the next period. Returns false if
    /// this iteration overran its period.
    pub fn sleep(&mut self) -> bool {
        let now = Instant::now();
        if let Some(remaining) = self.next.checked_duration_since(now) {
            spin_sleep::sleep(remaining);
            self.next += self.period;
            true
        } else {
            self.next = now + self.period;
            false
        }
    }
}
