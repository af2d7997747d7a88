use crate::binding::{Binding, Direction};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub cycle_time: Duration,
    /// Cycles running later than this behind schedule are logged.
    pub overrun_warning: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            cycle_time: Duration::from_millis(100),
            overrun_warning: Duration::from_millis(50),
        }
    }
}

#[derive(Clone, Default, Debug)]
pub struct ExecutionStats {
    pub cycles_executed: u64,
    pub cycles_missed: u64,
    pub binding_failures: u64,
    pub last_cycle_us: u64,
    pub max_cycle_us: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct CycleInfo {
    pub cycle: u64,
    /// Time since the loop was created.
    pub elapsed: Duration,
    pub cycle_time: Duration,
}

/// Work run once per scan cycle between its input and output bindings.
pub trait ScanTask: Send {
    fn name(&self) -> &str;
    fn bindings_mut(&mut self) -> &mut [Binding];
    fn execute(&mut self, cycle: &CycleInfo);
}

type CycleObserver = Box<dyn FnMut(&ExecutionStats) + Send>;

pub struct ScanLoop {
    config: ScanConfig,
    tasks: Vec<Box<dyn ScanTask>>,
    stats: ExecutionStats,
    started: Instant,
    observer: Option<CycleObserver>,
}

impl ScanLoop {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            tasks: Vec::new(),
            stats: ExecutionStats::default(),
            started: Instant::now(),
            observer: None,
        }
    }

    pub fn add_task(&mut self, task: impl ScanTask + 'static) {
        self.tasks.push(Box::new(task));
    }

    /// Called with the updated stats after every cycle.
    pub fn observe_cycles(&mut self, observer: impl FnMut(&ExecutionStats) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// Runs every task once: read bindings, execute, write bindings.
    pub fn run_cycle(&mut self) {
        let cycle_start = Instant::now();
        let info = CycleInfo {
            cycle: self.stats.cycles_executed,
            elapsed: self.started.elapsed(),
            cycle_time: self.config.cycle_time,
        };

        for task in self.tasks.iter_mut() {
            sync_bindings(task.as_mut(), Direction::Read, &mut self.stats);
            task.execute(&info);
            sync_bindings(task.as_mut(), Direction::Write, &mut self.stats);
        }

        let cycle_us = cycle_start.elapsed().as_micros() as u64;
        self.stats.last_cycle_us = cycle_us;
        self.stats.max_cycle_us = self.stats.max_cycle_us.max(cycle_us);
        self.stats.cycles_executed += 1;

        if let Some(observer) = self.observer.as_mut() {
            observer(&self.stats);
        }
    }

    pub fn run(&mut self, stop: &AtomicBool) {
        let mut next_cycle = Instant::now();

        while !stop.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now < next_cycle {
                std::thread::sleep(next_cycle - now);
            } else {
                let behind = now.duration_since(next_cycle);
                if behind > self.config.overrun_warning {
                    self.stats.cycles_missed += 1;
                    warn!("scan cycle running {} us late", behind.as_micros());
                    next_cycle = now;
                }
            }

            self.run_cycle();
            next_cycle += self.config.cycle_time;
        }

        debug!("scan loop stopped after {} cycles", self.stats.cycles_executed);
    }
}

fn sync_bindings(task: &mut dyn ScanTask, direction: Direction, stats: &mut ExecutionStats) {
    let name = task.name().to_string();
    for binding in task.bindings_mut() {
        if binding.direction() != direction {
            continue;
        }
        if let Err(e) = binding.update() {
            stats.binding_failures += 1;
            warn!("{}: binding {} failed: {}", name, binding.target(), e);
        }
    }
}
