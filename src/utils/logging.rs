use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::{prelude::*, EnvFilter};
use tracing_timing::{Builder, Histogram};

// Categories for the operations worth timing in a run
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
pub enum OperationCategory {
    Evaluation,
    FluidFlash,
    ChartQuery,
    PumpModel,
    TrainSolve,
    SystemSelect,
    TabularLookup,
    FileIO { subcategory: FileIOType },
    Other,
}

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
pub enum FileIOType {
    ConfigLoad,
    ResourceLoad,
    ResultsSave,
    Other,
}

impl OperationCategory {
    pub fn as_str(&self) -> String {
        match self {
            OperationCategory::Evaluation => "Evaluation".to_string(),
            OperationCategory::FluidFlash => "Fluid Flash".to_string(),
            OperationCategory::ChartQuery => "Chart Query".to_string(),
            OperationCategory::PumpModel => "Pump Model".to_string(),
            OperationCategory::TrainSolve => "Train Solve".to_string(),
            OperationCategory::SystemSelect => "System Select".to_string(),
            OperationCategory::TabularLookup => "Tabular Lookup".to_string(),
            OperationCategory::FileIO { subcategory } => {
                format!(
                    "File I/O - {}",
                    match subcategory {
                        FileIOType::ConfigLoad => "Config Load",
                        FileIOType::ResourceLoad => "Resource Load",
                        FileIOType::ResultsSave => "Results Save",
                        FileIOType::Other => "Other",
                    }
                )
            }
            OperationCategory::Other => "Other Operations".to_string(),
        }
    }
}

lazy_static! {
    static ref TIMING_ENABLED: AtomicBool = AtomicBool::new(false);
    static ref FUNCTION_TIMINGS: Arc<RwLock<HashMap<String, (Duration, usize)>>> =
        Arc::new(RwLock::new(HashMap::new()));
    static ref CATEGORY_TIMINGS: Arc<RwLock<HashMap<OperationCategory, (Duration, usize)>>> =
        Arc::new(RwLock::new(HashMap::new()));
}

pub struct TimingGuard {
    function_name: String,
    category: OperationCategory,
    start: Instant,
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        record_timing_end(&self.function_name, duration, &self.category);
    }
}

pub fn start_timing(function_name: &str, category: OperationCategory) -> TimingGuard {
    TimingGuard {
        function_name: function_name.to_string(),
        category,
        start: Instant::now(),
    }
}

fn record_timing_end(function_name: &str, duration: Duration, category: &OperationCategory) {
    if !is_timing_enabled() {
        return;
    }

    {
        let mut timings = FUNCTION_TIMINGS.write();
        let entry = timings
            .entry(function_name.to_string())
            .or_insert((Duration::from_nanos(0), 0));
        entry.0 += duration;
        entry.1 += 1;
    }
    {
        let mut timings = CATEGORY_TIMINGS.write();
        let entry = timings
            .entry(category.clone())
            .or_insert((Duration::from_nanos(0), 0));
        entry.0 += duration;
        entry.1 += 1;
    }
}

pub fn init_logging(enable_timing: bool, debug_logging: bool) {
    TIMING_ENABLED.store(enable_timing, Ordering::SeqCst);

    let default_level = if debug_logging {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let env_filter = EnvFilter::from_default_env()
        .add_directive(default_level.into())
        .add_directive("petrowatt=debug".parse().expect("static directive parses"));

    if enable_timing {
        let histogram = || Histogram::<u64>::new_with_bounds(1, 60_000_000_000, 3).unwrap();
        let timing_layer = Builder::default().layer(histogram);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .with(timing_layer.boxed());
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            // Already initialized (tests); keep the existing subscriber
        }
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer());
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            // Already initialized (tests); keep the existing subscriber
        }
    }
}

pub fn is_timing_enabled() -> bool {
    TIMING_ENABLED.load(Ordering::SeqCst)
}

pub fn print_timing_report() {
    if !is_timing_enabled() {
        return;
    }

    println!("\nPerformance Report");
    println!("==================");

    println!("\nBy function:");
    let timings = FUNCTION_TIMINGS.read();
    let mut entries: Vec<_> = timings.iter().collect();
    entries.sort_by(|a, b| b.1 .0.cmp(&a.1 .0));
    for (function_name, (total, count)) in entries {
        let avg = total.div_f64(*count as f64);
        println!(
            "{}: total={:.2}s, count={}, avg={:.2}ms",
            function_name,
            total.as_secs_f64(),
            count,
            avg.as_secs_f64() * 1000.0,
        );
    }

    println!("\nBy category:");
    let categories = CATEGORY_TIMINGS.read();
    let mut entries: Vec<_> = categories.iter().collect();
    entries.sort_by(|a, b| b.1 .0.cmp(&a.1 .0));
    let total_time: f64 = entries.iter().map(|(_, (d, _))| d.as_secs_f64()).sum();
    for (category, (duration, count)) in entries {
        let share = if total_time > 0.0 {
            duration.as_secs_f64() / total_time * 100.0
        } else {
            0.0
        };
        println!(
            "{}: {:.1}% of timed work, count={}, total={:.2}s",
            category.as_str(),
            share,
            count,
            duration.as_secs_f64(),
        );
    }
    println!("==================\n");
}
