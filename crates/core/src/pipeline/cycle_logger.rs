use std::collections::HashMap;
use std::time::Instant;

/// Stage name for time spent inside the detection engine.
pub const STAGE_DETECT: &str = "detect";
/// Stage name for clear + draw + present of one cycle.
pub const STAGE_DRAW: &str = "draw";
pub const METRIC_FACES: &str = "faces";
pub const METRIC_DROPPED_TICKS: &str = "dropped_ticks";

/// Observer for sync-loop events.
///
/// The loop reports through this instead of printing directly, so the CLI
/// can aggregate a run summary while the desktop stays silent.
pub trait CycleLogger: Send {
    /// Record how long a named stage took for one cycle.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. face count).
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// Emit an end-of-loop summary. Default: no-op.
    fn summary(&self) {}
}

/// Discards everything. Used by the desktop and by tests.
pub struct NullCycleLogger;

impl CycleLogger for NullCycleLogger {
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Running count, sum and maximum of one stage or metric.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunningStat {
    pub count: u64,
    pub total: f64,
    pub max: f64,
}

impl RunningStat {
    fn record(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
        self.max = if self.count == 1 {
            value
        } else {
            self.max.max(value)
        };
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// Aggregates per-stage timings and metrics, and logs a summary with cycle
/// throughput when the loop stops. Memory stays constant however long the
/// loop runs.
///
/// One drawn cycle is counted per [`STAGE_DRAW`] timing.
pub struct StatsCycleLogger {
    timings: HashMap<String, RunningStat>,
    metrics: HashMap<String, RunningStat>,
    start_time: Instant,
    last_message: Option<String>,
}

impl StatsCycleLogger {
    pub fn new() -> Self {
        Self {
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
            last_message: None,
        }
    }

    pub fn cycles_drawn(&self) -> u64 {
        self.timings.get(STAGE_DRAW).map_or(0, |stat| stat.count)
    }

    /// Returns the formatted summary string, or `None` if no data recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let cycles = self.cycles_drawn();
        let mut lines = vec![format!(
            "Overlay summary ({cycles} cycles, {:.1}s total):",
            elapsed_ms / 1000.0
        )];

        let mut stages: Vec<_> = self.timings.iter().collect();
        stages.sort_by(|a, b| a.0.cmp(b.0));
        for (stage, stat) in stages {
            lines.push(format!(
                "  {stage:12}: avg {:6.1}ms  max {:6.1}ms  total {:7.0}ms",
                stat.mean(),
                stat.max,
                stat.total
            ));
        }

        let mut metrics: Vec<_> = self.metrics.iter().collect();
        metrics.sort_by(|a, b| a.0.cmp(b.0));
        for (name, stat) in metrics {
            lines.push(format!(
                "  {name}: avg {:.1}  total {:.0}",
                stat.mean(),
                stat.total
            ));
        }

        if cycles > 0 && elapsed_ms > 0.0 {
            let rate = cycles as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Throughput: {rate:.1} cycles/s"));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<RunningStat> {
        self.timings.get(stage).copied()
    }

    pub fn metrics_for(&self, name: &str) -> Option<RunningStat> {
        self.metrics.get(name).copied()
    }
}

impl Default for StatsCycleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleLogger for StatsCycleLogger {
    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .record(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics.entry(name.to_string()).or_default().record(value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
        self.last_message = Some(message.to_string());
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_null_logger_all_methods_are_noop() {
        let mut logger = NullCycleLogger;
        logger.timing(STAGE_DETECT, 5.0);
        logger.metric(METRIC_FACES, 3.0);
        logger.info("hello");
        logger.summary();
    }

    #[test]
    fn test_timing_records_values() {
        let mut logger = StatsCycleLogger::new();
        logger.timing(STAGE_DETECT, 20.0);
        logger.timing(STAGE_DETECT, 30.0);
        logger.timing(STAGE_DRAW, 5.0);

        let detect = logger.timings_for(STAGE_DETECT).unwrap();
        assert_eq!(detect.count, 2);
        assert_relative_eq!(detect.total, 50.0);
        assert_relative_eq!(detect.max, 30.0);
        assert_eq!(logger.timings_for(STAGE_DRAW).unwrap().count, 1);
        assert!(logger.timings_for("missing").is_none());
    }

    #[test]
    fn test_cycles_counted_from_draw_timings() {
        let mut logger = StatsCycleLogger::new();
        assert_eq!(logger.cycles_drawn(), 0);
        logger.timing(STAGE_DETECT, 1.0);
        logger.timing(STAGE_DRAW, 1.0);
        logger.timing(STAGE_DRAW, 1.0);
        assert_eq!(logger.cycles_drawn(), 2);
    }

    #[test]
    fn test_metric_records_values() {
        let mut logger = StatsCycleLogger::new();
        logger.metric(METRIC_FACES, 3.0);
        logger.metric(METRIC_FACES, 4.0);

        let faces = logger.metrics_for(METRIC_FACES).unwrap();
        assert_relative_eq!(faces.mean(), 3.5);
    }

    #[test]
    fn test_summary_includes_stages_and_metrics() {
        let mut logger = StatsCycleLogger::new();
        logger.timing(STAGE_DETECT, 20.0);
        logger.timing(STAGE_DRAW, 2.0);
        logger.metric(METRIC_FACES, 1.0);
        logger.metric(METRIC_FACES, 2.0);
        logger.metric(METRIC_DROPPED_TICKS, 1.0);

        let summary = logger.summary_string().unwrap();
        assert!(summary.contains("Overlay summary (1 cycles"));
        assert!(summary.contains("detect"));
        assert!(summary.contains("draw"));
        assert!(summary.contains("faces: avg 1.5  total 3"));
        assert!(summary.contains("dropped_ticks"));
    }

    #[test]
    fn test_summary_includes_throughput() {
        let mut logger = StatsCycleLogger::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        logger.timing(STAGE_DRAW, 1.0);
        assert!(logger.summary_string().unwrap().contains("cycles/s"));
    }

    #[test]
    fn test_empty_summary_returns_none() {
        assert!(StatsCycleLogger::new().summary_string().is_none());
    }

    #[test]
    fn test_info_keeps_last_message() {
        let mut logger = StatsCycleLogger::default();
        logger.info("hello world");
        assert_eq!(logger.last_message.as_deref(), Some("hello world"));
    }

    #[test]
    fn test_running_stat_keeps_max_of_negative_samples() {
        let mut stat = RunningStat::default();
        assert_relative_eq!(stat.mean(), 0.0);
        stat.record(-3.0);
        stat.record(-1.0);
        assert_relative_eq!(stat.max, -1.0);
        assert_relative_eq!(stat.mean(), -2.0);
    }

    #[test]
    fn test_long_runs_do_not_grow_memory() {
        let mut logger = StatsCycleLogger::new();
        for i in 0..100_000 {
            logger.timing(STAGE_DRAW, 1.0);
            logger.metric(METRIC_FACES, f64::from(i % 3));
        }
        assert_eq!(logger.cycles_drawn(), 100_000);
        assert_eq!(logger.timings.len(), 1);
        assert_relative_eq!(logger.metrics_for(METRIC_FACES).unwrap().max, 2.0);
    }
}
