//! Throttled training status reporting.
//!
//! Status is emitted periodically, not every step: the throttle gates
//! emission to at most once per interval of wall-clock time regardless of
//! step rate. The default interval is one second.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Wall-clock gate for status emission.
#[derive(Debug)]
pub struct StatusThrottle {
    interval: Duration,
    last: Instant,
}

impl StatusThrottle {
    /// Create a throttle with the given minimum interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    /// Default one-second throttle.
    pub fn per_second() -> Self {
        Self::new(Duration::from_millis(1000))
    }

    /// Whether enough wall-clock time has passed since the last emission.
    /// A `true` result restarts the interval.
    pub fn ready(&mut self) -> bool {
        if self.last.elapsed() >= self.interval {
            self.last = Instant::now();
            true
        } else {
            false
        }
    }
}

/// Snapshot of global training progress for one status line.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainerStatus {
    /// Global iteration count.
    pub iteration: usize,
    /// Global iteration ceiling.
    pub max_iterations: usize,
    /// Global episode count.
    pub episodes: usize,
    /// Global reward under the configured reward mode.
    pub global_reward: f64,
    /// Current training loss.
    pub loss: f64,
    /// Current learning rate.
    pub learning_rate: f64,
    /// Current exploration rate.
    pub exploration_rate: f64,
    /// Fraction of steps taking the engine's preferred action.
    pub optimal_selection_rate: f64,
}

impl TrainerStatus {
    /// Training progress fraction, `iteration / max_iterations`.
    pub fn progress(&self) -> f64 {
        if self.max_iterations == 0 {
            0.0
        } else {
            self.iteration as f64 / self.max_iterations as f64
        }
    }
}

/// Logger backend for status snapshots.
pub trait StatusLogger: Send {
    /// Log one status snapshot.
    fn log(&mut self, status: &TrainerStatus);

    /// Flush any buffered output.
    fn flush(&mut self);
}

/// Console logger printing one progress line per snapshot.
pub struct ConsoleStatusLogger {
    show_header: bool,
}

impl ConsoleStatusLogger {
    /// Create a console logger.
    pub fn new() -> Self {
        Self { show_header: true }
    }
}

impl Default for ConsoleStatusLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusLogger for ConsoleStatusLogger {
    fn log(&mut self, status: &TrainerStatus) {
        if self.show_header {
            println!(
                "{:>8} {:>8} {:>10} {:>10} {:>8} {:>8}",
                "Iter", "Episode", "Reward", "Loss", "Explore", "Optimal"
            );
            println!("{}", "-".repeat(58));
            self.show_header = false;
        }

        println!(
            "{:>8} {:>8} {:>10.2} {:>10.4} {:>7.1}% {:>7.1}% ({:.1}%)",
            status.iteration,
            status.episodes,
            status.global_reward,
            status.loss,
            status.exploration_rate * 100.0,
            status.optimal_selection_rate * 100.0,
            status.progress() * 100.0,
        );
    }

    fn flush(&mut self) {}
}

/// CSV file logger for offline analysis.
pub struct CsvStatusLogger {
    writer: BufWriter<File>,
}

impl CsvStatusLogger {
    /// Create a CSV logger writing to `path`.
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(
            writer,
            "iteration,max_iterations,episodes,global_reward,loss,learning_rate,exploration_rate,optimal_selection_rate"
        )?;
        Ok(Self { writer })
    }
}

impl StatusLogger for CsvStatusLogger {
    fn log(&mut self, status: &TrainerStatus) {
        let _ = writeln!(
            self.writer,
            "{},{},{},{:.6},{:.6},{:.8},{:.6},{:.6}",
            status.iteration,
            status.max_iterations,
            status.episodes,
            status.global_reward,
            status.loss,
            status.learning_rate,
            status.exploration_rate,
            status.optimal_selection_rate,
        );
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

impl Drop for CsvStatusLogger {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_gates_rapid_calls() {
        let mut throttle = StatusThrottle::new(Duration::from_millis(50));

        // Immediately after construction nothing is ready.
        let mut fired = 0;
        for _ in 0..1000 {
            if throttle.ready() {
                fired += 1;
            }
        }
        assert_eq!(fired, 0);

        std::thread::sleep(Duration::from_millis(60));
        assert!(throttle.ready());
        // The successful check restarts the interval.
        assert!(!throttle.ready());
    }

    #[test]
    fn test_throttle_at_most_once_per_interval() {
        let mut throttle = StatusThrottle::new(Duration::from_millis(40));
        let start = Instant::now();
        let mut fired = 0;
        while start.elapsed() < Duration::from_millis(130) {
            if throttle.ready() {
                fired += 1;
            }
        }
        // 130 ms of spinning admits at most 3 emissions at 40 ms spacing.
        assert!(fired <= 3, "fired {} times", fired);
        assert!(fired >= 1);
    }

    #[test]
    fn test_status_progress() {
        let status = TrainerStatus {
            iteration: 25,
            max_iterations: 100,
            ..Default::default()
        };
        assert_eq!(status.progress(), 0.25);

        let unbounded = TrainerStatus::default();
        assert_eq!(unbounded.progress(), 0.0);
    }

    #[test]
    fn test_csv_logger_writes_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.csv");
        {
            let mut logger = CsvStatusLogger::new(&path).unwrap();
            logger.log(&TrainerStatus {
                iteration: 1,
                max_iterations: 10,
                episodes: 1,
                global_reward: 5.0,
                ..Default::default()
            });
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("iteration,"));
        assert!(contents.lines().count() >= 2);
    }
}
