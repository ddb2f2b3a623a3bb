use std::time::{Duration, Instant};

use chrono::NaiveDateTime;

use super::types::DemandRecord;

/// Steps through a demand sequence one timestep at a time.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use p2p_energy_sim::sim::clock::Clock;
/// use p2p_energy_sim::sim::types::DemandRecord;
///
/// let t0 = NaiveDate::from_ymd_opt(2013, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
/// let records = vec![DemandRecord::new(t0, 0.2), DemandRecord::missing(t0)];
///
/// let mut clock = Clock::new(&records);
/// let mut steps = Vec::new();
/// clock.run(|step, _| steps.push(step));
/// assert_eq!(steps, vec![0, 1]);
/// ```
pub struct Clock<'a> {
    /// Index of the next record to hand out
    current: usize,
    records: &'a [DemandRecord],
}

impl<'a> Clock<'a> {
    pub fn new(records: &'a [DemandRecord]) -> Self {
        Self {
            current: 0,
            records,
        }
    }

    /// Advances the clock by one step.
    ///
    /// # Returns
    ///
    /// * `Some((step, record))` - The step number and its record
    /// * `None` - If every record has been handed out
    pub fn tick(&mut self) -> Option<(usize, &'a DemandRecord)> {
        let record = self.records.get(self.current)?;
        let step = self.current;
        self.current += 1;
        Some((step, record))
    }

    /// Number of steps not yet handed out.
    pub fn remaining(&self) -> usize {
        self.records.len() - self.current
    }

    /// Runs a function for each remaining step.
    pub fn run(&mut self, mut f: impl FnMut(usize, &'a DemandRecord)) {
        while let Some((step, record)) = self.tick() {
            f(step, record);
        }
    }
}

/// Maps simulated time onto wall-clock time at a fixed speedup.
///
/// Simulated time elapsed since `origin`, divided by `speedup`, gives the
/// wall-clock time at which a timestep is due.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    origin: NaiveDateTime,
    started: Instant,
    speedup: f64,
}

impl Pacer {
    /// Starts pacing now, with `origin` as the first simulated timestamp.
    pub fn start(origin: NaiveDateTime, speedup: f64) -> Self {
        Self {
            origin,
            started: Instant::now(),
            speedup,
        }
    }

    /// How long to wait before `ts` is due, given `real_elapsed` since start.
    ///
    /// Never negative: a step that is already late is due immediately. A wait
    /// too long to represent saturates at [`Duration::MAX`].
    pub fn delay(&self, ts: NaiveDateTime, real_elapsed: Duration) -> Duration {
        if !(self.speedup.is_finite() && self.speedup > 0.0) {
            return Duration::ZERO;
        }
        let sim_elapsed = (ts - self.origin).num_milliseconds() as f64 / 1000.0;
        let due = sim_elapsed / self.speedup;
        let wait = due - real_elapsed.as_secs_f64();
        if wait > 0.0 {
            Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }

    /// Delay until `ts` measured against the real clock.
    pub fn delay_now(&self, ts: NaiveDateTime) -> Duration {
        self.delay(ts, self.started.elapsed())
    }
}
