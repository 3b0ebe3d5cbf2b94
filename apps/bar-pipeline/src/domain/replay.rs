//! Replay Session Types
//!
//! Pure state for one replay connection: which requested symbols are served
//! from which stored series, a shared index cursor across all series, and a
//! pass counter for loop mode. The server drives a session by repeatedly
//! asking for the next [`ReplayStep`] and handles pacing and I/O itself.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::bar::Bar;

/// Pacing interval at a speed multiplier of 1.0.
pub const BASE_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Replay Mode
// =============================================================================

/// Repeat semantics of a replay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayMode {
    /// Stream every series once, then close.
    #[default]
    SinglePass,
    /// Repeat the single pass a configured number of times.
    Loop,
}

impl ReplayMode {
    /// Parse case-insensitively, accepting `single_pass`/`single-pass`/`loop`.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "single_pass" | "single" => Some(Self::SinglePass),
            "loop" => Some(Self::Loop),
            _ => None,
        }
    }

    /// Configuration string for this mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SinglePass => "single_pass",
            Self::Loop => "loop",
        }
    }
}

// =============================================================================
// Replay Plan
// =============================================================================

/// Pacing and repeat parameters shared by every connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayPlan {
    /// Repeat semantics.
    pub mode: ReplayMode,
    /// Speed multiplier, strictly positive.
    pub speed: f64,
    /// Number of passes in loop mode; zero or less means unbounded.
    pub loop_count: i64,
    /// Pause between passes in loop mode.
    pub loop_pause: Duration,
}

impl Default for ReplayPlan {
    fn default() -> Self {
        Self {
            mode: ReplayMode::SinglePass,
            speed: 1.0,
            loop_count: 0,
            loop_pause: Duration::from_secs(1),
        }
    }
}

impl ReplayPlan {
    /// Delay between two frames: `BASE_INTERVAL / speed`.
    ///
    /// `None` when `speed` is not a positive finite number or the quotient
    /// does not fit in a [`Duration`].
    #[must_use]
    pub fn checked_frame_delay(&self) -> Option<Duration> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(BASE_INTERVAL.as_secs_f64() / self.speed).ok()
    }

    /// Delay between two frames. A non-positive speed paces at
    /// `BASE_INTERVAL`; an overflowing quotient saturates at [`Duration::MAX`].
    #[must_use]
    pub fn frame_delay(&self) -> Duration {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return BASE_INTERVAL;
        }
        self.checked_frame_delay().unwrap_or(Duration::MAX)
    }

    /// Number of passes to stream, or `None` when unbounded.
    #[must_use]
    pub fn passes(&self) -> Option<u64> {
        match self.mode {
            ReplayMode::SinglePass => Some(1),
            ReplayMode::Loop => u64::try_from(self.loop_count).ok().filter(|n| *n > 0),
        }
    }
}

// =============================================================================
// Replay Session
// =============================================================================

/// What the server should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayStep {
    /// Send this frame, then wait one frame delay.
    Frame(Vec<Bar>),
    /// A pass finished and another follows; wait the loop pause.
    PassComplete {
        /// Passes finished so far.
        completed: u64,
    },
    /// Every configured pass has been streamed; close the connection.
    Finished,
}

/// Cursor over the resolved series of one connection.
#[derive(Debug)]
pub struct ReplaySession {
    /// (requested, resolved) in requested order.
    lanes: Vec<(String, String)>,
    /// Ascending series per distinct resolved symbol.
    series: HashMap<String, Vec<Bar>>,
    passes: Option<u64>,
    cursor: usize,
    passes_completed: u64,
}

impl ReplaySession {
    /// Create a session.
    ///
    /// `lanes` pairs each requested symbol with the symbol whose series it is
    /// served from; `series` holds one ascending series per resolved symbol.
    #[must_use]
    pub fn new(
        lanes: Vec<(String, String)>,
        series: HashMap<String, Vec<Bar>>,
        plan: &ReplayPlan,
    ) -> Self {
        Self {
            lanes,
            series,
            passes: plan.passes(),
            cursor: 0,
            passes_completed: 0,
        }
    }

    /// Total stored records across the distinct resolved series.
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    /// Frames per pass: the shortest resolved series bounds the cursor.
    #[must_use]
    pub fn frames_per_pass(&self) -> usize {
        if self.lanes.is_empty() {
            return 0;
        }
        self.lanes
            .iter()
            .map(|(_, resolved)| self.series.get(resolved).map_or(0, Vec::len))
            .min()
            .unwrap_or(0)
    }

    /// Whether the session has nothing to stream.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_records() == 0 || self.frames_per_pass() == 0
    }

    /// Passes completed so far.
    #[must_use]
    pub const fn passes_completed(&self) -> u64 {
        self.passes_completed
    }

    /// Advance the session, stamping frame entries with `now`.
    pub fn next_step(&mut self, now: DateTime<Utc>) -> ReplayStep {
        let per_pass = self.frames_per_pass();
        if per_pass == 0 || self.passes.is_some_and(|n| self.passes_completed >= n) {
            return ReplayStep::Finished;
        }

        if self.cursor >= per_pass {
            self.cursor = 0;
            self.passes_completed += 1;
            if self.passes.is_some_and(|n| self.passes_completed >= n) {
                return ReplayStep::Finished;
            }
            return ReplayStep::PassComplete {
                completed: self.passes_completed,
            };
        }

        let index = self.cursor;
        self.cursor += 1;

        let frame = self
            .lanes
            .iter()
            .filter_map(|(requested, resolved)| {
                self.series
                    .get(resolved)
                    .and_then(|bars| bars.get(index))
                    .map(|bar| bar.relabel(requested, now))
            })
            .collect();

        ReplayStep::Frame(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bar::DataSource;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn series(symbol: &str, len: usize) -> Vec<Bar> {
        (0..len)
            .map(|i| Bar {
                symbol: symbol.to_string(),
                timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()
                    + chrono::Duration::minutes(i64::try_from(i).unwrap()),
                open: Decimal::from(i64::try_from(i).unwrap()),
                high: Decimal::from(i64::try_from(i).unwrap() + 1),
                low: Decimal::from(i64::try_from(i).unwrap()),
                close: Decimal::from(i64::try_from(i).unwrap()),
                volume: 100,
                data_source: DataSource::Live,
            })
            .collect()
    }

    fn lanes(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(a, b)| ((*a).to_string(), (*b).to_string()))
            .collect()
    }

    fn drain(session: &mut ReplaySession) -> (usize, u64) {
        let mut frames = 0;
        let mut boundaries = 0;
        loop {
            match session.next_step(Utc::now()) {
                ReplayStep::Frame(_) => frames += 1,
                ReplayStep::PassComplete { .. } => boundaries += 1,
                ReplayStep::Finished => return (frames, boundaries),
            }
        }
    }

    #[test]
    fn frame_delay_divides_base_interval() {
        let plan = ReplayPlan {
            speed: 4.0,
            ..ReplayPlan::default()
        };
        assert_eq!(plan.frame_delay(), Duration::from_millis(250));
    }

    #[test]
    fn tiny_speed_saturates_instead_of_panicking() {
        let plan = ReplayPlan {
            speed: 1e-20,
            ..ReplayPlan::default()
        };
        assert_eq!(plan.checked_frame_delay(), None);
        assert_eq!(plan.frame_delay(), Duration::MAX);
    }

    #[test]
    fn passes_by_mode() {
        let mut plan = ReplayPlan::default();
        assert_eq!(plan.passes(), Some(1));
        plan.mode = ReplayMode::Loop;
        plan.loop_count = 3;
        assert_eq!(plan.passes(), Some(3));
        plan.loop_count = 0;
        assert_eq!(plan.passes(), None);
        plan.loop_count = -2;
        assert_eq!(plan.passes(), None);
    }

    #[test]
    fn single_pass_bounded_by_shortest_series() {
        let map = HashMap::from([
            ("A".to_string(), series("A", 50)),
            ("B".to_string(), series("B", 80)),
        ]);
        let mut session =
            ReplaySession::new(lanes(&[("A", "A"), ("B", "B")]), map, &ReplayPlan::default());

        assert_eq!(session.total_records(), 130);
        assert_eq!(session.frames_per_pass(), 50);
        assert_eq!(drain(&mut session), (50, 0));
    }

    #[test]
    fn frames_are_relabelled_per_requested_symbol() {
        let map = HashMap::from([("AAPL".to_string(), series("AAPL", 3))]);
        let mut session = ReplaySession::new(
            lanes(&[("AAPL", "AAPL"), ("PDFS", "AAPL")]),
            map,
            &ReplayPlan::default(),
        );
        let now = Utc::now();

        let ReplayStep::Frame(frame) = session.next_step(now) else {
            panic!("expected a frame");
        };
        assert_eq!(frame.len(), 2);
        assert_eq!(frame[0].symbol, "AAPL");
        assert_eq!(frame[1].symbol, "PDFS");
        assert_eq!(frame[0].open, frame[1].open);
        assert!(frame.iter().all(|b| b.timestamp == now));
    }

    #[test]
    fn bounded_loop_repeats_then_finishes() {
        let map = HashMap::from([("A".to_string(), series("A", 4))]);
        let plan = ReplayPlan {
            mode: ReplayMode::Loop,
            loop_count: 3,
            ..ReplayPlan::default()
        };
        let mut session = ReplaySession::new(lanes(&[("A", "A")]), map, &plan);

        assert_eq!(drain(&mut session), (12, 2));
        assert_eq!(session.passes_completed(), 3);
    }

    #[test]
    fn unbounded_loop_keeps_going() {
        let map = HashMap::from([("A".to_string(), series("A", 2))]);
        let plan = ReplayPlan {
            mode: ReplayMode::Loop,
            loop_count: 0,
            ..ReplayPlan::default()
        };
        let mut session = ReplaySession::new(lanes(&[("A", "A")]), map, &plan);

        for _ in 0..1000 {
            assert_ne!(session.next_step(Utc::now()), ReplayStep::Finished);
        }
    }

    #[test]
    fn empty_series_is_empty_session() {
        let map = HashMap::from([("A".to_string(), Vec::new())]);
        let mut session = ReplaySession::new(lanes(&[("A", "A")]), map, &ReplayPlan::default());
        assert!(session.is_empty());
        assert_eq!(session.next_step(Utc::now()), ReplayStep::Finished);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(
            ReplayMode::from_str_case_insensitive("SINGLE-PASS"),
            Some(ReplayMode::SinglePass)
        );
        assert_eq!(ReplayMode::from_str_case_insensitive("loop"), Some(ReplayMode::Loop));
        assert_eq!(ReplayMode::from_str_case_insensitive("forever"), None);
    }
}
