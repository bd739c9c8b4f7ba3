use std::collections::VecDeque;
use std::time::Duration;

/// Durations of the most recent frames, with a running total.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    window: VecDeque<Duration>,
    capacity: usize,
    total: Duration,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            total: Duration::ZERO,
        }
    }

    pub fn record(&mut self, frame: Duration) {
        if self.window.len() == self.capacity {
            if let Some(oldest) = self.window.pop_front() {
                self.total -= oldest;
            }
        }
        self.window.push_back(frame);
        self.total += frame;
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn average(&self) -> Duration {
        match self.window.len() {
            0 => Duration::ZERO,
            n => self.total / n as u32,
        }
    }

    pub fn max(&self) -> Duration {
        self.window.iter().copied().max().unwrap_or_default()
    }

    pub fn min(&self) -> Duration {
        self.window.iter().copied().min().unwrap_or_default()
    }

    /// Frames in the window that took longer than `budget`.
    pub fn over_budget(&self, budget: Duration) -> usize {
        self.window.iter().filter(|&&d| d > budget).count()
    }
}

/// Frame loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub rendered: u64,
    /// Frames the runtime asked not to render.
    pub skipped: u64,
    pub dropped_contention: u64,
    pub dropped_submit: u64,
    pub dropped_render: u64,
    pub idle_polls: u64,
    pub session_losses: u64,
    pub reconnects: u64,
    /// Rendered frames that took longer than the runtime's frame period.
    pub late_frames: u64,
    /// Draw calls issued across all rendered frames.
    pub draw_calls: u64,
    pub avg_frame: Duration,
    pub max_frame: Duration,
}

impl SchedulerStats {
    pub fn dropped(&self) -> u64 {
        self.dropped_contention + self.dropped_submit + self.dropped_render
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn window_statistics() {
        let mut timer = FrameTimer::new(4);
        for d in [8, 11, 14] {
            timer.record(ms(d));
        }
        assert_eq!(timer.len(), 3);
        assert_eq!(timer.average(), ms(11));
        assert_eq!(timer.min(), ms(8));
        assert_eq!(timer.max(), ms(14));
        assert_eq!(timer.over_budget(ms(11)), 1);
    }

    #[test]
    fn oldest_frames_fall_out_of_the_window() {
        let mut timer = FrameTimer::new(2);
        for d in [30, 10, 20] {
            timer.record(ms(d));
        }
        assert_eq!(timer.len(), 2);
        assert_eq!(timer.average(), ms(15));
        assert_eq!(timer.max(), ms(20));
    }

    #[test]
    fn empty_window_reports_zero() {
        let timer = FrameTimer::new(0);
        assert!(timer.is_empty());
        assert_eq!(timer.average(), Duration::ZERO);
        assert_eq!(timer.max(), Duration::ZERO);
    }

    #[test]
    fn dropped_frames_sum_every_reason() {
        let stats = SchedulerStats {
            dropped_contention: 2,
            dropped_submit: 1,
            dropped_render: 1,
            ..SchedulerStats::default()
        };
        assert_eq!(stats.dropped(), 4);
    }
}
