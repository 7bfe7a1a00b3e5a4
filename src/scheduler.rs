use crate::modulation::FrequencyPlan;
use log::warn;
use std::collections::VecDeque;

/// How the end of a rendered plan is signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// The host calls `complete` once playback has finished.
    #[default]
    Explicit,
    /// The plan counts as finished after its length in samples has been fed
    /// to `tick`. Suits hosts that keep pushing input while they play.
    SampleCount { sample_rate: u32 },
}

/// Half-duplex transmit queue. At most one plan is in flight; the rest wait
/// in FIFO order.
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: VecDeque<FrequencyPlan>,
    in_flight: Option<FrequencyPlan>,
    mode: CompletionMode,
    remaining: usize,
}

impl Scheduler {
    pub fn new(mode: CompletionMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    /// Queue a plan. Returns it back when it starts immediately and must be
    /// dispatched to the host now.
    pub fn request_send(&mut self, plan: FrequencyPlan) -> Option<&FrequencyPlan> {
        self.queue.push_back(plan);
        if self.in_flight.is_some() {
            return None;
        }
        self.start_next()
    }

    /// Finish the plan in flight and start the next one, if any.
    pub fn complete(&mut self) -> Option<&FrequencyPlan> {
        if self.in_flight.take().is_none() {
            warn!("render completion reported with nothing in flight");
            return None;
        }
        self.start_next()
    }

    /// Advance the sample-count clock. Returns the next plan to dispatch when
    /// the one in flight finished during these samples.
    pub fn tick(&mut self, samples: usize) -> Option<&FrequencyPlan> {
        if !matches!(self.mode, CompletionMode::SampleCount { .. }) || self.in_flight.is_none() {
            return None;
        }
        if samples < self.remaining {
            self.remaining -= samples;
            return None;
        }
        self.remaining = 0;
        self.in_flight = None;
        self.start_next()
    }

    fn start_next(&mut self) -> Option<&FrequencyPlan> {
        let plan = self.queue.pop_front()?;
        if let CompletionMode::SampleCount { sample_rate } = self.mode {
            self.remaining = plan.sample_count(sample_rate).max(1);
        }
        self.in_flight = Some(plan);
        self.in_flight.as_ref()
    }

    pub fn is_transmitting(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<&FrequencyPlan> {
        self.in_flight.as_ref()
    }

    /// Plans waiting behind the one in flight.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulation::Tone;

    fn plan(frequency: f32) -> FrequencyPlan {
        FrequencyPlan {
            tones: vec![Tone {
                frequency,
                start: 0.0,
            }],
            tone_duration: 0.1,
            attack_time: 0.01,
            release_time: 0.01,
            gap_after: 0.2,
        }
    }

    #[test]
    fn test_first_request_starts_immediately() {
        let mut scheduler = Scheduler::new(CompletionMode::Explicit);
        assert!(!scheduler.is_transmitting());

        assert_eq!(scheduler.request_send(plan(1000.0)), Some(&plan(1000.0)));
        assert!(scheduler.is_transmitting());
        assert_eq!(scheduler.request_send(plan(2000.0)), None);
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_fifo_order() {
        let mut scheduler = Scheduler::new(CompletionMode::Explicit);
        let mut dispatched = Vec::new();

        for f in [1000.0, 2000.0, 3000.0] {
            if let Some(p) = scheduler.request_send(plan(f)) {
                dispatched.push(p.tones[0].frequency);
            }
        }
        while let Some(p) = scheduler.complete() {
            dispatched.push(p.tones[0].frequency);
        }

        assert_eq!(dispatched, vec![1000.0, 2000.0, 3000.0]);
        assert!(!scheduler.is_transmitting());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_stray_completion_is_ignored() {
        let mut scheduler = Scheduler::new(CompletionMode::Explicit);
        assert_eq!(scheduler.complete(), None);
        assert!(!scheduler.is_transmitting());
    }

    #[test]
    fn test_sample_count_completion() {
        let mut scheduler = Scheduler::new(CompletionMode::SampleCount { sample_rate: 1000 });
        // 100 samples of tone + 200 of gap
        scheduler.request_send(plan(1000.0));
        scheduler.request_send(plan(2000.0));

        assert_eq!(scheduler.tick(299), None);
        assert!(scheduler.is_transmitting());
        let next = scheduler.tick(1).map(|p| p.tones[0].frequency);
        assert_eq!(next, Some(2000.0));

        assert_eq!(scheduler.tick(1000), None);
        assert!(!scheduler.is_transmitting());
    }

    #[test]
    fn test_explicit_mode_ignores_ticks() {
        let mut scheduler = Scheduler::new(CompletionMode::Explicit);
        scheduler.request_send(plan(1000.0));
        assert_eq!(scheduler.tick(1_000_000), None);
        assert!(scheduler.is_transmitting());
    }
}
