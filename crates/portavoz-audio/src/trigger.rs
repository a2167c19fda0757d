//! Wake-phrase trigger gate.
//!
//! The gate decides whether recorded audio may be dispatched to the remote
//! transcriber. A matcher inspects every incoming audio block; a match
//! opens the gate for a configured window, and further matches (or ongoing
//! speech) extend the deadline. Audio keeps accumulating in the record
//! buffer while the gate is closed; it just never leaves the machine.
//!
//! The matcher is pluggable and the whole gate is optional: a gate built
//! with [`TriggerGate::disabled`] reports open forever.

use std::time::{Duration, Instant};

/// Inspects audio blocks for the wake phrase.
///
/// Implementations keep whatever decoder state they need between blocks;
/// [`TriggerMatcher::reset`] is called at session boundaries.
pub trait TriggerMatcher: Send {
    /// Feed one block. Returns true when the wake phrase was recognized.
    fn matches(&mut self, samples: &[i16], sample_rate_hz: u32) -> bool;

    /// Drop accumulated decoder state.
    fn reset(&mut self) {}
}

/// Time-windowed transcription enable flag.
#[derive(Default)]
pub struct TriggerGate {
    matcher: Option<Box<dyn TriggerMatcher>>,
    open_until: Option<Instant>,
    timeout: Duration,
}

impl std::fmt::Debug for TriggerGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerGate")
            .field("enabled", &self.matcher.is_some())
            .field("open", &self.is_open())
            .finish()
    }
}

impl TriggerGate {
    /// A gate with no matcher: permanently open.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A gate driven by `matcher`, staying open `timeout` after each match.
    pub fn new(matcher: Box<dyn TriggerMatcher>, timeout: Duration) -> Self {
        Self {
            matcher: Some(matcher),
            open_until: None,
            timeout,
        }
    }

    /// True when gating is active at all.
    pub fn is_enabled(&self) -> bool {
        self.matcher.is_some()
    }

    /// True when audio may currently be dispatched for transcription.
    pub fn is_open(&self) -> bool {
        match (&self.matcher, self.open_until) {
            (None, _) => true,
            (Some(_), Some(deadline)) => Instant::now() < deadline,
            (Some(_), None) => false,
        }
    }

    /// Feed a block to the matcher. Opens (or re-arms) the window on a
    /// match; returns true only when this block fired the trigger from the
    /// closed state, so the caller can queue the confirmation tone once.
    pub fn observe(&mut self, samples: &[i16], sample_rate_hz: u32) -> bool {
        let Some(matcher) = self.matcher.as_mut() else {
            return false;
        };

        if matcher.matches(samples, sample_rate_hz) {
            let was_open = self.is_open();
            self.open_until = Some(Instant::now() + self.timeout);
            return !was_open;
        }
        false
    }

    /// Push the deadline out while speech is in progress, so a sentence
    /// longer than the window is not cut off mid-thought.
    pub fn refresh(&mut self) {
        if self.matcher.is_some() && self.is_open() {
            self.open_until = Some(Instant::now() + self.timeout);
        }
    }

    /// Extend the deadline by `elapsed`. Playback time is not the user's
    /// time: the window must not expire while the service is speaking.
    pub fn extend_by(&mut self, elapsed: Duration) {
        if let Some(deadline) = self.open_until {
            self.open_until = Some(deadline + elapsed);
        }
    }

    /// Close the window and reset the matcher.
    pub fn reset(&mut self) {
        self.open_until = None;
        if let Some(matcher) = self.matcher.as_mut() {
            matcher.reset();
        }
    }
}

/// Development stand-in matcher: fires when a block's mean absolute
/// amplitude crosses a threshold.
///
/// This is not wake-phrase recognition; it exists so the gate path can be
/// exercised end to end before a real recognizer is plugged in.
#[derive(Debug)]
pub struct EnergyMatcher {
    threshold: f32,
}

impl EnergyMatcher {
    /// Matcher firing at normalized mean amplitude `threshold` (0.0–1.0).
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl TriggerMatcher for EnergyMatcher {
    fn matches(&mut self, samples: &[i16], _sample_rate_hz: u32) -> bool {
        if samples.is_empty() {
            return false;
        }
        let mean: f32 = samples
            .iter()
            .map(|&s| f32::from(s).abs() / 32768.0)
            .sum::<f32>()
            / samples.len() as f32;
        mean >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedMatcher {
        fire_on: Vec<bool>,
        call: usize,
    }

    impl TriggerMatcher for ScriptedMatcher {
        fn matches(&mut self, _samples: &[i16], _hz: u32) -> bool {
            let fire = self.fire_on.get(self.call).copied().unwrap_or(false);
            self.call += 1;
            fire
        }
    }

    fn scripted(fire_on: Vec<bool>) -> TriggerGate {
        TriggerGate::new(
            Box::new(ScriptedMatcher { fire_on, call: 0 }),
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_disabled_gate_always_open() {
        let mut gate = TriggerGate::disabled();
        assert!(gate.is_open());
        assert!(!gate.observe(&[0; 8], 16000));
        assert!(gate.is_open());
    }

    #[test]
    fn test_closed_until_match() {
        let mut gate = scripted(vec![false, true]);
        assert!(!gate.is_open());

        assert!(!gate.observe(&[0; 8], 16000));
        assert!(!gate.is_open());

        // Second block fires: gate opens, first-fire is reported.
        assert!(gate.observe(&[0; 8], 16000));
        assert!(gate.is_open());
    }

    #[test]
    fn test_rematch_while_open_is_not_first_fire() {
        let mut gate = scripted(vec![true, true]);
        assert!(gate.observe(&[0; 8], 16000));
        // Still open: a re-match extends but does not re-fire.
        assert!(!gate.observe(&[0; 8], 16000));
        assert!(gate.is_open());
    }

    #[test]
    fn test_reset_closes_and_resets_matcher() {
        let mut gate = scripted(vec![true]);
        assert!(gate.observe(&[0; 8], 16000));
        gate.reset();
        assert!(!gate.is_open());
    }

    #[test]
    fn test_window_expires() {
        let mut gate = TriggerGate::new(
            Box::new(ScriptedMatcher {
                fire_on: vec![true],
                call: 0,
            }),
            Duration::from_millis(10),
        );
        assert!(gate.observe(&[0; 8], 16000));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!gate.is_open());
    }

    #[test]
    fn test_extend_by_pushes_deadline() {
        let mut gate = TriggerGate::new(
            Box::new(ScriptedMatcher {
                fire_on: vec![true],
                call: 0,
            }),
            Duration::from_millis(30),
        );
        assert!(gate.observe(&[0; 8], 16000));
        gate.extend_by(Duration::from_secs(5));
        std::thread::sleep(Duration::from_millis(40));
        // Would have expired without the extension.
        assert!(gate.is_open());
    }

    #[test]
    fn test_energy_matcher() {
        let mut matcher = EnergyMatcher::new(0.2);
        let quiet = vec![100i16; 64];
        let loud = vec![20000i16; 64];
        assert!(!matcher.matches(&quiet, 16000));
        assert!(matcher.matches(&loud, 16000));
        assert!(!matcher.matches(&[], 16000));
    }
}
