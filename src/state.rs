//! Mix state value types and normalisation.
//!
//! [`MixState`] describes the *desired* mix. It carries no behaviour beyond
//! [`normalised()`](MixState::normalised), which is total and idempotent: any
//! input, however malformed, maps to a value satisfying every invariant, and
//! normalising twice changes nothing.

use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of independent noise slots.
pub const SLOT_COUNT: usize = 4;

/// Valid master and slot volume range.
pub const VOLUME_RANGE: RangeInclusive<f32> = 0.0..=1.0;
/// Valid tone range (0 = white, 1 = pink, 2 = brown).
pub const TONE_RANGE: RangeInclusive<f32> = 0.0..=2.0;
/// Valid low-cut (high-pass) frequency range in Hz.
pub const LOW_CUT_RANGE: RangeInclusive<f32> = 10.0..=10_000.0;
/// Valid high-cut (low-pass) frequency range in Hz.
pub const HIGH_CUT_RANGE: RangeInclusive<f32> = 50.0..=20_000.0;
/// Valid EQ band gain range in dB.
pub const EQ_RANGE: RangeInclusive<f32> = -12.0..=12.0;

/// Clamps into `range`, replacing NaN with `fallback` first.
pub(crate) fn clamp_or(value: f32, range: &RangeInclusive<f32>, fallback: f32) -> f32 {
    let value = if value.is_nan() { fallback } else { value };
    value.clamp(*range.start(), *range.end())
}

/// Three-band EQ gains in dB.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EqState {
    /// Low shelf gain.
    pub low_db: f32,
    /// Mid peak gain.
    pub mid_db: f32,
    /// High shelf gain.
    pub high_db: f32,
}

impl EqState {
    /// Creates an EQ setting, unclamped.
    pub fn new(low_db: f32, mid_db: f32, high_db: f32) -> Self {
        Self {
            low_db,
            mid_db,
            high_db,
        }
    }

    /// Returns a copy with every band clamped to ±12 dB.
    #[must_use]
    pub fn normalised(self) -> Self {
        Self {
            low_db: clamp_or(self.low_db, &EQ_RANGE, 0.0),
            mid_db: clamp_or(self.mid_db, &EQ_RANGE, 0.0),
            high_db: clamp_or(self.high_db, &EQ_RANGE, 0.0),
        }
    }
}

/// Desired settings for a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotState {
    /// Whether the slot contributes to the mix.
    pub enabled: bool,
    /// Slot gain, 0..=1.
    pub volume: f32,
    /// Continuous white → pink → brown blend, 0..=2.
    pub tone: f32,
    /// High-pass corner in Hz.
    pub low_cut_hz: f32,
    /// Low-pass corner in Hz.
    pub high_cut_hz: f32,
    /// Three-band EQ.
    pub eq: EqState,
}

impl Default for SlotState {
    fn default() -> Self {
        Self {
            enabled: false,
            volume: 0.5,
            tone: 0.0,
            low_cut_hz: 20.0,
            high_cut_hz: 18_000.0,
            eq: EqState::default(),
        }
    }
}

impl SlotState {
    /// Default for the slot at `index` in a fresh mix: only the first slot is audible.
    pub fn initial(index: usize) -> Self {
        let first = index == 0;
        Self {
            enabled: first,
            volume: if first { 0.65 } else { 0.0 },
            low_cut_hz: if first { 80.0 } else { 20.0 },
            ..Self::default()
        }
    }

    /// Returns a copy satisfying every slot invariant.
    ///
    /// Cut frequencies are clamped into their ranges and swapped if the low cut
    /// ends up above the high cut.
    #[must_use]
    pub fn normalised(self) -> Self {
        let defaults = Self::default();
        let mut low = clamp_or(self.low_cut_hz, &LOW_CUT_RANGE, defaults.low_cut_hz);
        let mut high = clamp_or(self.high_cut_hz, &HIGH_CUT_RANGE, defaults.high_cut_hz);
        if low > high {
            std::mem::swap(&mut low, &mut high);
        }

        Self {
            enabled: self.enabled,
            volume: clamp_or(self.volume, &VOLUME_RANGE, defaults.volume),
            tone: clamp_or(self.tone, &TONE_RANGE, defaults.tone),
            low_cut_hz: low,
            high_cut_hz: high,
            eq: self.eq.normalised(),
        }
    }
}

/// The complete desired mix.
///
/// Persisted as-is by [`MixStateStore`](crate::MixStateStore). Missing fields
/// decode to their defaults so older and newer records both load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixState {
    /// Intended playback state. Not the same as "hardware is producing sound".
    pub is_playing: bool,
    /// Master gain, 0..=1.
    pub master_volume: f32,
    /// Exactly [`SLOT_COUNT`] slots once normalised.
    pub slots: Vec<SlotState>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Default for MixState {
    fn default() -> Self {
        Self {
            is_playing: false,
            master_volume: 0.8,
            slots: (0..SLOT_COUNT).map(SlotState::initial).collect(),
            updated_at: Utc::now(),
        }
    }
}

impl MixState {
    /// Returns a copy satisfying every invariant.
    ///
    /// Extra slots are dropped and missing ones are filled with
    /// [`SlotState::default()`].
    #[must_use]
    pub fn normalised(&self) -> Self {
        let slots = (0..SLOT_COUNT)
            .map(|idx| {
                self.slots
                    .get(idx)
                    .copied()
                    .unwrap_or_default()
                    .normalised()
            })
            .collect();

        Self {
            is_playing: self.is_playing,
            master_volume: clamp_or(self.master_volume, &VOLUME_RANGE, 0.8),
            slots,
            updated_at: self.updated_at,
        }
    }

    /// Normalises in place.
    pub fn normalise(&mut self) {
        *self = self.normalised();
    }

    /// Returns the slot at `index`, if it exists.
    pub fn slot(&self, index: usize) -> Option<&SlotState> {
        self.slots.get(index)
    }

    /// Indices of enabled slots.
    pub fn enabled_slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.enabled)
            .map(|(i, _)| i)
            .collect()
    }

    /// Stamps `updated_at` with the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariants(state: &MixState) {
        assert_eq!(state.slots.len(), SLOT_COUNT);
        assert!(VOLUME_RANGE.contains(&state.master_volume));
        for slot in &state.slots {
            assert!(VOLUME_RANGE.contains(&slot.volume));
            assert!(TONE_RANGE.contains(&slot.tone));
            assert!(LOW_CUT_RANGE.contains(&slot.low_cut_hz));
            assert!(HIGH_CUT_RANGE.contains(&slot.high_cut_hz));
            assert!(slot.low_cut_hz <= slot.high_cut_hz);
            for db in [slot.eq.low_db, slot.eq.mid_db, slot.eq.high_db] {
                assert!(EQ_RANGE.contains(&db));
            }
        }
    }

    fn malformed_slots() -> Vec<SlotState> {
        vec![
            SlotState {
                enabled: true,
                volume: 3.0,
                tone: -1.0,
                low_cut_hz: 15_000.0,
                high_cut_hz: 40.0,
                eq: EqState::new(30.0, -30.0, f32::NAN),
            },
            SlotState {
                volume: f32::NAN,
                tone: f32::INFINITY,
                low_cut_hz: 0.0,
                high_cut_hz: 1e9,
                ..SlotState::default()
            },
            SlotState {
                low_cut_hz: 5_000.0,
                high_cut_hz: 4_000.0,
                ..SlotState::default()
            },
            SlotState {
                volume: -0.5,
                tone: 2.5,
                low_cut_hz: f32::NAN,
                high_cut_hz: f32::NEG_INFINITY,
                ..SlotState::default()
            },
        ]
    }

    #[test]
    fn test_default_mix_is_normalised() {
        let state = MixState::default();
        assert_invariants(&state);
        assert_eq!(state.normalised(), state);
        assert_eq!(state.enabled_slots(), vec![0]);
        assert!(!state.is_playing);
    }

    #[test]
    fn test_normalise_is_total_for_malformed_input() {
        let mut slot_counts = vec![0, 1, 3, 4, 5, 9];
        slot_counts.sort_unstable();
        for count in slot_counts {
            let state = MixState {
                is_playing: true,
                master_volume: 7.0,
                slots: malformed_slots().into_iter().cycle().take(count).collect(),
                updated_at: Utc::now(),
            };
            let normalised = state.normalised();
            assert_invariants(&normalised);
            assert_eq!(normalised.normalised(), normalised, "count={count}");
        }
    }

    #[test]
    fn test_inverted_cuts_are_swapped() {
        let slot = SlotState {
            low_cut_hz: 5_000.0,
            high_cut_hz: 4_000.0,
            ..SlotState::default()
        }
        .normalised();
        assert_eq!(slot.low_cut_hz, 4_000.0);
        assert_eq!(slot.high_cut_hz, 5_000.0);
    }

    #[test]
    fn test_out_of_range_cuts_clamp_then_swap() {
        let slot = SlotState {
            low_cut_hz: 15_000.0,
            high_cut_hz: 40.0,
            ..SlotState::default()
        }
        .normalised();
        assert_eq!(slot.low_cut_hz, 50.0);
        assert_eq!(slot.high_cut_hz, 10_000.0);
    }

    #[test]
    fn test_missing_slots_filled_with_default() {
        let state = MixState {
            slots: vec![SlotState::initial(0)],
            ..MixState::default()
        }
        .normalised();
        assert_eq!(state.slots.len(), SLOT_COUNT);
        assert_eq!(state.slots[1], SlotState::default());
    }

    #[test]
    fn test_nan_master_volume_uses_default() {
        let state = MixState {
            master_volume: f32::NAN,
            ..MixState::default()
        }
        .normalised();
        assert_eq!(state.master_volume, 0.8);
    }

    #[test]
    fn test_decode_tolerates_missing_fields() {
        let json = r#"{"is_playing": true, "slots": [{"enabled": true}]}"#;
        let state: MixState = serde_json::from_str(json).unwrap();
        let state = state.normalised();
        assert!(state.is_playing);
        assert_eq!(state.master_volume, 0.8);
        assert!(state.slots[0].enabled);
        assert_eq!(state.slots[0].volume, 0.5);
        assert_eq!(state.slots.len(), SLOT_COUNT);
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let json = r#"{"master_volume": 0.3, "future_field": [1, 2, 3]}"#;
        let state: MixState = serde_json::from_str(json).unwrap();
        assert_eq!(state.master_volume, 0.3);
    }
}
