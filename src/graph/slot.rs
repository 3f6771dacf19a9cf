//! Slot nodes: controller-side parameter state and the audio-thread voice.

use super::dsp::{
    blend_tone, soft_clip, BiquadCoeffs, BiquadState, BrownFilter, PinkFilter, SmoothedGain,
    SplitMix64, NOISE_AMPLITUDE,
};
use super::GraphCommand;
use crate::hardware::HardwareFormat;
use crate::state::{clamp_or, SlotState, EQ_RANGE};

/// Shelf tilt applied per unit of tone, in dB.
pub const TONE_TILT_DB: f32 = 4.0;
/// Low shelf corner.
pub const LOW_SHELF_HZ: f32 = 160.0;
/// Mid peaking band centre.
pub const MID_PEAK_HZ: f32 = 1_200.0;
/// Mid peaking bandwidth in octaves.
pub const MID_PEAK_BANDWIDTH: f32 = 1.0;
/// High shelf corner.
pub const HIGH_SHELF_HZ: f32 = 6_000.0;

/// Parameters derived from a [`SlotState`], as pushed to the audio thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotParams {
    /// Local gain; zero when the slot is disabled.
    pub gain: f32,
    /// Noise colour blend, 0..=2.
    pub tone: f32,
    /// High-pass corner.
    pub low_cut_hz: f32,
    /// Low-pass corner.
    pub high_cut_hz: f32,
    /// Low shelf gain including tone tilt, ±12 dB.
    pub low_shelf_db: f32,
    /// Mid peak gain, ±12 dB.
    pub mid_db: f32,
    /// High shelf gain including tone tilt, ±12 dB.
    pub high_shelf_db: f32,
}

impl SlotParams {
    /// Derives audio parameters from a slot's desired state.
    ///
    /// Tone tilts the shelves by `tone × 4 dB`: toward brown the low shelf is
    /// boosted and the high shelf cut. The tilted gains are clamped to ±12 dB.
    pub fn from_state(slot: &SlotState) -> Self {
        let slot = slot.normalised();
        let tilt = slot.tone * TONE_TILT_DB;
        Self {
            gain: if slot.enabled { slot.volume } else { 0.0 },
            tone: slot.tone,
            low_cut_hz: slot.low_cut_hz,
            high_cut_hz: slot.high_cut_hz,
            low_shelf_db: clamp_or(slot.eq.low_db + tilt, &EQ_RANGE, 0.0),
            mid_db: slot.eq.mid_db,
            high_shelf_db: clamp_or(slot.eq.high_db - tilt, &EQ_RANGE, 0.0),
        }
    }
}

impl Default for SlotParams {
    fn default() -> Self {
        let mut params = Self::from_state(&SlotState::default());
        params.gain = 0.0;
        params
    }
}

/// Controller-side view of one slot.
///
/// Every method returns the command that should reach the audio thread, or
/// `None` when the call was a no-op.
#[derive(Debug, Clone)]
pub struct SlotNode {
    index: usize,
    params: SlotParams,
    scheduled: bool,
    playing: bool,
}

impl SlotNode {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            params: SlotParams::default(),
            scheduled: false,
            playing: false,
        }
    }

    /// Slot index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Last applied parameters.
    pub fn params(&self) -> SlotParams {
        self.params
    }

    /// Whether transport is running for this slot.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Whether the noise source has been primed.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Pure parameter push. Never starts or stops audio.
    pub(crate) fn apply(&mut self, slot: &SlotState) -> GraphCommand {
        self.params = SlotParams::from_state(slot);
        tracing::trace!(slot = self.index, params = ?self.params, "slot parameters applied");
        GraphCommand::SetSlot {
            index: self.index,
            params: self.params,
        }
    }

    pub(crate) fn schedule_if_needed(&mut self) -> Option<GraphCommand> {
        if self.scheduled {
            return None;
        }
        self.scheduled = true;
        Some(GraphCommand::ScheduleSlot { index: self.index })
    }

    pub(crate) fn play_if_needed(&mut self) -> Option<GraphCommand> {
        if self.playing {
            return None;
        }
        self.playing = true;
        Some(GraphCommand::StartSlot { index: self.index })
    }

    pub(crate) fn stop(&mut self) -> Option<GraphCommand> {
        if !self.playing {
            return None;
        }
        self.playing = false;
        Some(GraphCommand::StopSlot { index: self.index })
    }
}

const HP: usize = 0;
const LP: usize = 1;
const LOW_SHELF: usize = 2;
const MID: usize = 3;
const HIGH_SHELF: usize = 4;
const BANDS: usize = 5;

/// Audio-thread state for one slot: noise source, filter chain, local gain.
pub(crate) struct SlotVoice {
    index: usize,
    sample_rate: f32,
    channels: usize,
    params: SlotParams,
    gain: SmoothedGain,
    playing: bool,
    rngs: Vec<SplitMix64>,
    pink: Vec<PinkFilter>,
    brown: Vec<BrownFilter>,
    coeffs: [BiquadCoeffs; BANDS],
    states: Vec<[BiquadState; BANDS]>,
}

impl SlotVoice {
    pub(crate) fn new(index: usize, format: HardwareFormat) -> Self {
        let channels = usize::from(format.channels.max(1));
        let mut voice = Self {
            index,
            sample_rate: format.sample_rate as f32,
            channels,
            params: SlotParams::default(),
            gain: SmoothedGain::new(0.0, format.sample_rate),
            playing: false,
            rngs: Vec::with_capacity(channels),
            pink: vec![PinkFilter::default(); channels],
            brown: vec![BrownFilter::default(); channels],
            coeffs: [BiquadCoeffs::passthrough(); BANDS],
            states: vec![[BiquadState::default(); BANDS]; channels],
        };
        voice.seed();
        voice.update_coeffs();
        voice
    }

    fn seed(&mut self) {
        let base = 0xA1B2_C3D4_u64 ^ (self.index as u64).wrapping_mul(991);
        self.rngs = (0..self.channels)
            .map(|ch| {
                let mix = (ch as u64).wrapping_mul(0x9E37_79B9);
                let mut rng = SplitMix64::new(base ^ mix ^ 0xD1B5_4A32_D192_ED03);
                rng.next_u64();
                rng.next_u64();
                rng
            })
            .collect();
    }

    fn update_coeffs(&mut self) {
        let p = &self.params;
        let sr = self.sample_rate;
        self.coeffs[HP] = BiquadCoeffs::high_pass(p.low_cut_hz, sr);
        self.coeffs[LP] = BiquadCoeffs::low_pass(p.high_cut_hz, sr);
        self.coeffs[LOW_SHELF] = BiquadCoeffs::low_shelf(LOW_SHELF_HZ, p.low_shelf_db, sr);
        self.coeffs[MID] = BiquadCoeffs::peaking(MID_PEAK_HZ, p.mid_db, MID_PEAK_BANDWIDTH, sr);
        self.coeffs[HIGH_SHELF] = BiquadCoeffs::high_shelf(HIGH_SHELF_HZ, p.high_shelf_db, sr);
    }

    pub(crate) fn set_params(&mut self, params: SlotParams) {
        let filters_changed = params.low_cut_hz != self.params.low_cut_hz
            || params.high_cut_hz != self.params.high_cut_hz
            || params.low_shelf_db != self.params.low_shelf_db
            || params.mid_db != self.params.mid_db
            || params.high_shelf_db != self.params.high_shelf_db;
        self.params = params;
        self.gain.set_target(params.gain);
        if filters_changed {
            self.update_coeffs();
        }
    }

    /// Primes the source: clears filter memory and jumps gain to target.
    pub(crate) fn schedule(&mut self) {
        for state in &mut self.states {
            *state = [BiquadState::default(); BANDS];
        }
        self.pink.fill(PinkFilter::default());
        self.brown.fill(BrownFilter::default());
        self.gain.reset(self.params.gain);
    }

    pub(crate) fn start(&mut self) {
        self.playing = true;
    }

    pub(crate) fn stop(&mut self) {
        self.playing = false;
    }

    pub(crate) fn is_playing(&self) -> bool {
        self.playing
    }

    /// Mixes this voice into `out` (interleaved, `channels` wide).
    pub(crate) fn render_add(&mut self, out: &mut [f32]) {
        if !self.playing {
            return;
        }

        for frame in out.chunks_exact_mut(self.channels) {
            let gain = self.gain.next();
            for (ch, sample) in frame.iter_mut().enumerate() {
                let white = self.rngs[ch].next_bipolar();
                let pink = self.pink[ch].process(white);
                let brown = self.brown[ch].process(white);
                let mut x = blend_tone(self.params.tone, white, pink, brown) * NOISE_AMPLITUDE;

                let states = &mut self.states[ch];
                for (state, coeffs) in states.iter_mut().zip(self.coeffs.iter()) {
                    x = state.process(x, coeffs);
                }

                *sample += soft_clip(x) * gain;
            }
        }
    }
}
