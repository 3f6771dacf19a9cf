//! Sample-level DSP: noise generation, biquads, soft clip, peak limiter.
//!
//! Everything here runs on the audio thread. No allocation happens after
//! construction.

use std::f32::consts::PI;

/// Output level of a slot's raw noise before filtering.
pub const NOISE_AMPLITUDE: f32 = 0.22;

/// Limiter ceiling in linear amplitude (about -0.3 dBFS).
pub const LIMITER_THRESHOLD: f32 = 0.966;

/// Release time-constant of the master limiter.
const LIMITER_RELEASE_SECS: f32 = 0.1;

/// Time-constant for gain smoothing (avoids zipper noise on parameter changes).
const GAIN_SMOOTHING_SECS: f32 = 0.01;

/// SplitMix64 pseudo-random generator.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    /// Creates a generator. A zero seed is replaced with a fixed constant.
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0xDEAD_BEEF } else { seed },
        }
    }

    /// Next raw 64-bit value.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Next value uniformly distributed in `[-1, 1)`.
    pub fn next_bipolar(&mut self) -> f32 {
        let unit = (self.next_u64() >> 40) as f32 / (1u32 << 24) as f32;
        unit * 2.0 - 1.0
    }
}

/// Paul Kellet's refined pink noise filter.
#[derive(Debug, Clone, Default)]
pub struct PinkFilter {
    b: [f32; 7],
}

impl PinkFilter {
    /// Filters one white sample into pink.
    pub fn process(&mut self, white: f32) -> f32 {
        let b = &mut self.b;
        b[0] = 0.998_86 * b[0] + white * 0.055_517_9;
        b[1] = 0.993_32 * b[1] + white * 0.075_075_9;
        b[2] = 0.969_00 * b[2] + white * 0.153_852_0;
        b[3] = 0.866_50 * b[3] + white * 0.310_485_6;
        b[4] = 0.550_00 * b[4] + white * 0.532_952_2;
        b[5] = -0.761_6 * b[5] - white * 0.016_898_0;
        let pink = b[0] + b[1] + b[2] + b[3] + b[4] + b[5] + b[6] + white * 0.536_2;
        b[6] = white * 0.115_926;
        pink * 0.11
    }
}

/// Leaky-integrator brown noise.
#[derive(Debug, Clone, Default)]
pub struct BrownFilter {
    last: f32,
}

impl BrownFilter {
    /// Integrates one white sample.
    pub fn process(&mut self, white: f32) -> f32 {
        self.last = (self.last + 0.02 * white).clamp(-1.0, 1.0);
        self.last * 3.5
    }
}

/// Blends white, pink and brown by `tone` in `0..=2`.
pub fn blend_tone(tone: f32, white: f32, pink: f32, brown: f32) -> f32 {
    let tone = tone.clamp(0.0, 2.0);
    if tone <= 1.0 {
        white + (pink - white) * tone
    } else {
        let t = tone - 1.0;
        pink + (brown - pink) * t
    }
}

/// Gentle saturation keeping a single slot from hard-clipping.
#[inline]
pub fn soft_clip(x: f32) -> f32 {
    x.tanh()
}

/// Normalised biquad coefficients (RBJ cookbook).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

/// Shelf slope used by both shelves.
const SHELF_SLOPE: f32 = 0.9;

/// Butterworth Q for the cut filters.
const BUTTERWORTH_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

impl BiquadCoeffs {
    /// Unity gain, no filtering.
    pub fn passthrough() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    fn omega(freq: f32, sample_rate: f32) -> (f32, f32) {
        // Keep the corner below Nyquist so the filter stays stable at low rates.
        let freq = freq.clamp(1.0, sample_rate * 0.49);
        let w0 = 2.0 * PI * freq / sample_rate;
        (w0.cos(), w0.sin())
    }

    /// Second-order high-pass.
    pub fn high_pass(freq: f32, sample_rate: f32) -> Self {
        let (cos_w0, sin_w0) = Self::omega(freq, sample_rate);
        let alpha = sin_w0 / (2.0 * BUTTERWORTH_Q);
        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 + cos_w0) / 2.0) / a0,
            b1: (-(1.0 + cos_w0)) / a0,
            b2: ((1.0 + cos_w0) / 2.0) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Second-order low-pass.
    pub fn low_pass(freq: f32, sample_rate: f32) -> Self {
        let (cos_w0, sin_w0) = Self::omega(freq, sample_rate);
        let alpha = sin_w0 / (2.0 * BUTTERWORTH_Q);
        let a0 = 1.0 + alpha;
        Self {
            b0: ((1.0 - cos_w0) / 2.0) / a0,
            b1: (1.0 - cos_w0) / a0,
            b2: ((1.0 - cos_w0) / 2.0) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Low shelf with `gain_db` boost or cut below `freq`.
    pub fn low_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let (cos_w0, sin_w0) = Self::omega(freq, sample_rate);
        let alpha = sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / SHELF_SLOPE - 1.0) + 2.0).sqrt();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha)) / a0,
            b1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha)) / a0,
            a1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha) / a0,
        }
    }

    /// Peaking band centred on `freq`, `bandwidth` in octaves.
    pub fn peaking(freq: f32, gain_db: f32, bandwidth: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let (cos_w0, sin_w0) = Self::omega(freq, sample_rate);
        let w0 = sin_w0.atan2(cos_w0);
        let alpha = sin_w0 * (std::f32::consts::LN_2 / 2.0 * bandwidth * w0 / sin_w0).sinh();

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    /// High shelf with `gain_db` boost or cut above `freq`.
    pub fn high_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let (cos_w0, sin_w0) = Self::omega(freq, sample_rate);
        let alpha = sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / SHELF_SLOPE - 1.0) + 2.0).sqrt();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha)) / a0,
            b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha)) / a0,
            a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha) / a0,
        }
    }
}

/// Direct form I state for one channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    /// Filters one sample.
    #[inline]
    pub fn process(&mut self, input: f32, c: &BiquadCoeffs) -> f32 {
        let out = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = out;
        out
    }
}

/// One-pole smoother moving a gain toward its target.
#[derive(Debug, Clone, Copy)]
pub struct SmoothedGain {
    current: f32,
    target: f32,
    coeff: f32,
}

impl SmoothedGain {
    /// Creates a smoother resting at `initial`.
    pub fn new(initial: f32, sample_rate: u32) -> Self {
        Self {
            current: initial,
            target: initial,
            coeff: 1.0 - (-1.0 / (GAIN_SMOOTHING_SECS * sample_rate as f32)).exp(),
        }
    }

    /// Sets the value to glide toward.
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    /// Jumps straight to `value`.
    pub fn reset(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    /// Advances one sample and returns the current gain.
    #[inline]
    pub fn next(&mut self) -> f32 {
        self.current += (self.target - self.current) * self.coeff;
        if (self.current - self.target).abs() < 1e-6 {
            self.current = self.target;
        }
        self.current
    }

    /// Current gain.
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Gain being glided toward.
    pub fn target(&self) -> f32 {
        self.target
    }
}

/// Peak limiter with instant attack and exponential release.
///
/// The applied gain never exceeds `threshold / peak`, so the output never
/// exceeds the threshold regardless of input level.
#[derive(Debug, Clone)]
pub struct PeakLimiter {
    threshold: f32,
    gain: f32,
    release_coeff: f32,
}

impl PeakLimiter {
    /// Creates a limiter at [`LIMITER_THRESHOLD`].
    pub fn new(sample_rate: u32) -> Self {
        Self {
            threshold: LIMITER_THRESHOLD,
            gain: 1.0,
            release_coeff: (-1.0 / (LIMITER_RELEASE_SECS * sample_rate as f32)).exp(),
        }
    }

    /// Limits one interleaved frame in place.
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        let peak = frame.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        let target = if peak > self.threshold {
            self.threshold / peak
        } else {
            1.0
        };

        if target < self.gain {
            self.gain = target;
        } else {
            self.gain = self.gain * self.release_coeff + target * (1.0 - self.release_coeff);
        }

        for sample in frame.iter_mut() {
            *sample *= self.gain;
        }
    }

    /// Current gain reduction factor (1.0 = none).
    pub fn gain(&self) -> f32 {
        self.gain
    }
}
