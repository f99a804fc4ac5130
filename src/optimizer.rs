//! Per-pass quality and scheduling decisions.
//!
//! Where the adaptive controller steers one global scale, the optimizer
//! works per pass: a static source analysis assigns each buffer pass a
//! workload profile, the profile maps to a recommended resolution scale
//! and a minimum pixel size, and a small scheduler decides each frame
//! whether a pass runs at all (half-rate alternation under pressure,
//! culling of passes whose inputs cannot have changed).
//!
//! The optimizer and the adaptive controller stay separate state machines
//! and talk through a three-word vocabulary: [`OptimizerMode`]. The engine
//! syncs the mode from the controller's published fps ratio / stability /
//! emergency outputs every frame.

/// Frames of no input change before static passes stop re-rendering.
const STATIC_FRAME_THRESHOLD: u32 = 60;

/// Seconds of mouse idleness before redraw culling may engage.
const MOUSE_IDLE_SECONDS: f64 = 2.0;

/// Redraws closer together than this are culled for idle passes.
const MIN_REDRAW_INTERVAL: f64 = 0.005;

/// Quality bias treated as "no demotion".
const NORMAL_QUALITY: f32 = 0.8;

/// Mouse movement below this many pixels does not count as input.
const MOUSE_MOVE_EPSILON: f32 = 0.5;

/// Operating mode, synced from the adaptive controller each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizerMode {
    /// On target: full per-pass quality, no half-rate.
    #[default]
    Normal,
    /// Under target: half-rate scheduling, mild quality demotion.
    Aggressive,
    /// Severely under target or thermally throttled.
    Emergency,
}

/// Workload category inferred from a pass source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassProfile {
    /// Many taps, low-frequency output; happy at a fraction of the target
    /// resolution.
    BlurHeavy,
    /// Only reads the noise atlas; resolution barely matters.
    NoiseOnly,
    /// Accumulates its own history; resolution changes disturb the state,
    /// so keep a healthy floor.
    SelfFeedback,
    /// Fine detail that aliases when downscaled.
    HighFrequency,
    /// Time-driven animation without other tells.
    Animated,
    /// Output follows the pointer.
    MouseDependent,
}

impl PassProfile {
    /// Recommended fraction of the base buffer resolution.
    pub fn recommended_scale(self) -> f32 {
        match self {
            PassProfile::NoiseOnly => 0.125,
            PassProfile::BlurHeavy => 0.25,
            PassProfile::SelfFeedback => 0.5,
            PassProfile::Animated => 0.75,
            PassProfile::MouseDependent => 0.75,
            PassProfile::HighFrequency => 1.0,
        }
    }

    /// Smallest useful extent in pixels for either dimension.
    pub fn min_resolution(self) -> u32 {
        match self {
            PassProfile::NoiseOnly => 64,
            PassProfile::BlurHeavy => 128,
            PassProfile::Animated => 192,
            PassProfile::SelfFeedback => 256,
            PassProfile::MouseDependent => 256,
            PassProfile::HighFrequency => 0,
        }
    }
}

/// Per-pass scheduling state.
#[derive(Debug, Clone)]
struct PassPlan {
    profile: PassProfile,
    mouse_dependent: bool,
    uses_time: bool,
    samples_channels: bool,
    /// Deterministic half-rate phase: even-index passes run on even
    /// frames, odd-index on odd frames.
    phase: bool,
    last_rendered: f64,
    skips: u64,
}

/// Per-pass numbers for host-side display.
#[derive(Debug, Clone, Copy)]
pub struct PassReport {
    pub profile: PassProfile,
    pub mouse_dependent: bool,
    pub skipped_frames: u64,
}

/// See the module docs.
#[derive(Debug, Default)]
pub struct MultipassOptimizer {
    mode: OptimizerMode,
    half_rate: bool,
    quality_bias: f32,
    plans: Vec<PassPlan>,

    frame_index: u64,
    time: f64,
    last_mouse: Option<(f32, f32)>,
    last_click: bool,
    last_input_time: f64,
    static_frames: u32,

    frame_full_area: u64,
    frame_actual_area: u64,
    /// EMA of rendered area over full-resolution area; lets the adaptive
    /// controller prefer raising the global scale over demoting buffers
    /// when headroom appears.
    workload_ratio: f32,
}

impl MultipassOptimizer {
    pub fn new() -> Self {
        Self {
            quality_bias: NORMAL_QUALITY,
            workload_ratio: 1.0,
            ..Self::default()
        }
    }

    /// Profile every pass source. Call at (re)compile time, with sources in
    /// pass order.
    pub fn analyze(&mut self, sources: &[&str]) {
        self.plans = sources
            .iter()
            .enumerate()
            .map(|(i, source)| {
                let analysis = profile_source(source);
                log::debug!(
                    "pass {i}: profile {:?}, mouse={}, time={}",
                    analysis.profile,
                    analysis.mouse_dependent,
                    analysis.uses_time
                );
                PassPlan {
                    profile: analysis.profile,
                    mouse_dependent: analysis.mouse_dependent,
                    uses_time: analysis.uses_time,
                    samples_channels: analysis.samples_channels,
                    phase: i % 2 == 1,
                    last_rendered: f64::NEG_INFINITY,
                    skips: 0,
                }
            })
            .collect();
    }

    // ── Mode sync ────────────────────────────────────────────────────────

    pub fn set_mode(&mut self, mode: OptimizerMode) {
        if mode == self.mode {
            return;
        }
        log::debug!("optimizer mode {:?} -> {mode:?}", self.mode);
        self.mode = mode;
        match mode {
            OptimizerMode::Normal => {
                self.half_rate = false;
                self.quality_bias = NORMAL_QUALITY;
            }
            OptimizerMode::Aggressive => {
                self.half_rate = true;
                self.quality_bias = 0.6;
            }
            OptimizerMode::Emergency => {
                self.half_rate = true;
                self.quality_bias = 0.5;
            }
        }
    }

    #[inline]
    pub fn mode(&self) -> OptimizerMode {
        self.mode
    }

    #[inline]
    pub fn half_rate_enabled(&self) -> bool {
        self.half_rate
    }

    #[inline]
    pub fn quality_bias(&self) -> f32 {
        self.quality_bias
    }

    // ── Per-frame protocol ───────────────────────────────────────────────

    pub fn begin_frame(&mut self, time: f64, mouse_x: f32, mouse_y: f32, mouse_click: bool) {
        self.frame_index += 1;
        self.time = time;
        self.frame_full_area = 0;
        self.frame_actual_area = 0;

        let moved = match self.last_mouse {
            Some((px, py)) => {
                (mouse_x - px).abs() > MOUSE_MOVE_EPSILON
                    || (mouse_y - py).abs() > MOUSE_MOVE_EPSILON
            }
            None => false,
        };
        let clicked = mouse_click != self.last_click;
        self.last_mouse = Some((mouse_x, mouse_y));
        self.last_click = mouse_click;

        if moved || clicked {
            self.last_input_time = time;
            self.static_frames = 0;
        } else {
            self.static_frames = self.static_frames.saturating_add(1);
        }
    }

    /// Effective extent for a buffer pass at the current base resolution.
    pub fn pass_resolution(&self, index: usize, base_w: u32, base_h: u32) -> (u32, u32) {
        let Some(plan) = self.plans.get(index) else {
            return (base_w.max(1), base_h.max(1));
        };
        let scale = plan.profile.recommended_scale() * (self.quality_bias / NORMAL_QUALITY);
        let min_px = plan.profile.min_resolution();
        let w = ((base_w as f32 * scale).round() as u32)
            .max(min_px)
            .min(base_w)
            .max(1);
        let h = ((base_h as f32 * scale).round() as u32)
            .max(min_px)
            .min(base_h)
            .max(1);
        (w, h)
    }

    /// Frame-by-frame render decision for a buffer pass.
    pub fn should_render_pass(&self, index: usize) -> bool {
        let Some(plan) = self.plans.get(index) else {
            return true;
        };

        // A pass driven by neither time nor input, reading nothing that
        // can change (no channels, or only the static noise atlas),
        // produces the same pixels every frame once the scene goes static.
        let inert = !plan.uses_time
            && !plan.mouse_dependent
            && plan.profile != PassProfile::SelfFeedback
            && (!plan.samples_channels || plan.profile == PassProfile::NoiseOnly);
        if inert && self.static_frames > STATIC_FRAME_THRESHOLD && plan.last_rendered.is_finite() {
            return false;
        }

        if self.half_rate && plan.phase != (self.frame_index % 2 == 1) {
            return false;
        }

        if !plan.mouse_dependent
            && self.time - plan.last_rendered < MIN_REDRAW_INTERVAL
            && self.time - self.last_input_time > MOUSE_IDLE_SECONDS
            && plan.last_rendered.is_finite()
        {
            return false;
        }

        true
    }

    /// Record a pass's outcome this frame: rendered at `w` x `h`, or
    /// skipped. `base_w`/`base_h` is what full quality would have cost.
    pub fn record_pass(
        &mut self,
        index: usize,
        w: u32,
        h: u32,
        base_w: u32,
        base_h: u32,
        rendered: bool,
    ) {
        self.frame_full_area += u64::from(base_w) * u64::from(base_h);
        if rendered {
            self.frame_actual_area += u64::from(w) * u64::from(h);
        }
        if let Some(plan) = self.plans.get_mut(index) {
            if rendered {
                plan.last_rendered = self.time;
            } else {
                plan.skips += 1;
            }
        }
    }

    /// Close the frame's bookkeeping and fold the workload measurement
    /// into the running ratio.
    pub fn end_frame(&mut self) {
        if self.frame_full_area > 0 {
            let ratio = self.frame_actual_area as f32 / self.frame_full_area as f32;
            self.workload_ratio += (ratio - self.workload_ratio) * 0.1;
        }
    }

    /// Rendered workload over full-quality workload, smoothed.
    #[inline]
    pub fn workload_ratio(&self) -> f32 {
        self.workload_ratio
    }

    pub fn pass_report(&self, index: usize) -> Option<PassReport> {
        self.plans.get(index).map(|plan| PassReport {
            profile: plan.profile,
            mouse_dependent: plan.mouse_dependent,
            skipped_frames: plan.skips,
        })
    }

    pub fn pass_count(&self) -> usize {
        self.plans.len()
    }
}

struct SourceAnalysis {
    profile: PassProfile,
    mouse_dependent: bool,
    uses_time: bool,
    samples_channels: bool,
}

/// Substring heuristics over the pass source, in the same spirit as the
/// channel inference scoring.
fn profile_source(source: &str) -> SourceAnalysis {
    let mouse_dependent = contains_code(source, "iMouse");
    let uses_time = contains_code(source, "iTime");
    let samples_channels = contains_code(source, "iChannel");

    let taps = count_code(source, "texture(");
    let blur_words = count_code(source, "blur") + count_code(source, "Blur");
    let atlas = ["/256", "/ 256", "/512", "/ 512", "/1024", "/ 1024"]
        .iter()
        .any(|p| source.contains(p));
    let feedback = contains_code(source, "iChannel0")
        && (contains_code(source, "mix(") || source.contains("+="));
    let trig = count_code(source, "sin(") + count_code(source, "cos(") + count_code(source, "fract(");

    let profile = if blur_words > 0 || taps >= 8 {
        PassProfile::BlurHeavy
    } else if atlas && taps <= 2 {
        PassProfile::NoiseOnly
    } else if feedback {
        PassProfile::SelfFeedback
    } else if trig >= 8 {
        PassProfile::HighFrequency
    } else if mouse_dependent {
        PassProfile::MouseDependent
    } else {
        PassProfile::Animated
    };

    SourceAnalysis {
        profile,
        mouse_dependent,
        uses_time,
        samples_channels,
    }
}

fn contains_code(source: &str, pattern: &str) -> bool {
    crate::scanner::find_pattern(source, pattern).is_some()
}

fn count_code(source: &str, pattern: &str) -> usize {
    let mut n = 0;
    let mut at = 0;
    while let Some(pos) = crate::scanner::find_pattern_from(source, pattern, at) {
        n += 1;
        at = pos + pattern.len();
    }
    n
}
