//! Closed-loop adaptive resolution control.
//!
//! Measures real frame time (GPU timer queries when the context has them,
//! wall clock otherwise), smooths it with an EMA, and steers a global
//! resolution scale to hold the target frame rate. A short calibration
//! window jump-starts the scale, a predictive proportional+derivative
//! adjustment loop walks it in, and a stability detector locks the scale
//! once the rate settles so the image stops breathing.
//!
//! The controller is deliberately domain-agnostic: it publishes a scale,
//! an fps ratio, a stability measure and an emergency flag, and knows
//! nothing about passes or buffers. The multipass optimizer consumes those
//! outputs.

/// Calibration ends after this much wall time...
const CALIBRATION_SECONDS: f64 = 0.2;
/// ...or this many frames, whichever comes first.
const CALIBRATION_FRAMES: u32 = 12;

/// Minimum seconds between scale adjustments.
const ADJUST_INTERVAL: f64 = 0.1;

/// Frame-time samples above this are treated as pauses, not load.
const FRAME_TIME_CLAMP: f32 = 0.25;

/// Under this fraction of the target rate the controller declares an
/// emergency once the condition persists.
const EMERGENCY_FPS_FRACTION: f32 = 0.55;
const EMERGENCY_GRACE_SECONDS: f32 = 0.5;
const EMERGENCY_RECOVERY_FRACTION: f32 = 0.8;

/// Tuning knobs for the controller.
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    /// Frame rate to hold.
    pub target_fps: f32,
    /// Lower bound for the published scale, in (0, 1].
    pub min_scale: f32,
    /// Upper bound for the published scale, in (0, 2].
    pub max_scale: f32,
    /// Half-width of the no-adjustment band around the target, in fps.
    pub deadband_fps: f32,
    /// Smoothing factor for the frame-time EMA, in (0, 1).
    pub ema_alpha: f32,
    /// Maximum downward scale movement per second.
    pub scale_down_rate: f32,
    /// Maximum upward scale movement per second.
    pub scale_up_rate: f32,
    /// Seconds of in-band running required before locking.
    pub stability_threshold: f32,
    /// Prefer GPU timer queries over wall-clock deltas.
    pub use_gpu_timing: bool,
    /// Log every adjustment decision.
    pub verbose: bool,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            min_scale: 0.25,
            max_scale: 1.0,
            deadband_fps: 2.0,
            ema_alpha: 0.15,
            scale_down_rate: 0.5,
            scale_up_rate: 0.2,
            stability_threshold: 1.0,
            use_gpu_timing: true,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Accumulating an average frame time before doing anything.
    Calibrating,
    Steady,
}

/// Snapshot of the controller for host-side display.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveStats {
    pub current_fps: f32,
    pub frame_time_ms: f32,
    pub scale: f32,
    pub locked: bool,
    pub emergency: bool,
    pub calibrating: bool,
}

/// See the module docs. Owned by the engine; `update` runs once per frame
/// before any pass is rendered.
#[derive(Debug)]
pub struct AdaptiveController {
    config: AdaptiveConfig,
    enabled: bool,

    phase: Phase,
    calibration_start: f64,
    calibration_frames: u32,
    calibration_accum: f32,

    current_scale: f32,
    target_scale: f32,
    locked: bool,
    locked_scale: f32,

    ema_frame_time: f32,
    current_fps: f32,
    /// EMA of the per-frame fps delta.
    fps_derivative: f32,
    prev_fps: f32,

    stable_time: f32,
    adaptive_deadband: f32,

    last_update_time: Option<f64>,
    last_adjust_time: f64,
    /// +1 raising, -1 lowering, 0 idle.
    last_direction: i8,
    last_direction_time: f64,
    reversals: u32,
    prev_proposed_scale: f32,

    emergency: bool,
    emergency_time: f32,
    thermal_throttled: bool,

    /// Latest GPU timer sample, seconds; consumed by the next update.
    pending_gpu_time: Option<f32>,
}

impl AdaptiveController {
    pub fn new(config: AdaptiveConfig) -> Self {
        let deadband = config.deadband_fps;
        Self {
            current_scale: config.max_scale.min(1.0),
            target_scale: config.max_scale.min(1.0),
            locked: false,
            locked_scale: 1.0,
            phase: Phase::Calibrating,
            calibration_start: 0.0,
            calibration_frames: 0,
            calibration_accum: 0.0,
            ema_frame_time: 1.0 / config.target_fps,
            current_fps: config.target_fps,
            fps_derivative: 0.0,
            prev_fps: config.target_fps,
            stable_time: 0.0,
            adaptive_deadband: deadband,
            last_update_time: None,
            last_adjust_time: 0.0,
            last_direction: 0,
            last_direction_time: 0.0,
            reversals: 0,
            prev_proposed_scale: 1.0,
            emergency: false,
            emergency_time: 0.0,
            thermal_throttled: false,
            enabled: true,
            pending_gpu_time: None,
            config,
        }
    }

    // ── Inputs ───────────────────────────────────────────────────────────

    /// Feed the result of a completed GPU timer query (a previous frame's
    /// elapsed time). Preferred over wall-clock deltas: it excludes the
    /// vsync wait.
    pub fn submit_gpu_frame_time(&mut self, nanoseconds: u64) {
        self.pending_gpu_time = Some((nanoseconds as f64 * 1e-9) as f32);
    }

    /// Host-reported thermal throttling; forces the emergency mode the
    /// multipass optimizer reacts to.
    pub fn set_thermal_throttled(&mut self, throttled: bool) {
        self.thermal_throttled = throttled;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Replace the tuning; the running scale is clamped into the new range.
    pub fn configure(&mut self, config: AdaptiveConfig) {
        self.current_scale = self.current_scale.clamp(config.min_scale, config.max_scale);
        self.target_scale = self.target_scale.clamp(config.min_scale, config.max_scale);
        self.adaptive_deadband = config.deadband_fps;
        self.config = config;
    }

    /// Back to calibration with the scale left where it is.
    pub fn reset(&mut self) {
        self.phase = Phase::Calibrating;
        self.calibration_frames = 0;
        self.calibration_accum = 0.0;
        self.last_update_time = None;
        self.locked = false;
        self.stable_time = 0.0;
        self.fps_derivative = 0.0;
        self.reversals = 0;
        self.last_direction = 0;
        self.emergency = false;
        self.emergency_time = 0.0;
        self.pending_gpu_time = None;
    }

    /// Per-frame tick. `wall_time` is the host's monotonic clock, seconds.
    pub fn update(&mut self, wall_time: f64) {
        let Some(last) = self.last_update_time else {
            self.last_update_time = Some(wall_time);
            self.calibration_start = wall_time;
            self.last_adjust_time = wall_time;
            return;
        };
        let wall_dt = ((wall_time - last) as f32).clamp(0.0, FRAME_TIME_CLAMP);
        self.last_update_time = Some(wall_time);

        let frame_time = match self.pending_gpu_time.take() {
            Some(gpu) if self.config.use_gpu_timing && gpu > 0.0 => gpu.min(FRAME_TIME_CLAMP),
            _ => wall_dt,
        };
        if frame_time <= 0.0 {
            return;
        }

        match self.phase {
            Phase::Calibrating => self.calibrate(wall_time, frame_time),
            Phase::Steady => self.steady(wall_time, wall_dt, frame_time),
        }

        self.interpolate_scale();
    }

    // ── Phases ───────────────────────────────────────────────────────────

    fn calibrate(&mut self, wall_time: f64, frame_time: f32) {
        self.calibration_frames += 1;
        self.calibration_accum += frame_time;

        let elapsed = wall_time - self.calibration_start;
        if elapsed < CALIBRATION_SECONDS && self.calibration_frames < CALIBRATION_FRAMES {
            return;
        }

        let measured = self.calibration_accum / self.calibration_frames as f32;
        self.ema_frame_time = measured;
        self.current_fps = 1.0 / measured;
        self.prev_fps = self.current_fps;
        self.phase = Phase::Steady;
        self.last_adjust_time = wall_time;

        // Well under target: jump the scale instead of walking it down.
        let target = self.config.target_fps;
        if self.enabled && self.current_fps < target * 0.92 {
            let before = self.current_scale;
            let jumped = before * (self.current_fps / target).sqrt() * 0.88;
            self.target_scale = self.clamp_scale(jumped);
            self.current_scale = self.target_scale;
            log::debug!(
                "calibration: {:.1} fps at scale {before:.2}, jumping to {:.2}",
                self.current_fps,
                self.current_scale
            );
        }
    }

    fn steady(&mut self, wall_time: f64, wall_dt: f32, frame_time: f32) {
        let alpha = self.config.ema_alpha;
        self.ema_frame_time += (frame_time - self.ema_frame_time) * alpha;
        self.current_fps = 1.0 / self.ema_frame_time.max(1e-6);

        let delta = self.current_fps - self.prev_fps;
        self.prev_fps = self.current_fps;
        self.fps_derivative += (delta - self.fps_derivative) * alpha;

        self.track_emergency(wall_dt);
        if !self.enabled {
            return;
        }

        self.track_stability(wall_dt);

        if !self.locked && wall_time - self.last_adjust_time >= ADJUST_INTERVAL {
            self.adjust(wall_time);
        }
    }

    fn track_emergency(&mut self, dt: f32) {
        let target = self.config.target_fps;
        if self.current_fps < target * EMERGENCY_FPS_FRACTION {
            self.emergency_time += dt;
            if self.emergency_time >= EMERGENCY_GRACE_SECONDS && !self.emergency {
                log::warn!(
                    "adaptive: emergency, {:.1} fps vs target {:.0}",
                    self.current_fps,
                    target
                );
                self.emergency = true;
            }
        } else if self.current_fps > target * EMERGENCY_RECOVERY_FRACTION {
            self.emergency = false;
            self.emergency_time = 0.0;
        }
    }

    fn track_stability(&mut self, dt: f32) {
        let target = self.config.target_fps;
        let error = (self.current_fps - target).abs();

        if self.locked && error > 3.0 * self.config.deadband_fps {
            if self.config.verbose {
                log::debug!("adaptive: unlock, error {error:.1} fps");
            }
            self.locked = false;
            self.stable_time = 0.0;
            self.adaptive_deadband = self.config.deadband_fps;
            return;
        }

        if error < self.adaptive_deadband + 1.0 && self.fps_derivative.abs() < 2.0 {
            self.stable_time += dt;
            // The band widens as stability accumulates, up to double.
            let widen = (self.stable_time / self.config.stability_threshold).min(1.0);
            self.adaptive_deadband = self.config.deadband_fps * (1.0 + widen);

            if !self.locked && self.stable_time >= self.config.stability_threshold {
                self.locked = true;
                self.locked_scale = self.current_scale;
                self.target_scale = self.current_scale;
                if self.config.verbose {
                    log::debug!(
                        "adaptive: locked at scale {:.3} ({:.1} fps)",
                        self.locked_scale,
                        self.current_fps
                    );
                }
            }
        } else {
            self.stable_time = 0.0;
            self.adaptive_deadband = self.config.deadband_fps;
        }
    }

    fn adjust(&mut self, wall_time: f64) {
        let target = self.config.target_fps;
        let deadband = self.adaptive_deadband;
        let dt = (wall_time - self.last_adjust_time) as f32;

        // Predict a beat ahead so we do not chase a transient.
        let effective_fps = self.current_fps + self.fps_derivative * 0.3;

        let mut direction = 0i8;
        let mut proposed = self.target_scale;

        if effective_fps < target - deadband {
            let error = (target - effective_fps) / target;
            let damping = (-self.fps_derivative).max(0.0) / target;
            let step =
                ((error * 0.6 + damping * 0.3) * self.current_scale).min(self.config.scale_down_rate * dt);
            proposed = self.clamp_scale(self.current_scale - step);
            direction = -1;
        } else if effective_fps > target + deadband + 1.0
            && self.fps_derivative >= -0.5
            && self.current_scale < self.config.max_scale - 0.01
        {
            let ideal = self.current_scale * (self.current_fps / target).sqrt();
            let step = (ideal - self.current_scale)
                .clamp(0.0, self.config.scale_up_rate * dt);
            proposed = self.clamp_scale(self.current_scale + step);
            direction = 1;
        }

        if direction == 0 {
            return;
        }

        self.last_adjust_time = wall_time;

        // Two direction flips inside one second means we are hunting;
        // settle on the midpoint.
        if self.last_direction != 0 && direction != self.last_direction {
            if wall_time - self.last_direction_time < 1.0 {
                self.reversals += 1;
            } else {
                self.reversals = 1;
            }
            if self.reversals >= 2 {
                let midpoint = self.clamp_scale((self.prev_proposed_scale + proposed) * 0.5);
                self.locked = true;
                self.locked_scale = midpoint;
                self.target_scale = midpoint;
                self.reversals = 0;
                if self.config.verbose {
                    log::debug!("adaptive: oscillation lock at {midpoint:.3}");
                }
                return;
            }
        }
        if direction != self.last_direction {
            self.last_direction_time = wall_time;
        }
        self.last_direction = direction;
        self.prev_proposed_scale = proposed;
        self.target_scale = proposed;

        if self.config.verbose {
            log::debug!(
                "adaptive: {} to {:.3} (fps {:.1}, eff {:.1}, d {:.2})",
                if direction < 0 { "down" } else { "up" },
                proposed,
                self.current_fps,
                effective_fps,
                self.fps_derivative
            );
        }
    }

    fn interpolate_scale(&mut self) {
        let diff = self.target_scale - self.current_scale;
        if diff.abs() < 3e-4 {
            self.current_scale = self.target_scale;
            return;
        }
        let rate = if diff.abs() > 0.1 { 0.35 } else { 0.12 };
        self.current_scale += diff * rate;
    }

    #[inline]
    fn clamp_scale(&self, scale: f32) -> f32 {
        scale.clamp(self.config.min_scale, self.config.max_scale)
    }

    // ── Outputs ──────────────────────────────────────────────────────────

    #[inline]
    pub fn scale(&self) -> f32 {
        self.current_scale
    }

    #[inline]
    pub fn current_fps(&self) -> f32 {
        self.current_fps
    }

    /// current fps over target fps.
    #[inline]
    pub fn fps_ratio(&self) -> f32 {
        self.current_fps / self.config.target_fps
    }

    /// 0..1 measure of how long the rate has been in band.
    #[inline]
    pub fn stability(&self) -> f32 {
        (self.stable_time / self.config.stability_threshold).min(1.0)
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// The scale the controller settled on, when locked.
    pub fn locked_scale(&self) -> Option<f32> {
        self.locked.then_some(self.locked_scale)
    }

    #[inline]
    pub fn is_emergency(&self) -> bool {
        self.emergency || self.thermal_throttled
    }

    #[inline]
    pub fn is_calibrating(&self) -> bool {
        self.phase == Phase::Calibrating
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn stats(&self) -> AdaptiveStats {
        AdaptiveStats {
            current_fps: self.current_fps,
            frame_time_ms: self.ema_frame_time * 1000.0,
            scale: self.current_scale,
            locked: self.locked,
            emergency: self.is_emergency(),
            calibrating: self.is_calibrating(),
        }
    }

    /// Externally forced scale (host called `set_resolution_scale`); stops
    /// the controller fighting the host by re-targeting its interpolation.
    pub fn force_scale(&mut self, scale: f32) {
        let scale = self.clamp_scale(scale);
        self.current_scale = scale;
        self.target_scale = scale;
        self.locked = false;
        self.stable_time = 0.0;
    }
}

impl Default for AdaptiveController {
    fn default() -> Self {
        Self::new(AdaptiveConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive the controller against a synthetic GPU whose frame time is
    /// quadratic in the scale (pixels rendered scale with the area).
    fn simulate(controller: &mut AdaptiveController, base_frame_time: f32, seconds: f64) {
        let mut t = 0.0f64;
        while t < seconds {
            let frame_time = (base_frame_time * controller.scale() * controller.scale())
                .max(1.0 / 240.0);
            controller.submit_gpu_frame_time((frame_time as f64 * 1e9) as u64);
            t += frame_time as f64;
            controller.update(t);
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AdaptiveConfig::default();
        assert_eq!(config.target_fps, 60.0);
        assert_eq!(config.min_scale, 0.25);
        assert_eq!(config.max_scale, 1.0);
        assert_eq!(config.deadband_fps, 2.0);
        assert!(config.use_gpu_timing);
    }

    #[test]
    fn calibration_jumps_scale_for_slow_shaders() {
        let mut controller = AdaptiveController::default();
        // 30 ms frames: 33 fps against a 60 fps target.
        let mut t = 0.0f64;
        for _ in 0..=CALIBRATION_FRAMES {
            controller.submit_gpu_frame_time(30_000_000);
            controller.update(t);
            t += 0.030;
        }
        assert!(!controller.is_calibrating());
        // ~ sqrt(33.3/60) * 0.88 = 0.66
        let scale = controller.scale();
        assert!(
            (0.58..=0.72).contains(&scale),
            "calibration scale {scale} outside the expected jump range"
        );
    }

    #[test]
    fn fast_shaders_keep_full_scale_through_calibration() {
        let mut controller = AdaptiveController::default();
        let mut t = 0.0f64;
        for _ in 0..=CALIBRATION_FRAMES {
            controller.submit_gpu_frame_time(8_000_000);
            controller.update(t);
            t += 0.008;
        }
        assert_eq!(controller.scale(), 1.0);
    }

    #[test]
    fn converges_near_target_and_locks() {
        let mut controller = AdaptiveController::default();
        // 30 ms at scale 1.0, quadratic in scale.
        simulate(&mut controller, 0.030, 4.0);
        let fps = controller.current_fps();
        assert!(
            (fps - 60.0).abs() <= 4.0,
            "fps {fps} did not converge near 60"
        );
        assert!(controller.is_locked(), "controller failed to lock");
    }

    #[test]
    fn lock_releases_on_large_error() {
        let mut controller = AdaptiveController::default();
        simulate(&mut controller, 0.030, 4.0);
        assert!(controller.is_locked());
        // Load quadruples; error far exceeds 3x the deadband.
        simulate(&mut controller, 0.120, 1.0);
        assert!(!controller.is_locked());
    }

    #[test]
    fn scale_never_leaves_configured_range() {
        let mut controller = AdaptiveController::default();
        simulate(&mut controller, 0.200, 6.0);
        let scale = controller.scale();
        assert!(scale >= controller.config().min_scale - 1e-6);
        assert!(scale <= controller.config().max_scale + 1e-6);
    }

    #[test]
    fn emergency_flags_severe_underrun_and_recovers() {
        let mut controller = AdaptiveController::new(AdaptiveConfig {
            min_scale: 0.9,
            ..AdaptiveConfig::default()
        });
        // Pinned near min scale the load still runs at ~12 fps.
        simulate(&mut controller, 0.080, 2.0);
        assert!(controller.is_emergency());
        simulate(&mut controller, 0.008, 2.0);
        assert!(!controller.is_emergency());
    }

    #[test]
    fn thermal_signal_forces_emergency() {
        let mut controller = AdaptiveController::default();
        assert!(!controller.is_emergency());
        controller.set_thermal_throttled(true);
        assert!(controller.is_emergency());
        controller.set_thermal_throttled(false);
        assert!(!controller.is_emergency());
    }

    #[test]
    fn disabled_controller_keeps_scale_constant() {
        let mut controller = AdaptiveController::default();
        controller.set_enabled(false);
        simulate(&mut controller, 0.050, 3.0);
        assert_eq!(controller.scale(), 1.0);
    }

    #[test]
    fn wall_clock_fallback_when_gpu_timing_disabled() {
        let mut controller = AdaptiveController::new(AdaptiveConfig {
            use_gpu_timing: false,
            ..AdaptiveConfig::default()
        });
        let mut t = 0.0f64;
        for _ in 0..240 {
            t += 0.025; // 40 fps wall cadence
            controller.update(t);
        }
        let fps = controller.current_fps();
        assert!((fps - 40.0).abs() < 5.0, "wall-clock fps {fps}");
    }

    #[test]
    fn force_scale_retargets_interpolation() {
        let mut controller = AdaptiveController::default();
        controller.force_scale(0.5);
        assert_eq!(controller.scale(), 0.5);
        controller.force_scale(5.0);
        assert_eq!(controller.scale(), controller.config().max_scale);
    }

    #[test]
    fn reset_returns_to_calibration() {
        let mut controller = AdaptiveController::default();
        simulate(&mut controller, 0.016, 1.0);
        assert!(!controller.is_calibrating());
        controller.reset();
        assert!(controller.is_calibrating());
    }
}
