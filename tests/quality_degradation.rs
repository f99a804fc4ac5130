//! Degradation paths: thermal/emergency pressure switches buffer passes
//! to half-rate scheduling and demoted resolutions, and live source
//! replacement rebuilds the pass chain without recreating the engine.

mod common;

use common::RecordingGl;
use lucerna::prelude::*;

const TWO_BUFFERS: &str = "\
// Buffer A
void mainImage(out vec4 c, in vec2 p){ vec2 uv=p/iResolution.xy; c = mix(texture(iChannel0, uv), vec4(sin(iTime)), 0.1); }
// Buffer B
void mainImage(out vec4 c, in vec2 p){ vec2 uv=p/iResolution.xy; c = mix(texture(iChannel0, uv), vec4(cos(iTime)), 0.1); }
// Image
void mainImage(out vec4 c, in vec2 p){
    c = texture(iChannel0, p/iResolution.xy) + texture(iChannel1, p/iResolution.xy);
}
";

fn ready(gl: &mut RecordingGl, source: &str) -> MultipassShader {
    common::init_logging();
    let mut shader = MultipassShader::new(source).unwrap();
    shader.init_gl(gl, 1280, 720).unwrap();
    assert!(shader.compile_all(gl));
    shader
}

/// Past calibration, with a steady frame-time signal.
fn warm_up(shader: &mut MultipassShader, gl: &mut RecordingGl) -> f32 {
    let mut t = 0.0f32;
    for _ in 0..30 {
        shader.render(gl, t, -1.0, -1.0, false);
        t += 0.016;
    }
    t
}

#[test]
fn thermal_throttle_halves_buffer_cadence() {
    let mut gl = RecordingGl::new();
    let mut shader = ready(&mut gl, TWO_BUFFERS);
    let mut t = warm_up(&mut shader, &mut gl);

    shader.set_thermal_throttled(true);
    let draws_before = gl.draws().len();
    for _ in 0..20 {
        shader.render(&mut gl, t, -1.0, -1.0, false);
        t += 0.016;
    }
    // Per frame: one of the two buffers plus the image = 2 draws, against
    // 3 when running flat out.
    let emergency_draws = gl.draws().len() - draws_before;
    assert_eq!(emergency_draws, 40, "expected half-rate buffer scheduling");

    shader.set_thermal_throttled(false);
    // Recovery needs the controller to see a healthy rate again.
    let draws_mid = gl.draws().len();
    for _ in 0..20 {
        shader.render(&mut gl, t, -1.0, -1.0, false);
        t += 0.016;
    }
    let recovered_draws = gl.draws().len() - draws_mid;
    assert!(
        recovered_draws > 40,
        "full cadence should resume after the throttle clears"
    );
}

#[test]
fn emergency_demotes_buffer_resolution() {
    let mut gl = RecordingGl::new();
    let mut shader = ready(&mut gl, TWO_BUFFERS);
    let mut t = warm_up(&mut shader, &mut gl);

    let full = shader.passes()[0].width;
    shader.set_thermal_throttled(true);
    for _ in 0..5 {
        shader.render(&mut gl, t, -1.0, -1.0, false);
        t += 0.016;
    }
    let demoted = shader.passes()[0].width;
    assert!(
        demoted < full,
        "emergency quality bias should shrink buffers ({full} -> {demoted})"
    );
}

#[test]
fn replace_source_rebuilds_pass_chain() {
    let mut gl = RecordingGl::new();
    let mut shader = ready(&mut gl, TWO_BUFFERS);
    warm_up(&mut shader, &mut gl);
    assert_eq!(shader.passes().len(), 3);

    let single = "void mainImage(out vec4 c, in vec2 p){ c = vec4(1.0); }";
    shader.replace_source(&mut gl, single).unwrap();
    assert_eq!(shader.passes().len(), 1);
    assert!(!shader.is_ready(), "new passes start uncompiled");

    assert!(shader.compile_all(&mut gl));
    assert!(shader.is_ready());
    assert_eq!(shader.frame_count(), 0);

    let before = gl.draws().len();
    shader.render(&mut gl, 0.0, -1.0, -1.0, false);
    assert_eq!(gl.draws().len() - before, 1);
    assert_eq!(
        gl.draws().last().unwrap().framebuffer,
        gl.surface_framebuffer
    );
}

#[test]
fn replace_source_with_garbage_keeps_engine_alive() {
    let mut gl = RecordingGl::new();
    let mut shader = ready(&mut gl, TWO_BUFFERS);

    let result = shader.replace_source(&mut gl, "not a shader at all");
    assert!(matches!(result, Err(ShaderError::Parse)));
}

#[test]
fn destroy_releases_every_object_and_render_becomes_inert() {
    let mut gl = RecordingGl::new();
    let mut shader = ready(&mut gl, TWO_BUFFERS);
    shader.render(&mut gl, 0.0, -1.0, -1.0, false);

    shader.destroy(&mut gl);
    assert!(!shader.is_ready());

    let draws_before = gl.draws().len();
    shader.render(&mut gl, 0.016, -1.0, -1.0, false);
    assert_eq!(gl.draws().len(), draws_before, "destroyed engine must not draw");
}
