//! Source compatibility rewrites and the Shadertoy wrapper.
//!
//! Two in-place patches cover the mismatches that break most pasted
//! Shadertoy sources on a plain GLSL ES pipeline:
//!
//! * `iChannelResolution[n]` used as a vec2 gets `.xy` appended unless the
//!   user already swizzles or indexes it.
//! * `texture(iChannelN, expr)` gets its coordinate projected to
//!   `(expr).xy` unless the argument already ends in a swizzle. A vec2
//!   argument picks up a redundant but harmless `.xy`.
//!
//! After patching, the pass body is wrapped in a fixed prefix declaring the
//! Shadertoy uniform set and a `main` that forwards to `mainImage`.

use crate::scanner::{self, is_ident_char};

/// Vertex stage shared by every pass: the fullscreen triangle strip.
pub const FULLSCREEN_VERTEX_SHADER: &str = "\
#version 300 es
layout(location = 0) in vec2 position;
void main() {
    gl_Position = vec4(position, 0.0, 1.0);
}
";

/// Uniform declarations every wrapped pass sees.
const WRAPPER_DECLS: &str = "\
precision highp float;
precision highp int;
uniform vec3 iResolution;
uniform float iTime;
uniform float iTimeDelta;
uniform float iFrameRate;
uniform int iFrame;
uniform vec4 iMouse;
uniform vec4 iDate;
uniform float iSampleRate;
uniform sampler2D iChannel0;
uniform sampler2D iChannel1;
uniform sampler2D iChannel2;
uniform sampler2D iChannel3;
uniform vec3 iChannelResolution[4];
uniform float iChannelTime[4];
out vec4 fragColor;
";

const WRAPPER_SUFFIX: &str = "\
void main() {
    mainImage(fragColor, gl_FragCoord.xy);
}
";

const DEFAULT_VERSION: &str = "#version 300 es";

/// Apply both compatibility rewrites in one scan. Comments and string
/// literals pass through untouched.
pub fn apply_compat_rewrites(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len() + 32);
    let mut i = 0;

    while i < bytes.len() {
        if let Some(next) = non_code_end(bytes, i) {
            out.push_str(&source[i..next]);
            i = next;
            continue;
        }

        if at_identifier(bytes, i, "iChannelResolution") {
            i = emit_channel_resolution(source, i, &mut out);
            continue;
        }

        if at_identifier(bytes, i, "texture") {
            if let Some(next) = try_emit_texture_call(source, i, &mut out) {
                i = next;
                continue;
            }
        }

        let step = source[i..].chars().next().map_or(1, |c| c.len_utf8());
        out.push_str(&source[i..i + step]);
        i += step;
    }

    out
}

/// Wrap a rewritten pass body with the uniform prelude and `main` shim.
///
/// Raw `void main(` sources (no `mainImage`) are compiled as-is; the author
/// is driving the pipeline directly and the wrapper would redefine `main`.
/// A user-written `#version` directive is hoisted to the top in place of
/// the default one.
pub fn wrap_fragment_source(common: &str, pass_source: &str) -> String {
    if scanner::find_identifier_from(pass_source, "mainImage", 0).is_none() {
        return pass_source.to_string();
    }

    let (common_version, common_body) = split_version_directive(common);
    let (pass_version, pass_body) = split_version_directive(pass_source);
    let version = pass_version
        .or(common_version)
        .unwrap_or_else(|| DEFAULT_VERSION.to_string());

    let mut out = String::with_capacity(
        version.len() + WRAPPER_DECLS.len() + common_body.len() + pass_body.len() + WRAPPER_SUFFIX.len() + 8,
    );
    out.push_str(&version);
    out.push('\n');
    out.push_str(WRAPPER_DECLS);
    out.push_str(&common_body);
    if !common_body.ends_with('\n') && !common_body.is_empty() {
        out.push('\n');
    }
    out.push_str(&pass_body);
    if !pass_body.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(WRAPPER_SUFFIX);
    out
}

/// Pull a `#version` line out of `source`, returning it (sans newline) and
/// the remaining text.
fn split_version_directive(source: &str) -> (Option<String>, String) {
    for (start, line) in line_spans(source) {
        if line.trim_start().starts_with("#version") {
            let end = start + line.len();
            let mut rest = String::with_capacity(source.len());
            rest.push_str(&source[..start]);
            // Also drop the newline that terminated the directive.
            let after = if source[end..].starts_with('\n') { end + 1 } else { end };
            rest.push_str(&source[after..]);
            return (Some(line.trim().to_string()), rest);
        }
    }
    (None, source.to_string())
}

fn line_spans(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source.split_inclusive('\n').scan(0usize, |offset, line| {
        let start = *offset;
        *offset += line.len();
        Some((start, line.trim_end_matches('\n')))
    })
}

/// If `i` starts a comment or string, return its end.
fn non_code_end(bytes: &[u8], i: usize) -> Option<usize> {
    match bytes[i] {
        b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
            let mut j = i + 2;
            while j < bytes.len() && bytes[j] != b'\n' {
                j += 1;
            }
            Some(j)
        }
        b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
            let mut j = i + 2;
            while j + 1 < bytes.len() {
                if bytes[j] == b'*' && bytes[j + 1] == b'/' {
                    return Some(j + 2);
                }
                j += 1;
            }
            Some(bytes.len())
        }
        b'"' => {
            let mut j = i + 1;
            while j < bytes.len() {
                match bytes[j] {
                    b'\\' => j += 2,
                    b'"' => return Some(j + 1),
                    _ => j += 1,
                }
            }
            Some(bytes.len())
        }
        _ => None,
    }
}

fn at_identifier(bytes: &[u8], i: usize, ident: &str) -> bool {
    if !bytes[i..].starts_with(ident.as_bytes()) {
        return false;
    }
    if i > 0 && is_ident_char(bytes[i - 1]) {
        return false;
    }
    let end = i + ident.len();
    end >= bytes.len() || !is_ident_char(bytes[end])
}

/// Emit `iChannelResolution[...]`, appending `.xy` unless the next token
/// already narrows it with `.` or `[`.
fn emit_channel_resolution(source: &str, start: usize, out: &mut String) -> usize {
    let bytes = source.as_bytes();
    let mut i = start + "iChannelResolution".len();
    out.push_str("iChannelResolution");

    if i >= bytes.len() || bytes[i] != b'[' {
        return i;
    }
    let open = i;
    let mut depth = 0i32;
    while i < bytes.len() {
        match bytes[i] {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    i += 1;
                    break;
                }
            }
            _ => {}
        }
        i += 1;
    }
    out.push_str(&source[open..i]);

    let followed_by = bytes.get(i).copied();
    if followed_by != Some(b'.') && followed_by != Some(b'[') {
        out.push_str(".xy");
    }
    i
}

/// Try to emit a `texture(iChannelN, expr ...)` call with the coordinate
/// argument projected. Returns the resume index, or `None` when the call
/// shape doesn't match (e.g. a different sampler).
fn try_emit_texture_call(source: &str, start: usize, out: &mut String) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut i = start + "texture".len();
    i = skip_ws(bytes, i);
    if bytes.get(i) != Some(&b'(') {
        return None;
    }
    i += 1;
    i = skip_ws(bytes, i);
    if !bytes[i..].starts_with(b"iChannel") {
        return None;
    }
    i += "iChannel".len();
    if !bytes.get(i).is_some_and(|b| b.is_ascii_digit()) {
        return None;
    }
    i += 1;
    i = skip_ws(bytes, i);
    if bytes.get(i) != Some(&b',') {
        return None;
    }
    i += 1;

    // Coordinate argument: up to the matching ')' or a top-level ','
    // (a third bias argument).
    let expr_start = skip_ws(bytes, i);
    let mut j = expr_start;
    let mut depth = 0i32;
    while j < bytes.len() {
        if let Some(next) = non_code_end(bytes, j) {
            j = next.max(j + 1);
            continue;
        }
        match bytes[j] {
            b'(' | b'[' => depth += 1,
            b')' | b']' => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            b',' if depth == 0 => break,
            _ => {}
        }
        j += 1;
    }
    if j >= bytes.len() {
        // Unterminated call; leave the text alone.
        return None;
    }

    out.push_str(&source[start..i]);
    out.push(' ');

    let expr = source[expr_start..j].trim_end();
    // Nested channel reads inside the argument get the same treatment.
    let expr = apply_compat_rewrites(expr);
    if ends_in_swizzle(&expr) {
        out.push_str(&expr);
    } else {
        out.push('(');
        out.push_str(&expr);
        out.push_str(").xy");
    }
    Some(j)
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t' || bytes[i] == b'\n') {
        i += 1;
    }
    i
}

/// True when the expression already ends in a component swizzle like `.xy`
/// or `.rgb`.
fn ends_in_swizzle(expr: &str) -> bool {
    let bytes = expr.as_bytes();
    let mut n = 0;
    let mut i = bytes.len();
    while i > 0 && matches!(bytes[i - 1], b'x' | b'y' | b'z' | b'w' | b'r' | b'g' | b'b' | b'a' | b's' | b't' | b'p' | b'q') {
        i -= 1;
        n += 1;
    }
    n >= 1 && n <= 4 && i > 0 && bytes[i - 1] == b'.' && i > 1 && !bytes[i - 2].is_ascii_digit()
}
