//! Pass extraction: split a multi-`mainImage` source into independently
//! compilable passes.
//!
//! A Shadertoy-style source may carry several `mainImage` functions, one
//! per pass, with helper code between them. Each extracted pass gets every
//! helper segment written between *earlier* pass bodies plus its own
//! function, so helpers stay visible downstream while no pass ever sees
//! another pass's `mainImage` body. The prefix before the first `mainImage`
//! (including any `#version` directive) is the common source shared by all
//! passes.

use smallvec::SmallVec;

use crate::error::{Result, ShaderError};
use crate::pass::{PassType, MAX_PASSES};
use crate::scanner;

/// One extracted pass: its assigned type and the source text to compile.
#[derive(Debug, Clone)]
pub struct ParsedPass {
    pub pass_type: PassType,
    pub name: String,
    pub source: String,
}

/// Output of [`parse`].
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// More than one rendered pass.
    pub is_multipass: bool,
    /// Code preceding the first `mainImage`, shared by every pass.
    pub common_source: String,
    pub passes: SmallVec<[ParsedPass; MAX_PASSES]>,
}

/// Byte offsets describing one `mainImage` definition in the source.
struct FunctionSpan {
    /// Start of the line holding the signature (preserves return-type text).
    line_start: usize,
    /// One past the `}` closing the body.
    body_end: usize,
}

/// Split `source` into passes.
///
/// Fails with [`ShaderError::Parse`] only when the source has neither a
/// `mainImage` definition nor a plain `void main(`. A raw `void main(`
/// shader parses as a single Image pass compiled without the Shadertoy
/// wrapper.
pub fn parse(source: &str) -> Result<ParseResult> {
    let spans = find_main_image_spans(source);

    if spans.is_empty() {
        if scanner::find_pattern(source, "void main(").is_none() {
            return Err(ShaderError::Parse);
        }
        let mut passes = SmallVec::new();
        passes.push(ParsedPass {
            pass_type: PassType::Image,
            name: PassType::Image.label().to_string(),
            source: source.to_string(),
        });
        return Ok(ParseResult {
            is_multipass: false,
            common_source: String::new(),
            passes,
        });
    }

    if spans.len() == 1 {
        let mut passes = SmallVec::new();
        passes.push(ParsedPass {
            pass_type: PassType::Image,
            name: PassType::Image.label().to_string(),
            source: source.to_string(),
        });
        return Ok(ParseResult {
            is_multipass: false,
            common_source: String::new(),
            passes,
        });
    }

    let mut spans = spans;
    if spans.len() > MAX_PASSES {
        log::warn!(
            "shader declares {} mainImage functions; keeping the first {}",
            spans.len(),
            MAX_PASSES
        );
        spans.truncate(MAX_PASSES);
    }

    let common_source = source[..spans[0].line_start].to_string();

    let mut passes: SmallVec<[ParsedPass; MAX_PASSES]> = SmallVec::new();
    for (i, span) in spans.iter().enumerate() {
        // Helper segments between all earlier bodies, then this pass's own
        // function. Segment j runs from body j's end to the next signature.
        let mut pass_source = String::new();
        for j in 0..i {
            let seg_end = spans[j + 1].line_start;
            pass_source.push_str(&source[spans[j].body_end..seg_end]);
        }
        pass_source.push_str(&source[span.line_start..span.body_end]);

        let pass_type = marker_above(source, span.line_start)
            .unwrap_or_else(|| default_type(i, spans.len()));

        passes.push(ParsedPass {
            pass_type,
            name: pass_type.label().to_string(),
            source: pass_source,
        });
    }

    Ok(ParseResult {
        is_multipass: passes.iter().filter(|p| p.pass_type != PassType::Sound).count() > 1,
        common_source,
        passes,
    })
}

/// Locate every `mainImage` identifier that looks like a function
/// definition (followed by `(`), with its line start and body end.
fn find_main_image_spans(source: &str) -> Vec<FunctionSpan> {
    let bytes = source.as_bytes();
    let mut spans = Vec::new();
    let mut at = 0;
    while let Some(pos) = scanner::find_identifier_from(source, "mainImage", at) {
        let mut after = pos + "mainImage".len();
        while after < bytes.len() && (bytes[after] == b' ' || bytes[after] == b'\t') {
            after += 1;
        }
        if after < bytes.len() && bytes[after] == b'(' {
            let body_end = scanner::find_function_end(source, pos);
            spans.push(FunctionSpan {
                line_start: scanner::line_start(source, pos),
                body_end,
            });
            at = body_end;
        } else {
            at = pos + 1;
        }
    }
    spans
}

/// Scan up to five lines above a signature for a pass-type marker comment.
fn marker_above(source: &str, signature_line_start: usize) -> Option<PassType> {
    let above = &source[..signature_line_start];
    for line in above.lines().rev().take(5) {
        let trimmed = line.trim_start();
        if !trimmed.starts_with("//") {
            continue;
        }
        if trimmed.contains("Buffer A") {
            return Some(PassType::BufferA);
        }
        if trimmed.contains("Buffer B") {
            return Some(PassType::BufferB);
        }
        if trimmed.contains("Buffer C") {
            return Some(PassType::BufferC);
        }
        if trimmed.contains("Buffer D") {
            return Some(PassType::BufferD);
        }
        if trimmed.contains("Image") {
            return Some(PassType::Image);
        }
        if trimmed.contains("Sound") {
            return Some(PassType::Sound);
        }
    }
    None
}

/// Unmarked passes: the last one is the Image, earlier ones become
/// Buffer A..D in order, saturating at Buffer D.
fn default_type(index: usize, count: usize) -> PassType {
    if index + 1 == count {
        PassType::Image
    } else {
        PassType::buffer(index)
    }
}
