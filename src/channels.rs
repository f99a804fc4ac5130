//! Static channel inference.
//!
//! Shadertoy sources carry no binding metadata, so each buffer pass's four
//! `iChannelN` inputs are inferred from how the source samples them. Every
//! occurrence of a channel name contributes to three scores (noise atlas,
//! buffer read, self feedback); a pure decision function maps the score
//! tuple plus the channel index to a [`ChannelSource`]. The thresholds are
//! empirical constants tuned on the Shadertoy corpus; callers should rely
//! on the qualitative outcomes, not the exact numbers.
//!
//! The Image pass skips inference entirely: its channels are hard-wired to
//! Buffer A..D.

use crate::pass::{PassType, CHANNEL_COUNT};
use crate::scanner;

/// What a channel resolves to at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSource {
    /// The built-in procedural noise atlas.
    Noise,
    /// The pass's own previous-frame output.
    Feedback,
    /// Another pass's most recent output.
    Buffer(PassType),
}

/// Per-channel evidence accumulated over every occurrence of the channel
/// name in a pass source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelScores {
    pub noise: u32,
    pub buffer: u32,
    pub feedback: u32,
    /// How many times the channel name appears at all.
    pub occurrences: u32,
}

/// Score one channel of a pass source.
pub fn score_channel(source: &str, channel: usize) -> ChannelScores {
    let name = channel_name(channel);
    let mut scores = ChannelScores::default();

    let mut at = 0;
    while let Some(pos) = scanner::find_identifier_from(source, name, at) {
        scores.occurrences += 1;
        let line = scanner::line_at(source, pos);
        let tail = &line[pos - scanner::line_start(source, pos)..];

        // Noise atlas evidence: division by a power-of-two atlas size,
        // tiny multiplicative constants, single-component reads.
        if ["/256", "/ 256", "/512", "/ 512", "/1024", "/ 1024"]
            .iter()
            .any(|p| line.contains(p))
        {
            scores.noise += 100;
        }
        if (line.contains("*0.00") || line.contains("* 0.00"))
            && !line.contains("mix(")
            && !line.contains("smoothstep(")
        {
            scores.noise += 80;
        }
        if has_single_component_read(tail) {
            scores.noise += 30;
        }

        // Buffer evidence: screen-space coordinates.
        if line.contains("fragCoord") || line.contains("iResolution") {
            scores.buffer += 50;
        }
        if contains_identifier(line, "uv") {
            scores.buffer += 40;
        }
        if contains_identifier(line, "coord")
            || contains_identifier(line, "pos")
            || contains_identifier(line, "st")
        {
            scores.buffer += 30;
        }

        // Feedback evidence: temporal mixing and accumulation.
        if line.contains("mix(") {
            scores.feedback += 60;
        }
        if line.contains("+=") || line.contains("*=") {
            scores.feedback += 20;
        }

        at = pos + name.len();
    }

    scores
}

/// Map a score tuple plus the channel index to a binding.
pub fn decide(scores: ChannelScores, channel: usize) -> ChannelSource {
    if scores.occurrences == 0 {
        return ChannelSource::Noise;
    }
    if scores.noise >= scores.buffer.max(scores.feedback) && scores.noise >= 50 {
        return ChannelSource::Noise;
    }
    if scores.buffer > 0 || scores.feedback > 0 {
        if channel == 0 {
            // Shadertoy convention: channel 0 of a buffer pass is its own
            // history unless the evidence says noise atlas.
            return if scores.noise >= 50 {
                ChannelSource::Noise
            } else {
                ChannelSource::Feedback
            };
        }
        return if scores.feedback > scores.buffer {
            ChannelSource::Feedback
        } else {
            ChannelSource::Buffer(PassType::buffer(channel - 1))
        };
    }
    // Used but ambiguous.
    if channel == 0 {
        ChannelSource::Feedback
    } else {
        ChannelSource::Buffer(PassType::buffer(channel - 1))
    }
}

/// Infer all four channels of a buffer pass.
pub fn infer_buffer_channels(source: &str) -> [ChannelSource; CHANNEL_COUNT] {
    let mut out = [ChannelSource::Noise; CHANNEL_COUNT];
    for (c, slot) in out.iter_mut().enumerate() {
        let scores = score_channel(source, c);
        *slot = decide(scores, c);
        log::trace!(
            "channel {c}: noise={} buffer={} feedback={} -> {:?}",
            scores.noise,
            scores.buffer,
            scores.feedback,
            slot
        );
    }
    out
}

/// The Image pass reads Buffer A..D on channels 0..3, always.
pub fn image_channels() -> [ChannelSource; CHANNEL_COUNT] {
    [
        ChannelSource::Buffer(PassType::BufferA),
        ChannelSource::Buffer(PassType::BufferB),
        ChannelSource::Buffer(PassType::BufferC),
        ChannelSource::Buffer(PassType::BufferD),
    ]
}

fn channel_name(channel: usize) -> &'static str {
    match channel {
        0 => "iChannel0",
        1 => "iChannel1",
        2 => "iChannel2",
        _ => "iChannel3",
    }
}

fn contains_identifier(line: &str, ident: &str) -> bool {
    scanner::find_identifier_from(line, ident, 0).is_some()
}

/// `.x` or `.r` after the occurrence, not part of a longer swizzle.
fn has_single_component_read(tail: &str) -> bool {
    let bytes = tail.as_bytes();
    for i in 0..bytes.len().saturating_sub(1) {
        if bytes[i] == b'.' && (bytes[i + 1] == b'x' || bytes[i + 1] == b'r') {
            let next = bytes.get(i + 2).copied();
            let continues = next.is_some_and(|b| {
                matches!(b, b'x' | b'y' | b'z' | b'w' | b'r' | b'g' | b'b' | b'a')
                    || scanner::is_ident_char(b)
            });
            if !continues {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_channel_binds_noise() {
        let src = "void mainImage(out vec4 c, in vec2 p) { c = vec4(0.0); }";
        assert_eq!(decide(score_channel(src, 0), 0), ChannelSource::Noise);
    }

    #[test]
    fn atlas_divisor_binds_noise_on_any_channel() {
        let src = "float n = texture(iChannel0, p/1024.0).x;";
        assert_eq!(decide(score_channel(src, 0), 0), ChannelSource::Noise);
        let src1 = "float n = texture(iChannel1, p/256.0).r;";
        assert_eq!(decide(score_channel(src1, 1), 1), ChannelSource::Noise);
    }

    #[test]
    fn temporal_mix_on_channel_zero_binds_feedback() {
        let src = "c = mix(texture(iChannel0, uv), vec4(sin(iTime),0,0,1), 0.02);";
        assert_eq!(decide(score_channel(src, 0), 0), ChannelSource::Feedback);
    }

    #[test]
    fn uv_sampling_on_channel_one_routes_to_buffer_a() {
        let src = "vec4 prev = texture(iChannel1, uv);";
        assert_eq!(
            decide(score_channel(src, 1), 1),
            ChannelSource::Buffer(PassType::BufferA)
        );
    }

    #[test]
    fn accumulation_beats_buffer_on_later_channels() {
        let src = "acc += texture(iChannel2, q); acc *= texture(iChannel2, q).a;";
        let scores = score_channel(src, 2);
        assert!(scores.feedback > scores.buffer);
        assert_eq!(decide(scores, 2), ChannelSource::Feedback);
    }

    #[test]
    fn ambiguous_use_falls_back_by_index() {
        let src = "vec4 a = texture(iChannel0, q); vec4 b = texture(iChannel3, q);";
        assert_eq!(decide(score_channel(src, 0), 0), ChannelSource::Feedback);
        assert_eq!(
            decide(score_channel(src, 3), 3),
            ChannelSource::Buffer(PassType::BufferC)
        );
    }

    #[test]
    fn tiny_constant_outside_mix_counts_as_noise() {
        let src = "float g = texture(iChannel1, q *0.001).x;";
        let scores = score_channel(src, 1);
        assert!(scores.noise >= 80);
        assert_eq!(decide(scores, 1), ChannelSource::Noise);
    }

    #[test]
    fn image_channels_are_hardwired() {
        assert_eq!(
            image_channels(),
            [
                ChannelSource::Buffer(PassType::BufferA),
                ChannelSource::Buffer(PassType::BufferB),
                ChannelSource::Buffer(PassType::BufferC),
                ChannelSource::Buffer(PassType::BufferD),
            ]
        );
    }
}
