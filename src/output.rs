//! Output rendering: the `#` markup mini-language.
//!
//! The game produces markup; this module is the sole translator into
//! the bytes a client sees. Depending on per-session flags the same
//! markup becomes ANSI color, 256-color, MXP-escaped rich text, or
//! plain text, with optional screen-reader space collapsing.

use crate::hooks::Vitals;

/// Hard cap on one rendered chunk. Markup expansion past this point is
/// truncated and logged rather than allowed to balloon.
const RENDER_MAX: usize = 65536;

/// Reserved room for the trailing color reset.
const RESET_RESERVE: usize = 20;

/// ANSI reset appended to every colored chunk so color state never
/// bleeds across messages.
pub const ANSI_RESET: &[u8] = b"\x1b[0m";

/// MXP mode-line escapes (ESC [ <mode> z).
pub const MXP_SECURE_LINE: &[u8] = b"\x1b[1z";
pub const MXP_LOCKED_LINE: &[u8] = b"\x1b[2z";

/// Per-session rendering switches, sampled from the session at call
/// time so the renderer itself stays a pure function.
#[derive(Debug, Clone, Copy)]
pub struct RenderOpts {
    /// Color output enabled (player `ansi` flag)
    pub ansi: bool,
    /// Rich markup negotiated on this connection
    pub mxp: bool,
    /// Collapse runs of spaces after color stripping
    pub screen_reader: bool,
}

impl Default for RenderOpts {
    fn default() -> Self {
        Self {
            ansi: true,
            mxp: false,
            screen_reader: false,
        }
    }
}

/// Color code table: markup character to ANSI sequence.
/// Digits are the bright palette slots, lowercase the dark slots,
/// uppercase the bright aliases.
const COLOR_CODES: &[(u8, &[u8])] = &[
    (b'0', b"\x1b[0;1;30m"),
    (b'1', b"\x1b[0;1;31m"),
    (b'2', b"\x1b[0;1;32m"),
    (b'3', b"\x1b[0;1;33m"),
    (b'4', b"\x1b[0;1;34m"),
    (b'5', b"\x1b[0;1;35m"),
    (b'6', b"\x1b[0;1;36m"),
    (b'7', b"\x1b[0;0;37m"),
    (b'8', b"\x1b[0;0;30m"),
    (b'9', b"\x1b[0;1;37m"),
    (b'r', b"\x1b[0;0;31m"),
    (b'g', b"\x1b[0;0;32m"),
    (b'o', b"\x1b[0;0;33m"),
    (b'l', b"\x1b[0;0;34m"),
    (b'p', b"\x1b[0;0;35m"),
    (b'c', b"\x1b[0;0;36m"),
    (b'y', b"\x1b[0;1;33m"),
    (b'R', b"\x1b[0;1;31m"),
    (b'G', b"\x1b[0;1;32m"),
    (b'L', b"\x1b[0;1;34m"),
    (b'P', b"\x1b[0;1;35m"),
    (b'C', b"\x1b[0;1;36m"),
    (b'n', b"\x1b[0m"),
    (b'i', b"\x1b[7m"),
    (b'u', b"\x1b[4m"),
];

/// Pool for the `#s` random-color code.
const RANDOM_COLORS: &[&[u8]] = &[
    b"\x1b[0;1;37m",
    b"\x1b[0;1;30m",
    b"\x1b[0;0;30m",
    b"\x1b[0;0;31m",
    b"\x1b[0;1;31m",
    b"\x1b[0;0;32m",
    b"\x1b[0;1;32m",
    b"\x1b[0;0;33m",
    b"\x1b[0;1;33m",
    b"\x1b[0;0;34m",
    b"\x1b[0;1;34m",
    b"\x1b[0;0;35m",
    b"\x1b[0;1;35m",
    b"\x1b[0;0;36m",
    b"\x1b[0;1;36m",
];

fn lookup_color(code: u8) -> Option<&'static [u8]> {
    COLOR_CODES
        .iter()
        .find(|&&(c, _)| c == code)
        .map(|&(_, ansi)| ansi)
}

/// xorshift step for `#s`; the caller owns the seed so rendering stays
/// deterministic apart from that one code.
fn next_random(seed: &mut u32) -> u32 {
    let mut x = *seed;
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    *seed = if x == 0 { 0x9e3779b9 } else { x };
    *seed
}

/// Translate one markup chunk into client bytes.
///
/// Color codes vanish when ANSI is off; MXP escapes fall back to their
/// literal characters when rich markup is off; unknown `#` codes are
/// consumed silently. A trailing reset is appended whenever ANSI is on.
pub fn render_markup(input: &str, opts: RenderOpts, seed: &mut u32) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::with_capacity(input.len() + RESET_RESERVE);
    let bytes = input.as_bytes();
    let limit = RENDER_MAX - RESET_RESERVE;
    let mut i = 0;
    let mut truncated = false;

    macro_rules! push_seq {
        ($seq:expr) => {
            if out.len() + $seq.len() <= limit {
                out.extend_from_slice($seq);
            } else {
                truncated = true;
            }
        };
    }

    while i < bytes.len() && !truncated {
        let b = bytes[i];
        if b != b'#' {
            if out.len() < limit {
                out.push(b);
            } else {
                truncated = true;
            }
            i += 1;
            continue;
        }

        // '#' introduces a code; a trailing lone '#' is dropped
        i += 1;
        if i >= bytes.len() {
            break;
        }
        let code = bytes[i];
        i += 1;

        match code {
            b'#' => push_seq!(b"#"),
            b'-' => push_seq!(b"~"),
            b'+' => push_seq!(b"%"),
            b's' => {
                if opts.ansi {
                    let pick = (next_random(seed) as usize) % RANDOM_COLORS.len();
                    push_seq!(RANDOM_COLORS[pick]);
                }
            }
            b'x' => {
                // 256-color selector: #xNNN, three decimal digits
                if i + 3 <= bytes.len()
                    && bytes[i].is_ascii_digit()
                    && bytes[i + 1].is_ascii_digit()
                    && bytes[i + 2].is_ascii_digit()
                {
                    if opts.ansi {
                        let seq = [
                            0x1b, b'[', b'0', b';', b'3', b'8', b';', b'5', b';', bytes[i],
                            bytes[i + 1], bytes[i + 2], b'm',
                        ];
                        push_seq!(&seq);
                    }
                    i += 3;
                }
            }
            b'M' => {
                if opts.mxp {
                    push_seq!(MXP_SECURE_LINE);
                }
            }
            b']' => {
                if opts.mxp {
                    push_seq!(MXP_LOCKED_LINE);
                }
            }
            b'<' => {
                if opts.mxp {
                    push_seq!(b"&lt;");
                } else {
                    push_seq!(b"<");
                }
            }
            b'>' => {
                if opts.mxp {
                    push_seq!(b"&gt;");
                } else {
                    push_seq!(b">");
                }
            }
            _ => {
                if let Some(ansi) = lookup_color(code) {
                    if opts.ansi {
                        push_seq!(ansi);
                    }
                }
                // Unknown codes are consumed silently
            }
        }
    }

    if truncated {
        tracing::warn!("buffer overflow detected, truncating");
    }

    if opts.ansi {
        out.extend_from_slice(ANSI_RESET);
    }

    if opts.screen_reader {
        collapse_spaces(&mut out);
    }

    out
}

/// Collapse runs of two or more spaces to one, in place. Cleans up
/// alignment padding for screen readers.
fn collapse_spaces(buf: &mut Vec<u8>) {
    let mut dst = 0;
    let mut prev_space = false;
    for src in 0..buf.len() {
        let b = buf[src];
        if b == b' ' {
            if !prev_space {
                buf[dst] = b;
                dst += 1;
                prev_space = true;
            }
        } else {
            prev_space = false;
            buf[dst] = b;
            dst += 1;
        }
    }
    buf.truncate(dst);
}

/// Color code scaled by a current/maximum ratio, for prompt numbers.
pub fn col_scale_code(current: i32, max: i32) -> &'static str {
    const CODES: [&str; 4] = ["#R", "#L", "#G", "#y"];
    if current < 1 {
        return "#R";
    }
    if current >= max {
        return "#C";
    }
    let max = if max > 0 { max } else { 1 };
    let idx = ((4 * current as i64) / max as i64).clamp(0, 3) as usize;
    CODES[idx]
}

/// The compact built-in prompt: `[hp/maxhp mana/maxmana move/maxmove]`
/// with each current value color-scaled against its maximum.
pub fn compact_prompt(v: &Vitals) -> String {
    format!(
        "#7[{}{}#n/{} {}{}#n/{} {}{}#n/{}]#n ",
        col_scale_code(v.hp, v.max_hp),
        v.hp,
        v.max_hp,
        col_scale_code(v.mana, v.max_mana),
        v.mana,
        v.max_mana,
        col_scale_code(v.mv, v.max_mv),
        v.mv,
        v.max_mv,
    )
}

/// Expand a custom prompt template. `%h/%H` current/max hit points,
/// `%m/%M` mana, `%v/%V` movement, `%%` a literal percent.
pub fn expand_prompt_template(template: &str, v: &Vitals) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('h') => out.push_str(&v.hp.to_string()),
            Some('H') => out.push_str(&v.max_hp.to_string()),
            Some('m') => out.push_str(&v.mana.to_string()),
            Some('M') => out.push_str(&v.max_mana.to_string()),
            Some('v') => out.push_str(&v.mv.to_string()),
            Some('V') => out.push_str(&v.max_mv.to_string()),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }

    out
}
