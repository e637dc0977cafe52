// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Byte-stream normaliser (C1, §4.1).
//!
//! Decodes backend bytes into a canonical, always-valid UTF-8 stream:
//! UTF-8 first, falling back to CP437 for any chunk that fails to decode.
//! [`Utf8CpDecoder`] is the shared low-level primitive; both the
//! subscriber-facing normaliser (`normalize`) and the terminal emulator
//! (`terminal::Terminal::feed`) use it so the fallback behaviour can never
//! drift between the two call sites.

/// Low-ASCII codepoints translated to Unicode arrows when `shift_in` is not
/// latched (§4.1 step 2).
const CURSOR_UP: u8 = 0x18;
const CURSOR_DOWN: u8 = 0x19;

/// Stateful incremental UTF-8 decoder with a CP437 fallback.
///
/// Each handler (and each terminal emulator instance) owns one of these.
/// A partial multibyte sequence at a chunk boundary is buffered here and
/// completed by the next call to [`Utf8CpDecoder::decode`].
#[derive(Debug, Default)]
pub struct Utf8CpDecoder {
    pending: Vec<u8>,
}

impl Utf8CpDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk, returning a `String` guaranteed to be valid UTF-8.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut combined = std::mem::take(&mut self.pending);
        combined.extend_from_slice(chunk);

        match std::str::from_utf8(&combined) {
            Ok(text) => text.to_owned(),
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                match err.error_len() {
                    // Truncated multibyte sequence at the tail: buffer it and
                    // emit only the validated prefix.
                    None => {
                        // SAFETY-by-construction: `valid_up_to` came from `from_utf8`.
                        let text = std::str::from_utf8(&combined[..valid_up_to])
                            .unwrap_or_default()
                            .to_owned();
                        self.pending = combined[valid_up_to..].to_vec();
                        text
                    }
                    // Genuinely invalid byte: reset decoder state and fall
                    // back to CP437 for this whole chunk (§4.1 step 1).
                    Some(_) => {
                        self.pending.clear();
                        decode_cp437(chunk)
                    }
                }
            }
        }
    }
}

/// Decode a byte slice as single-byte CP437, with no multibyte handling.
fn decode_cp437(data: &[u8]) -> String {
    data.iter().map(|&b| cp437_char(b)).collect()
}

fn cp437_char(byte: u8) -> char {
    if byte < 0x80 {
        byte as char
    } else {
        CP437_HIGH[(byte - 0x80) as usize]
    }
}

#[rustfmt::skip]
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐',
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧',
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀',
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩',
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];

/// Translate cursor-key control bytes into visible Unicode arrows,
/// skipped while `shift_in` is latched (the bytes are then meaningful
/// G1 graphics, not stray control codes) — §4.1 step 2.
fn translate_arrows(text: &str, shift_in: Option<u8>) -> String {
    if shift_in.is_some() {
        return text.to_owned();
    }
    text.chars()
        .map(|c| match c as u32 {
            v if v == CURSOR_UP as u32 => '\u{2191}',
            v if v == CURSOR_DOWN as u32 => '\u{2193}',
            _ => c,
        })
        .collect()
}

/// Normalise one chunk of backend bytes into canonical UTF-8 (§4.1).
pub fn normalize(decoder: &mut Utf8CpDecoder, chunk: &[u8], shift_in: Option<u8>) -> String {
    let decoded = decoder.decode(chunk);
    translate_arrows(&decoded, shift_in)
}

#[cfg(test)]
#[path = "normalize_tests.rs"]
mod tests;
