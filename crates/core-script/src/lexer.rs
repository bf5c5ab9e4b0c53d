//! Line lexer for workout text.
//!
//! Token classes, matched longest-first at each position:
//! * timer: `:ss` or up to `d:hh:mm:ss` (right-aligned parts)
//! * resistance: number + `lb` / `kg` / `#`
//! * distance: number + `m` / `km` / `mi` / `ft` / `yd`
//! * group open/close `(` `)`, action open/close `[:` `]`
//! * lap operators `-` and `+`
//! * bare numbers, identifiers (any other non-whitespace run)
//!
//! The lexer never fails a whole line; unrecognized or malformed spans are
//! reported through the shared error sink and skipped so partial statements
//! still lex.

use crate::{ParseError, ParseErrorKind};
use core_fragment::{DistanceUnit, DistanceValue, LoadUnit, LoadValue, SourcePos};
use smallvec::SmallVec;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Target duration in milliseconds.
    Timer(u64),
    Resistance(LoadValue),
    Distance(DistanceValue),
    GroupOpen,
    GroupClose,
    ActionOpen,
    ActionClose,
    Minus,
    Plus,
    Number(u32),
    Ident(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: SourcePos,
}

pub type TokenLine = SmallVec<[Token; 8]>;

/// Lex one line (without its trailing newline). `line_no` is the 0-based
/// source line used for positions and error reporting.
pub fn lex_line(text: &str, line_no: u32, errors: &mut Vec<ParseError>) -> TokenLine {
    let mut tokens = TokenLine::new();
    let bytes = text.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        // Safe: `i` only ever advances to char boundaries.
        let c = text[i..].chars().next().expect("in-bounds char");
        let pos = SourcePos::new(line_no, i as u32);

        if c.is_whitespace() {
            i += c.len_utf8();
            continue;
        }

        match c {
            '(' => {
                tokens.push(Token {
                    kind: TokenKind::GroupOpen,
                    pos,
                });
                i += 1;
            }
            ')' => {
                tokens.push(Token {
                    kind: TokenKind::GroupClose,
                    pos,
                });
                i += 1;
            }
            '[' if bytes.get(i + 1) == Some(&b':') => {
                tokens.push(Token {
                    kind: TokenKind::ActionOpen,
                    pos,
                });
                i += 2;
            }
            ']' => {
                tokens.push(Token {
                    kind: TokenKind::ActionClose,
                    pos,
                });
                i += 1;
            }
            '-' if !starts_word(bytes, i + 1) => {
                tokens.push(Token {
                    kind: TokenKind::Minus,
                    pos,
                });
                i += 1;
            }
            '+' if !starts_word(bytes, i + 1) => {
                tokens.push(Token {
                    kind: TokenKind::Plus,
                    pos,
                });
                i += 1;
            }
            ':' if bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()) => {
                // `:30` form: seconds only.
                let (value, end) = scan_digits(bytes, i + 1);
                match value {
                    Some(secs) => tokens.push(Token {
                        kind: TokenKind::Timer(u64::from(secs) * 1_000),
                        pos,
                    }),
                    None => errors.push(ParseError::new(
                        ParseErrorKind::NumberOverflow,
                        pos,
                        &text[i..end],
                    )),
                }
                i = end;
            }
            d if d.is_ascii_digit() => {
                i = lex_numeric(text, bytes, i, pos, &mut tokens, errors);
            }
            _ => {
                let end = scan_word(text, i);
                tokens.push(Token {
                    kind: TokenKind::Ident(text[i..end].to_string()),
                    pos,
                });
                i = end;
            }
        }
    }

    trace!(target: "script.lexer", line = line_no, tokens = tokens.len(), "lexed line");
    tokens
}

/// Lex a token starting with a digit: a multi-part timer, a unit-suffixed
/// resistance or distance, or a bare number. Returns the index just past the
/// consumed text.
fn lex_numeric(
    text: &str,
    bytes: &[u8],
    start: usize,
    pos: SourcePos,
    tokens: &mut TokenLine,
    errors: &mut Vec<ParseError>,
) -> usize {
    let (first, mut i) = scan_digits(bytes, start);
    let Some(first) = first else {
        errors.push(ParseError::new(
            ParseErrorKind::NumberOverflow,
            pos,
            &text[start..i],
        ));
        return i;
    };

    // Timer: `12:34`, `1:02:03`, `1:00:00:00`. The colon must be directly
    // adjacent and followed by a digit, so `(21-15-9)` and `5 Pullups` do
    // not enter this branch.
    if bytes.get(i) == Some(&b':') && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()) {
        let mut parts: SmallVec<[u32; 4]> = SmallVec::new();
        parts.push(first);
        while parts.len() < 4
            && bytes.get(i) == Some(&b':')
            && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit())
        {
            let (part, end) = scan_digits(bytes, i + 1);
            match part {
                Some(p) => {
                    parts.push(p);
                    i = end;
                }
                None => {
                    errors.push(ParseError::new(
                        ParseErrorKind::NumberOverflow,
                        pos,
                        &text[start..end],
                    ));
                    return end;
                }
            }
        }
        tokens.push(Token {
            kind: TokenKind::Timer(timer_ms(&parts)),
            pos,
        });
        return i;
    }

    // Unit suffix, optional whitespace between number and unit.
    let mut j = i;
    while bytes.get(j).is_some_and(|b| b.is_ascii_whitespace()) {
        j += 1;
    }
    if let Some((kind, end)) = match_unit(text, bytes, j, first) {
        tokens.push(Token { kind, pos });
        return end;
    }

    tokens.push(Token {
        kind: TokenKind::Number(first),
        pos,
    });
    i
}

/// Two-letter units first so `km` beats `m`; a unit only matches at a word
/// boundary (`5 minutes` stays Number + Ident).
fn match_unit(text: &str, bytes: &[u8], at: usize, amount: u32) -> Option<(TokenKind, usize)> {
    const UNITS: [(&str, UnitKind); 8] = [
        ("lb", UnitKind::Load(LoadUnit::Lb)),
        ("kg", UnitKind::Load(LoadUnit::Kg)),
        ("km", UnitKind::Distance(DistanceUnit::Km)),
        ("mi", UnitKind::Distance(DistanceUnit::Mi)),
        ("ft", UnitKind::Distance(DistanceUnit::Ft)),
        ("yd", UnitKind::Distance(DistanceUnit::Yd)),
        ("m", UnitKind::Distance(DistanceUnit::M)),
        ("#", UnitKind::Load(LoadUnit::Lb)),
    ];
    for (unit, kind) in UNITS {
        let end = at + unit.len();
        if text.get(at..end).is_some_and(|s| s.eq_ignore_ascii_case(unit))
            && !bytes.get(end).is_some_and(|b| b.is_ascii_alphanumeric())
        {
            let amount = f64::from(amount);
            let kind = match kind {
                UnitKind::Load(unit) => TokenKind::Resistance(LoadValue { amount, unit }),
                UnitKind::Distance(unit) => TokenKind::Distance(DistanceValue { amount, unit }),
            };
            return Some((kind, end));
        }
    }
    None
}

#[derive(Clone, Copy)]
enum UnitKind {
    Load(LoadUnit),
    Distance(DistanceUnit),
}

/// Right-aligned timer parts: `[s]`, `[m,s]`, `[h,m,s]`, `[d,h,m,s]`.
fn timer_ms(parts: &[u32]) -> u64 {
    let mut padded = [0u64; 4];
    let offset = 4 - parts.len();
    for (slot, part) in padded[offset..].iter_mut().zip(parts) {
        *slot = u64::from(*part);
    }
    let [d, h, m, s] = padded;
    (((d * 24 + h) * 60 + m) * 60 + s) * 1_000
}

/// Scan an ASCII digit run; `None` value on u32 overflow (end still
/// reported so the caller can skip the bad span).
fn scan_digits(bytes: &[u8], start: usize) -> (Option<u32>, usize) {
    let mut i = start;
    let mut value: Option<u32> = Some(0);
    while let Some(b) = bytes.get(i) {
        if !b.is_ascii_digit() {
            break;
        }
        value = value
            .and_then(|v| v.checked_mul(10))
            .and_then(|v| v.checked_add(u32::from(b - b'0')));
        i += 1;
    }
    (value, i)
}

/// Identifier run: everything up to whitespace or a structural character.
/// Interior `-` and `+` stay inside the word (`Push-ups`).
fn scan_word(text: &str, start: usize) -> usize {
    for (offset, c) in text[start..].char_indices() {
        if c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']') {
            return start + offset;
        }
    }
    text.len()
}

/// True when the byte at `at` begins a word character (letters continue an
/// adjacent `-`/`+` into an identifier rather than a lap operator).
fn starts_word(bytes: &[u8], at: usize) -> bool {
    bytes.get(at).is_some_and(|b| b.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lex(text: &str) -> Vec<TokenKind> {
        let mut errors = Vec::new();
        let tokens = lex_line(text, 0, &mut errors);
        assert!(errors.is_empty(), "unexpected lex errors: {errors:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_timer_forms() {
        assert_eq!(lex(":30"), vec![TokenKind::Timer(30_000)]);
        assert_eq!(lex("10:00"), vec![TokenKind::Timer(600_000)]);
        assert_eq!(lex("1:01:01"), vec![TokenKind::Timer(3_661_000)]);
        assert_eq!(lex("1:00:00:00"), vec![TokenKind::Timer(86_400_000)]);
    }

    #[test]
    fn lexes_resistance_and_distance() {
        assert_eq!(
            lex("95lb"),
            vec![TokenKind::Resistance(LoadValue {
                amount: 95.0,
                unit: LoadUnit::Lb,
            })]
        );
        assert_eq!(
            lex("50 kg"),
            vec![TokenKind::Resistance(LoadValue {
                amount: 50.0,
                unit: LoadUnit::Kg,
            })]
        );
        assert_eq!(
            lex("135#"),
            vec![TokenKind::Resistance(LoadValue {
                amount: 135.0,
                unit: LoadUnit::Lb,
            })]
        );
        assert_eq!(
            lex("400m"),
            vec![TokenKind::Distance(DistanceValue {
                amount: 400.0,
                unit: DistanceUnit::M,
            })]
        );
        assert_eq!(
            lex("5km"),
            vec![TokenKind::Distance(DistanceValue {
                amount: 5.0,
                unit: DistanceUnit::Km,
            })]
        );
    }

    #[test]
    fn unit_requires_word_boundary() {
        assert_eq!(
            lex("5 minutes"),
            vec![TokenKind::Number(5), TokenKind::Ident("minutes".into())]
        );
        assert_eq!(
            lex("3 meters"),
            vec![TokenKind::Number(3), TokenKind::Ident("meters".into())]
        );
    }

    #[test]
    fn lexes_rep_scheme_parens() {
        assert_eq!(
            lex("(21-15-9)"),
            vec![
                TokenKind::GroupOpen,
                TokenKind::Number(21),
                TokenKind::Minus,
                TokenKind::Number(15),
                TokenKind::Minus,
                TokenKind::Number(9),
                TokenKind::GroupClose,
            ]
        );
    }

    #[test]
    fn lexes_lap_operators_and_efforts() {
        assert_eq!(
            lex("+ 10 Pullups"),
            vec![
                TokenKind::Plus,
                TokenKind::Number(10),
                TokenKind::Ident("Pullups".into()),
            ]
        );
        assert_eq!(
            lex("- 400m Run"),
            vec![
                TokenKind::Minus,
                TokenKind::Distance(DistanceValue {
                    amount: 400.0,
                    unit: DistanceUnit::M,
                }),
                TokenKind::Ident("Run".into()),
            ]
        );
    }

    #[test]
    fn interior_hyphen_stays_in_word() {
        assert_eq!(lex("Push-ups"), vec![TokenKind::Ident("Push-ups".into())]);
    }

    #[test]
    fn ampersand_is_a_word() {
        assert_eq!(
            lex("30 Clean & Jerk 135lb"),
            vec![
                TokenKind::Number(30),
                TokenKind::Ident("Clean".into()),
                TokenKind::Ident("&".into()),
                TokenKind::Ident("Jerk".into()),
                TokenKind::Resistance(LoadValue {
                    amount: 135.0,
                    unit: LoadUnit::Lb,
                }),
            ]
        );
    }

    #[test]
    fn lexes_action_brackets() {
        assert_eq!(
            lex("[:Rest]"),
            vec![
                TokenKind::ActionOpen,
                TokenKind::Ident("Rest".into()),
                TokenKind::ActionClose,
            ]
        );
    }

    #[test]
    fn number_overflow_is_reported_not_fatal() {
        let mut errors = Vec::new();
        let tokens = lex_line("99999999999 Pullups", 3, &mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].pos.line, 3);
        // The effort after the bad span still lexes.
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Ident("Pullups".into()));
    }
}
