//! Lowering from token lines to `CodeStatement`s.
//!
//! Two passes over the token lines:
//! 1. fragment lowering per line (this file's `lower_tokens`),
//! 2. parent linkage by indentation plus lap-adjacency child grouping.
//!
//! Failures never abort the walk; malformed spans report a `ParseError` and
//! the rest of the line still lowers.

use crate::ast::{CodeStatement, Script, StatementId, group_by_lap};
use crate::lexer::{Token, TokenKind, lex_line};
use crate::{ParseError, ParseErrorKind};
use core_fragment::{
    Fragment, FragmentOrigin, FragmentValue, LapKind, RoundsSpec, SourcePos,
};
use std::collections::HashMap;
use tracing::debug;

/// Keywords that lower to Action fragments instead of Effort. Matching is
/// case-insensitive; the canonical uppercase spelling is stored.
const ACTION_KEYWORDS: [&str; 4] = ["AMRAP", "EMOM", "TABATA", "REST"];

/// One minute, the implicit interval length behind `EMOM n`.
const EMOM_INTERVAL_MS: u64 = 60_000;

/// Parse complete workout text into a `Script`. Lexer and parser errors
/// accumulate on the script; a partial statement tree is always produced.
pub fn parse(text: &str) -> Script {
    let mut errors = Vec::new();
    let mut statements: Vec<CodeStatement> = Vec::new();
    let mut roots: Vec<StatementId> = Vec::new();
    // Stack of (indent, id) tracking the current ancestor chain.
    let mut ancestors: Vec<(u32, StatementId)> = Vec::new();
    let mut children: HashMap<StatementId, Vec<StatementId>> = HashMap::new();

    for (line_no, raw) in text.lines().enumerate() {
        let line_no = line_no as u32;
        if raw.trim().is_empty() {
            continue;
        }
        let indent = (raw.len() - raw.trim_start().len()) as u32;
        let tokens = lex_line(raw, line_no, &mut errors);
        let fragments = lower_tokens(&tokens, &mut errors);
        if fragments.is_empty() {
            // Nothing usable on the line; any problems are already in the
            // error list.
            continue;
        }

        let id = StatementId(line_no);
        while ancestors.last().is_some_and(|&(depth, _)| depth >= indent) {
            ancestors.pop();
        }
        let parent = ancestors.last().map(|&(_, pid)| pid);
        match parent {
            Some(pid) => children.entry(pid).or_default().push(id),
            None => roots.push(id),
        }
        ancestors.push((indent, id));

        statements.push(CodeStatement {
            id,
            parent,
            children: Vec::new(),
            fragments,
            is_leaf: true,
            indent,
        });
    }

    // Second pass: attach grouped children now that every statement exists.
    let laps: HashMap<StatementId, LapKind> =
        statements.iter().map(|s| (s.id, s.lap_kind())).collect();
    for statement in &mut statements {
        if let Some(kids) = children.remove(&statement.id) {
            statement.children = group_by_lap(&kids, |id| {
                laps.get(&id).copied().unwrap_or(LapKind::Repeat)
            });
            statement.is_leaf = statement.children.is_empty();
        }
    }

    debug!(
        target: "script.parser",
        statements = statements.len(),
        roots = roots.len(),
        errors = errors.len(),
        "parsed script"
    );
    Script::new(statements, roots, errors)
}

/// Lower one line of tokens into fragments, in source order.
fn lower_tokens(tokens: &[Token], errors: &mut Vec<ParseError>) -> Vec<Fragment> {
    let mut fragments: Vec<Fragment> = Vec::new();
    // Pending effort words awaiting a flush (non-ident token or line end).
    let mut effort: Option<(String, SourcePos)> = None;
    let mut i = 0usize;

    while i < tokens.len() {
        let token = &tokens[i];
        match &token.kind {
            TokenKind::Minus | TokenKind::Plus if i == 0 => {
                let kind = if matches!(token.kind, TokenKind::Minus) {
                    LapKind::Round
                } else {
                    LapKind::Compose
                };
                fragments.push(Fragment::parsed(FragmentValue::Lap { kind }, token.pos));
                i += 1;
            }
            TokenKind::Timer(ms) => {
                flush_effort(&mut effort, &mut fragments);
                fragments.push(Fragment::parsed(FragmentValue::Timer { ms: *ms }, token.pos));
                i += 1;
            }
            TokenKind::Resistance(load) => {
                flush_effort(&mut effort, &mut fragments);
                fragments.push(Fragment::parsed(
                    FragmentValue::Resistance(*load),
                    token.pos,
                ));
                i += 1;
            }
            TokenKind::Distance(distance) => {
                flush_effort(&mut effort, &mut fragments);
                fragments.push(Fragment::parsed(
                    FragmentValue::Distance(*distance),
                    token.pos,
                ));
                i += 1;
            }
            TokenKind::GroupOpen => {
                flush_effort(&mut effort, &mut fragments);
                i = lower_rounds(tokens, i, &mut fragments, errors);
            }
            TokenKind::ActionOpen => {
                flush_effort(&mut effort, &mut fragments);
                i = lower_bracket_action(tokens, i, &mut fragments, errors);
            }
            TokenKind::Number(n) => {
                flush_effort(&mut effort, &mut fragments);
                if last_action_is_emom(&fragments) {
                    // `EMOM 10`: ten rounds of an implicit one-minute
                    // interval. The count parses as rounds; the minute timer
                    // is a synthesized hint so interval compilation sees a
                    // target duration.
                    fragments.push(Fragment::parsed(
                        FragmentValue::Rounds(RoundsSpec::fixed(*n)),
                        token.pos,
                    ));
                    fragments.push(Fragment::with_origin(
                        FragmentValue::Timer {
                            ms: EMOM_INTERVAL_MS,
                        },
                        FragmentOrigin::Hinted,
                    ));
                } else {
                    fragments.push(Fragment::parsed(
                        FragmentValue::Rep { count: *n },
                        token.pos,
                    ));
                }
                i += 1;
            }
            TokenKind::Ident(word) => {
                if let Some(keyword) = ACTION_KEYWORDS
                    .iter()
                    .find(|k| word.eq_ignore_ascii_case(k))
                {
                    flush_effort(&mut effort, &mut fragments);
                    fragments.push(Fragment::parsed(
                        FragmentValue::Action {
                            name: (*keyword).to_string(),
                        },
                        token.pos,
                    ));
                } else {
                    match &mut effort {
                        Some((buffer, _)) => {
                            buffer.push(' ');
                            buffer.push_str(word);
                        }
                        None => effort = Some((word.clone(), token.pos)),
                    }
                }
                i += 1;
            }
            TokenKind::Minus | TokenKind::Plus => {
                // Lap operators are only meaningful as the line's first
                // token; anywhere else is stray punctuation.
                errors.push(ParseError::new(
                    ParseErrorKind::UnexpectedToken,
                    token.pos,
                    describe(&token.kind),
                ));
                i += 1;
            }
            TokenKind::GroupClose | TokenKind::ActionClose => {
                errors.push(ParseError::new(
                    ParseErrorKind::UnexpectedToken,
                    token.pos,
                    describe(&token.kind),
                ));
                i += 1;
            }
        }
    }

    flush_effort(&mut effort, &mut fragments);
    fragments
}

/// `( Number (Minus Number)* )` lowered to a Rounds fragment. Returns the
/// index just past the closing paren (or past the bad span on error).
fn lower_rounds(
    tokens: &[Token],
    open: usize,
    fragments: &mut Vec<Fragment>,
    errors: &mut Vec<ParseError>,
) -> usize {
    let pos = tokens[open].pos;
    let mut reps: Vec<u32> = Vec::new();
    let mut i = open + 1;
    loop {
        match tokens.get(i).map(|t| &t.kind) {
            Some(TokenKind::Number(n)) => {
                reps.push(*n);
                i += 1;
            }
            _ => {
                errors.push(ParseError::new(
                    ParseErrorKind::MalformedRounds,
                    pos,
                    "expected a round count",
                ));
                return skip_past_group_close(tokens, i);
            }
        }
        match tokens.get(i).map(|t| &t.kind) {
            Some(TokenKind::Minus) => i += 1,
            Some(TokenKind::GroupClose) => {
                i += 1;
                break;
            }
            Some(other) => {
                errors.push(ParseError::new(
                    ParseErrorKind::MalformedRounds,
                    pos,
                    describe(other),
                ));
                return skip_past_group_close(tokens, i);
            }
            None => {
                errors.push(ParseError::new(
                    ParseErrorKind::UnclosedGroup,
                    pos,
                    "missing `)`",
                ));
                break;
            }
        }
    }

    let spec = match reps.as_slice() {
        [total] => RoundsSpec::fixed(*total),
        _ => RoundsSpec::scheme(reps),
    };
    fragments.push(Fragment::parsed(FragmentValue::Rounds(spec), pos));
    i
}

/// `[: Ident* ]` lowered to an Action fragment.
fn lower_bracket_action(
    tokens: &[Token],
    open: usize,
    fragments: &mut Vec<Fragment>,
    errors: &mut Vec<ParseError>,
) -> usize {
    let pos = tokens[open].pos;
    let mut words: Vec<&str> = Vec::new();
    let mut i = open + 1;
    loop {
        match tokens.get(i).map(|t| &t.kind) {
            Some(TokenKind::Ident(word)) => {
                words.push(word);
                i += 1;
            }
            Some(TokenKind::ActionClose) => {
                i += 1;
                break;
            }
            Some(other) => {
                errors.push(ParseError::new(
                    ParseErrorKind::MalformedAction,
                    pos,
                    describe(other),
                ));
                i += 1;
            }
            None => {
                errors.push(ParseError::new(
                    ParseErrorKind::UnclosedAction,
                    pos,
                    "missing `]`",
                ));
                break;
            }
        }
    }

    if words.is_empty() {
        errors.push(ParseError::new(
            ParseErrorKind::MalformedAction,
            pos,
            "empty action",
        ));
    } else {
        fragments.push(Fragment::parsed(
            FragmentValue::Action {
                name: words.join(" "),
            },
            pos,
        ));
    }
    i
}

fn skip_past_group_close(tokens: &[Token], from: usize) -> usize {
    let mut i = from;
    while let Some(token) = tokens.get(i) {
        i += 1;
        if matches!(token.kind, TokenKind::GroupClose) {
            break;
        }
    }
    i
}

fn flush_effort(effort: &mut Option<(String, SourcePos)>, fragments: &mut Vec<Fragment>) {
    if let Some((name, pos)) = effort.take() {
        fragments.push(Fragment::parsed(FragmentValue::Effort { name }, pos));
    }
}

fn last_action_is_emom(fragments: &[Fragment]) -> bool {
    fragments.iter().rev().find_map(|f| match &f.value {
        FragmentValue::Action { name } => Some(name == "EMOM"),
        _ => None,
    }) == Some(true)
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Timer(_) => "timer".into(),
        TokenKind::Resistance(_) => "resistance".into(),
        TokenKind::Distance(_) => "distance".into(),
        TokenKind::GroupOpen => "`(`".into(),
        TokenKind::GroupClose => "`)`".into(),
        TokenKind::ActionOpen => "`[:`".into(),
        TokenKind::ActionClose => "`]`".into(),
        TokenKind::Minus => "`-`".into(),
        TokenKind::Plus => "`+`".into(),
        TokenKind::Number(n) => format!("number {n}"),
        TokenKind::Ident(word) => format!("`{word}`"),
    }
}
