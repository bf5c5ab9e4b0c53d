//! Canonical re-serialization of a statement tree back to workout text.
//!
//! The canonical form is stable under a parse/serialize cycle: rendering a
//! parsed script and parsing the result yields an equal statement tree.
//! Only parser-origin fragments are rendered (runtime and hinted fragments
//! are derived data and would double up on re-parse).

use crate::ast::{CodeStatement, Script, StatementId};
use core_fragment::{FragmentOrigin, FragmentValue};

/// Render the whole script in source order.
pub fn to_canonical_text(script: &Script) -> String {
    let mut out = String::new();
    for root in script.roots() {
        render_subtree(script, *root, &mut out);
    }
    // Statements join with single newlines; no trailing newline after the
    // last line so the output is itself canonical input.
    while out.ends_with('\n') {
        out.pop();
    }
    out
}

fn render_subtree(script: &Script, id: StatementId, out: &mut String) {
    let Some(statement) = script.get_by_id(id) else {
        return;
    };
    out.push_str(&render_statement(statement));
    out.push('\n');
    for group in &statement.children {
        for child in group {
            render_subtree(script, *child, out);
        }
    }
}

/// Render one statement line, indentation included.
pub fn render_statement(statement: &CodeStatement) -> String {
    let mut pieces: Vec<String> = Vec::new();
    let mut after_emom = false;
    for fragment in &statement.fragments {
        if fragment.origin != FragmentOrigin::Parser {
            continue;
        }
        match &fragment.value {
            // `EMOM 10` keeps its bare round count; every other rounds
            // fragment renders parenthesized.
            FragmentValue::Rounds(spec) if after_emom && spec.rep_scheme.is_none() => {
                pieces.push(spec.total.to_string());
            }
            FragmentValue::Lap { .. } => {
                let text = fragment.display();
                if !text.is_empty() {
                    pieces.push(text);
                }
            }
            _ => pieces.push(fragment.display()),
        }
        after_emom = matches!(&fragment.value, FragmentValue::Action { name } if name == "EMOM");
    }
    let indent = " ".repeat(statement.indent as usize);
    format!("{indent}{}", pieces.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use pretty_assertions::assert_eq;

    #[track_caller]
    fn assert_round_trips(text: &str) {
        let script = parse(text);
        assert!(script.errors().is_empty(), "parse errors for {text:?}");
        let rendered = to_canonical_text(&script);
        assert_eq!(rendered, text, "canonical text should reproduce input");
        let reparsed = parse(&rendered);
        assert_eq!(
            reparsed.statements(),
            script.statements(),
            "round-tripped AST should be identical"
        );
    }

    #[test]
    fn canonical_examples_round_trip() {
        assert_round_trips("10:00 AMRAP\n  5 Pullups\n  10 Pushups");
        assert_round_trips("(3)\n  21 Thrusters 95lb\n  15 Pullups");
        assert_round_trips("(21-15-9)\n  Thrusters 95lb\n  Pullups");
        assert_round_trips("EMOM 10\n  5 Burpees");
        assert_round_trips("(3)\n  + 10 Pullups\n  + 20 Pushups\n  - 400m Run");
        assert_round_trips("30 Clean & Jerk 135lb");
    }

    #[test]
    fn seconds_only_timer_normalizes_then_stabilizes() {
        let script = parse(":30 Plank");
        let rendered = to_canonical_text(&script);
        assert_eq!(rendered, "0:30 Plank");
        // A second cycle is a fixed point.
        assert_eq!(to_canonical_text(&parse(&rendered)), rendered);
    }

    #[test]
    fn hinted_fragments_are_not_rendered() {
        let script = parse("EMOM 10\n  5 Burpees");
        let rendered = to_canonical_text(&script);
        assert!(!rendered.contains("1:00"), "hinted interval timer must not leak");
        assert_eq!(rendered, "EMOM 10\n  5 Burpees");
    }
}
