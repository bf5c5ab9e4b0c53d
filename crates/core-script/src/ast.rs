//! Statement tree produced by the visitor and the indexed `Script` that owns
//! it.

use core_fragment::{Fragment, FragmentType, FragmentValue, LapKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ParseError;

/// Stable statement identifier, derived from the 0-based source line.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct StatementId(pub u32);

impl StatementId {
    pub fn line(self) -> u32 {
        self.0
    }
}

/// One workout line lowered to typed fragments.
///
/// `children` holds *groups* of sibling ids: each inner vector is one child
/// group which a loop advances over as a unit. Grouping follows the lap
/// operators (consecutive `+` statements pack together, everything else is
/// its own group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeStatement {
    pub id: StatementId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<StatementId>,
    pub children: Vec<Vec<StatementId>>,
    pub fragments: Vec<Fragment>,
    pub is_leaf: bool,
    /// Leading whitespace width of the source line; parent linkage derives
    /// from it and the canonical serializer reproduces nesting with it.
    pub indent: u32,
}

impl CodeStatement {
    /// First fragment of `ty` regardless of origin tier.
    pub fn fragment(&self, ty: FragmentType) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.fragment_type() == ty)
    }

    pub fn fragments_of(&self, ty: FragmentType) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter().filter(move |f| f.fragment_type() == ty)
    }

    pub fn has(&self, ty: FragmentType) -> bool {
        self.fragment(ty).is_some()
    }

    /// Lap kind for grouping purposes; statements without an explicit
    /// operator repeat as their own group.
    pub fn lap_kind(&self) -> LapKind {
        match self.fragment(FragmentType::Lap).map(|f| &f.value) {
            Some(FragmentValue::Lap { kind }) => *kind,
            _ => LapKind::Repeat,
        }
    }

    /// Action keyword carried by this statement, if any (`AMRAP`, `EMOM`,
    /// bracketed actions).
    pub fn action_name(&self) -> Option<&str> {
        self.fragments.iter().find_map(|f| match &f.value {
            FragmentValue::Action { name } => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Immutable indexed statement collection plus the non-fatal errors
/// accumulated while producing it. Partial trees are normal: a script with
/// errors still exposes every statement that parsed.
///
/// Serialize-only: consumers persist statement lists (`HistoryEntry`), not
/// whole scripts, so the id index never needs to survive a round trip.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Script {
    statements: Vec<CodeStatement>,
    roots: Vec<StatementId>,
    errors: Vec<ParseError>,
    #[serde(skip)]
    index: HashMap<StatementId, usize>,
}

impl Script {
    pub fn new(statements: Vec<CodeStatement>, roots: Vec<StatementId>, errors: Vec<ParseError>) -> Self {
        let index = statements
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id, i))
            .collect();
        Self {
            statements,
            roots,
            errors,
            index,
        }
    }

    pub fn get_by_id(&self, id: StatementId) -> Option<&CodeStatement> {
        self.index.get(&id).map(|&i| &self.statements[i])
    }

    /// Resolve many ids at once, silently skipping ids that do not exist
    /// (dangling ids can occur in a partial tree after parse errors).
    pub fn get_by_ids(&self, ids: &[StatementId]) -> Vec<&CodeStatement> {
        ids.iter().filter_map(|&id| self.get_by_id(id)).collect()
    }

    pub fn statements(&self) -> &[CodeStatement] {
        &self.statements
    }

    /// Top-level statement ids in source order.
    pub fn roots(&self) -> &[StatementId] {
        &self.roots
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Root statements grouped by the same lap-adjacency rule used for
    /// statement children; this is what the root block loops over.
    pub fn root_groups(&self) -> Vec<Vec<StatementId>> {
        group_by_lap(&self.roots, |id| {
            self.get_by_id(id).map(|s| s.lap_kind()).unwrap_or(LapKind::Repeat)
        })
    }
}

/// Pack a sibling sequence into child groups: maximal runs of `compose`
/// statements share one group, every other statement stands alone.
///
/// `[-, +, +, repeat, +, -]` becomes `[[s0], [s1, s2], [s3], [s4], [s5]]`.
pub fn group_by_lap<F>(ids: &[StatementId], lap_of: F) -> Vec<Vec<StatementId>>
where
    F: Fn(StatementId) -> LapKind,
{
    let mut groups: Vec<Vec<StatementId>> = Vec::new();
    let mut prev_compose = false;
    for &id in ids {
        let compose = lap_of(id) == LapKind::Compose;
        if compose && prev_compose {
            groups
                .last_mut()
                .expect("a compose run always has an open group")
                .push(id);
        } else {
            groups.push(vec![id]);
        }
        prev_compose = compose;
    }
    groups
}
