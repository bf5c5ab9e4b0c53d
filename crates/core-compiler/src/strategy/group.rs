//! Plain containers: a heading statement with children, or a composed
//! (`+`-packed) multi-statement child group. One pass over each child
//! group, then done.

use super::{BlockParts, Strategy, begin_block, display, label_of};
use core_behaviors::{LoopCoordinator, LoopKind, RoundCompletion, SegmentOutput};
use core_fragment::FragmentType;
use core_runtime::{
    Behavior, Block, CompilationContext, CompileError, ControlButtons, MemoryKind, TimerRole,
    Visibility, VmCore,
};
use core_script::CodeStatement;

pub struct GroupStrategy;

impl Strategy for GroupStrategy {
    fn name(&self) -> &'static str {
        "group"
    }

    /// A composed multi-statement group, or a single statement that has
    /// children but no timing or round shape of its own.
    fn matches(&self, statements: &[&CodeStatement]) -> bool {
        if statements.len() > 1 {
            return true;
        }
        let Some(statement) = statements.first() else {
            return false;
        };
        !statement.children.is_empty()
            && !statement.has(FragmentType::Timer)
            && !statement.has(FragmentType::Rounds)
    }

    fn compile(
        &self,
        statements: &[&CodeStatement],
        vm: &mut VmCore,
        context: &CompilationContext,
    ) -> Result<Block, CompileError> {
        let mut parts: BlockParts = begin_block("group", statements, vm, context);
        let index = parts.context.allocate(
            &mut vm.memory,
            MemoryKind::ChildIndex,
            0u64,
            Visibility::Public,
        );

        // A composed group runs each of its statements once, in order; a
        // heading runs its child groups once.
        let child_groups: Vec<Vec<core_script::StatementId>> = if statements.len() > 1 {
            statements.iter().map(|s| vec![s.id]).collect()
        } else {
            statements[0].children.clone()
        };
        let groups = child_groups.len() as u32;

        let behaviors: Vec<Box<dyn Behavior>> = vec![
            Box::new(RoundCompletion::new(index, parts.completion, groups, 1)),
            Box::new(LoopCoordinator::new(
                LoopKind::Fixed { total_rounds: 1 },
                child_groups,
                index,
                parts.completion,
            )),
            Box::new(SegmentOutput::container()),
        ];

        display(
            &mut parts,
            vm,
            label_of(statements),
            None,
            TimerRole::Round,
            None,
            None,
            None,
        );
        super::controls(&mut parts, vm, ControlButtons::NEXT);

        let source_ids = statements.iter().map(|s| s.id).collect();
        Ok(Block::new(
            parts.context,
            source_ids,
            "Group",
            label_of(statements),
            parts.completion,
            behaviors,
        )
        .as_container())
    }
}
