//! Lowers a protocol's AST body into a [`super::Cfg`] (§4.1).
//!
//! Translation works bottom-up over [`Block`]s: each [`Interaction`] becomes
//! one or more nodes and reports back an `(entry, exit)` pair — `exit` is
//! `None` when every path out of the interaction already resolved (it ended
//! in a `continue` or the protocol terminates there), which is what lets the
//! caller skip creating a dangling `sequence` edge.
//!
//! `continue` itself does not own a node in the formal model (§3: "a
//! `continue` edge" is just a retagged `sequence` edge into the recursive
//! node). But when a `continue` is the *first* interaction of a branch,
//! fork arm, or recursion body there is no predecessor node whose outgoing
//! edge can be retagged — the branch/fork edge landing there would have to
//! carry two tags at once. We resolve this by giving `continue` its own
//! zero-payload `continue-marker` node in that position only; every other
//! position reuses the predecessor's edge exactly as the construction table
//! describes. The marker is invisible to every role during projection (it
//! behaves like an uninvolved action), so it changes nothing observable.

use super::{ActionPayload, Cfg, CfgEdge, CfgNode, DmstAction};
use crate::ast::{Block, Interaction, ProtocolDecl};
use crate::error::InvalidAst;
use crate::registry::ProtocolRegistry;
use mpst_fsm::{Fsm, NodeIndex};

/// Adds a node to the graph, logging its construction at `trace` level
/// (§SPEC_FULL "ambient: logging" — per-node construction).
fn add_traced_state(graph: &mut Fsm<String, CfgNode, CfgEdge>, node: CfgNode) -> NodeIndex {
    tracing::trace!(%node, "cfg node constructed");
    graph.add_state(node)
}

/// A non-fatal note about the constructed graph (currently just unreachable
/// code after an unconditional `continue`, §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildWarning {
    UnreachableAfterContinue { loc: crate::ast::SourceLoc },
}

struct ScopeEntry {
    label: String,
    node: NodeIndex,
    fork_depth: Vec<u64>,
}

/// Builds the CFG for `decl`, consulting `registry` to validate `do`
/// references. Node ids are allocated from a counter scoped to this
/// builder instance (not reset between protocols), so that composing two
/// protocols' CFGs later — as the DMst 1-unfolding combinator `♢` does — can
/// never collide ids (§9, "Global state").
pub struct CfgBuilder {
    next_parallel_id: u64,
}

impl Default for CfgBuilder {
    fn default() -> Self {
        CfgBuilder { next_parallel_id: 0 }
    }
}

impl CfgBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(
        &mut self,
        decl: &ProtocolDecl,
        registry: &ProtocolRegistry,
    ) -> Result<(Cfg, Vec<BuildWarning>), InvalidAst> {
        let mut graph: Fsm<String, CfgNode, CfgEdge> = Fsm::new(decl.name.clone());
        let initial = add_traced_state(&mut graph, CfgNode::Initial);
        graph.set_initial(initial);

        let mut ctx = BuildCtx {
            graph: &mut graph,
            registry,
            warnings: Vec::new(),
            next_parallel_id: &mut self.next_parallel_id,
        };

        let mut scope = Vec::new();
        let (entry, exit) = ctx.build_block(&decl.body, &mut scope)?;

        match entry {
            Some(e) => {
                ctx.graph.add_transition(initial, e, CfgEdge::Sequence);
            }
            None => {
                // Empty protocol body (§8 boundary behavior): the initial
                // node is also the sole terminal node.
                ctx.graph.mark_terminal(initial);
            }
        }

        if let Some(e) = exit {
            let terminal = add_traced_state(ctx.graph, CfgNode::Terminal);
            ctx.graph.add_transition(e, terminal, CfgEdge::Sequence);
            ctx.graph.mark_terminal(terminal);
        }

        let warnings = ctx.warnings;
        Ok((
            Cfg { protocol_name: decl.name.clone(), roles: decl.roles.clone(), graph },
            warnings,
        ))
    }
}

struct BuildCtx<'a> {
    graph: &'a mut Fsm<String, CfgNode, CfgEdge>,
    registry: &'a ProtocolRegistry,
    warnings: Vec<BuildWarning>,
    next_parallel_id: &'a mut u64,
}

type BlockResult = (Option<NodeIndex>, Option<NodeIndex>);

impl<'a> BuildCtx<'a> {
    fn add_node(&mut self, node: CfgNode) -> NodeIndex {
        add_traced_state(self.graph, node)
    }

    fn build_block(&mut self, block: &Block, scope: &mut Vec<ScopeEntry>) -> Result<BlockResult, InvalidAst> {
        let mut entry: Option<NodeIndex> = None;
        let mut prev_exit: Option<NodeIndex> = None;
        let mut closed = false; // true once a `continue` has closed off this block

        for (idx, interaction) in block.iter().enumerate() {
            if closed {
                self.warnings.push(BuildWarning::UnreachableAfterContinue { loc: interaction.loc() });
                break;
            }
            let _ = idx;

            if let Interaction::Continue { label, loc } = interaction {
                let target = scope
                    .iter()
                    .rev()
                    .find(|e| &e.label == label)
                    .map(|e| e.node)
                    .ok_or_else(|| InvalidAst::UnboundContinueLabel { label: label.clone(), loc: *loc })?;

                match prev_exit {
                    Some(pe) => {
                        self.graph.add_transition(pe, target, CfgEdge::Continue);
                    }
                    None => {
                        let marker = self.add_node(CfgNode::ContinueMarker);
                        self.graph.add_transition(marker, target, CfgEdge::Continue);
                        entry = Some(marker);
                    }
                }
                prev_exit = None;
                closed = true;
                continue;
            }

            let (i_entry, i_exit) = self.build_interaction(interaction, scope)?;
            let i_entry = i_entry.expect("non-continue interactions always produce an entry node");

            if let Some(pe) = prev_exit {
                self.graph.add_transition(pe, i_entry, CfgEdge::Sequence);
            }
            if entry.is_none() {
                entry = Some(i_entry);
            }
            prev_exit = i_exit;
        }

        Ok((entry, prev_exit))
    }

    fn build_interaction(
        &mut self,
        interaction: &Interaction,
        scope: &mut Vec<ScopeEntry>,
    ) -> Result<BlockResult, InvalidAst> {
        match interaction {
            Interaction::Message { from, to, message, loc } => {
                let node = self.add_node(CfgNode::Action(ActionPayload::Message {
                    from: from.clone(),
                    to: to.clone(),
                    message: message.clone(),
                    loc: *loc,
                }));
                Ok((Some(node), Some(node)))
            }

            Interaction::NewRole { role, loc } => self.dmst_action(DmstAction::NewRole(role.clone()), *loc),
            Interaction::Creates { parent, role, loc } => {
                self.dmst_action(DmstAction::Creates { parent: parent.clone(), role: role.clone() }, *loc)
            }
            Interaction::Invites { from, to, loc } => {
                self.dmst_action(DmstAction::Invites { from: from.clone(), to: to.clone() }, *loc)
            }

            Interaction::Choice { at, branches, loc } => {
                if branches.is_empty() {
                    return Err(InvalidAst::EmptyChoice { loc: *loc });
                }
                let branch_node = self.add_node(CfgNode::Branch { decider: at.clone() });

                let mut merge_targets: Vec<NodeIndex> = Vec::new();
                for branch in branches {
                    if branch.is_empty() {
                        // Flagged by the verifier's "empty choice branch"
                        // check; structurally represented as an immediate
                        // branch-to-merge edge.
                        merge_targets.push(branch_node);
                        continue;
                    }
                    let (b_entry, b_exit) = self.build_block(branch, scope)?;
                    let b_entry = b_entry.expect("non-empty block has an entry");
                    self.graph.add_transition(branch_node, b_entry, CfgEdge::Branch);
                    if let Some(e) = b_exit {
                        merge_targets.push(e);
                    }
                }

                if merge_targets.is_empty() {
                    Ok((Some(branch_node), None))
                } else {
                    let merge = self.add_node(CfgNode::Merge);
                    for t in merge_targets {
                        let tag = if t == branch_node { CfgEdge::Branch } else { CfgEdge::Sequence };
                        self.graph.add_transition(t, merge, tag);
                    }
                    Ok((Some(branch_node), Some(merge)))
                }
            }

            Interaction::Parallel { branches, loc } => {
                if branches.is_empty() {
                    return Err(InvalidAst::EmptyParallel { loc: *loc });
                }
                let parallel_id = *self.next_parallel_id;
                *self.next_parallel_id += 1;

                let fork = self.add_node(CfgNode::Fork { parallel_id });
                let join = self.add_node(CfgNode::Join { parallel_id });

                for branch in branches {
                    if branch.is_empty() {
                        self.graph.add_transition(fork, join, CfgEdge::Fork);
                        continue;
                    }
                    let (b_entry, b_exit) = self.build_block(branch, scope)?;
                    let b_entry = b_entry.expect("non-empty block has an entry");
                    self.graph.add_transition(fork, b_entry, CfgEdge::Fork);
                    if let Some(e) = b_exit {
                        self.graph.add_transition(e, join, CfgEdge::Sequence);
                    }
                }

                Ok((Some(fork), Some(join)))
            }

            Interaction::Recursion { label, body, loc } => {
                let _ = loc;
                let rnode = self.add_node(CfgNode::Recursive { label: label.clone() });
                let fork_depth = current_fork_depth(scope);
                scope.push(ScopeEntry { label: label.clone(), node: rnode, fork_depth });

                let (b_entry, b_exit) = self.build_block(body, scope)?;
                scope.pop();

                if let Some(be) = b_entry {
                    self.graph.add_transition(rnode, be, CfgEdge::Sequence);
                }
                Ok((Some(rnode), b_exit))
            }

            Interaction::Do { protocol, args, loc } => {
                if !self.registry.contains(protocol) {
                    return Err(InvalidAst::UnknownProtocol { protocol: protocol.clone(), loc: *loc });
                }
                let node = self.add_node(CfgNode::Do { protocol: protocol.clone(), args: args.clone() });
                Ok((Some(node), Some(node)))
            }

            Interaction::UpdatableContinue { label, update, loc } => {
                let target = scope
                    .iter()
                    .rev()
                    .find(|e| &e.label == label)
                    .map(|e| e.node)
                    .ok_or_else(|| InvalidAst::UnboundContinueLabel { label: label.clone(), loc: *loc })?;

                let marker = self.add_node(CfgNode::Updatable { label: label.clone() });
                let (u_entry, u_exit) = self.build_block(update, scope)?;
                if let Some(ue) = u_entry {
                    self.graph.add_transition(marker, ue, CfgEdge::Sequence);
                }
                let tail = u_exit.unwrap_or(marker);
                self.graph.add_transition(tail, target, CfgEdge::Continue);
                Ok((Some(marker), None))
            }

            Interaction::Continue { .. } => unreachable!("handled in build_block"),
        }
    }

    fn dmst_action(&mut self, action: DmstAction, loc: crate::ast::SourceLoc) -> Result<BlockResult, InvalidAst> {
        let node = self.add_node(CfgNode::Action(ActionPayload::Dmst(action, loc)));
        Ok((Some(node), Some(node)))
    }
}

fn current_fork_depth(scope: &[ScopeEntry]) -> Vec<u64> {
    scope.last().map(|e| e.fork_depth.clone()).unwrap_or_default()
}

/// Convenience wrapper: build the CFG for `name` looked up in `registry`.
pub fn build(name: &str, registry: &ProtocolRegistry) -> Result<(Cfg, Vec<BuildWarning>), InvalidAst> {
    let decl = registry
        .get(name)
        .ok_or_else(|| InvalidAst::UnknownRootProtocol(name.to_string()))?;
    CfgBuilder::new().build(decl, registry)
}
