//! Normal forms of memory operations.
//!
//! Store rules, in the order they are tried:
//!
//! - `MULTIPLE_ORIGIN` — repeated state inputs collapse into one;
//! - `STORE_MUX` — a store on a merged state becomes one store per merged
//!   predecessor, re-merged afterwards;
//! - `STORE_STORE` — a store whose states come straight from a store to the same
//!   address absorbs it (the earlier value is dead);
//! - `STORE_ALLOCA` — a store to an alloca keeps only the alloca's own state;
//!   unrelated states bypass the node untouched.
//!
//! Load rules mirror the store rules; `LOAD_STORE` additionally forwards the
//! stored value to the load's users.

use crate::normalize::NormFlags;
use crate::rvsdg::graph::Graph;
use crate::rvsdg::node::{NodeId, Origin};
use crate::rvsdg::operation::{MemoryOp, OpClass, Operation};
use crate::rvsdg::simple;
use crate::Result;

/// Returns the node behind `origin` if it computes the given memory operation
/// shape.
fn producer(graph: &Graph, origin: Origin) -> Option<(NodeId, usize, &Operation)> {
    let Origin::Output(node, index) = origin else {
        return None;
    };
    graph
        .node(node)
        .operation()
        .map(|op| (node, index, op))
}

fn state_merge_operands(graph: &Graph, origin: Origin) -> Option<Vec<Origin>> {
    let (node, index, op) = producer(graph, origin)?;
    if index != 0 {
        return None;
    }
    let Operation::Memory(MemoryOp::StateMerge { .. }) = op else {
        return None;
    };
    Some(
        graph
            .node(node)
            .inputs()
            .iter()
            .map(|input| input.origin())
            .collect(),
    )
}

fn alloca_behind(graph: &Graph, origin: Origin) -> Option<NodeId> {
    let (node, index, op) = producer(graph, origin)?;
    (index == 0 && matches!(op, Operation::Memory(MemoryOp::Alloca { .. }))).then_some(node)
}

pub(crate) fn normalize_store(graph: &mut Graph, node: NodeId) -> bool {
    if graph.node(node).is_dead() {
        return false;
    }
    let Some(Operation::Memory(MemoryOp::Store {
        stored,
        nstates,
        alignment,
    })) = graph.node(node).operation().cloned()
    else {
        return false;
    };
    let address = graph.input_origin(node, 0);
    let value = graph.input_origin(node, 1);
    let states: Vec<Origin> = (0..nstates)
        .map(|i| graph.input_origin(node, 2 + i))
        .collect();
    let forms = graph.normal_forms();
    let multiple_origin = forms.enabled(OpClass::Store, NormFlags::MULTIPLE_ORIGIN);
    let store_mux = forms.enabled(OpClass::Store, NormFlags::STORE_MUX);
    let store_store = forms.enabled(OpClass::Store, NormFlags::STORE_STORE);
    let store_alloca = forms.enabled(OpClass::Store, NormFlags::STORE_ALLOCA);

    if multiple_origin {
        if let Some(fired) =
            dedup_states(graph, node, &states, 0, |unique| {
                Operation::Memory(MemoryOp::Store {
                    stored: stored.clone(),
                    nstates: unique,
                    alignment,
                })
            }, &[address, value])
        {
            return fired;
        }
    }

    if store_mux && nstates == 1 {
        if let Some(merged) = state_merge_operands(graph, states[0]) {
            let rule = |graph: &mut Graph| -> Result<bool> {
                let region = graph.node(node).region();
                let mut stores = Vec::with_capacity(merged.len());
                for state in &merged {
                    let store = simple::create_node(
                        graph,
                        region,
                        Operation::Memory(MemoryOp::Store {
                            stored: stored.clone(),
                            nstates: 1,
                            alignment,
                        }),
                        &[address, value, *state],
                    )?;
                    stores.push(Origin::Output(store, 0));
                }
                let merge = simple::create_node(
                    graph,
                    region,
                    Operation::Memory(MemoryOp::StateMerge {
                        noperands: stores.len(),
                    }),
                    &stores,
                )?;
                graph.divert_users(Origin::Output(node, 0), Origin::Output(merge, 0))?;
                log::debug!("store {node} pulled out of a merged state");
                Ok(true)
            };
            return rule(graph).unwrap_or(false);
        }
    }

    if store_store {
        if let Some(prior) = absorbable_prior_store(graph, node, address, &stored, &states) {
            let rule = |graph: &mut Graph| -> Result<bool> {
                let region = graph.node(node).region();
                let prior_states: Vec<Origin> = states
                    .iter()
                    .map(|state| match state {
                        Origin::Output(_, index) => graph.input_origin(prior, 2 + index),
                        Origin::Argument(..) => *state,
                    })
                    .collect();
                let mut operands = vec![address, value];
                operands.extend(prior_states);
                let replacement = simple::create_node(
                    graph,
                    region,
                    Operation::Memory(MemoryOp::Store {
                        stored: stored.clone(),
                        nstates,
                        alignment,
                    }),
                    &operands,
                )?;
                for index in 0..nstates {
                    graph.divert_users(
                        Origin::Output(node, index),
                        Origin::Output(replacement, index),
                    )?;
                }
                log::debug!("store {node} killed prior store {prior}");
                Ok(true)
            };
            return rule(graph).unwrap_or(false);
        }
    }

    if store_alloca {
        if let Some(alloca) = alloca_behind(graph, address) {
            let alloca_state = Origin::Output(alloca, 1);
            let own: Vec<usize> = (0..nstates).filter(|i| states[*i] == alloca_state).collect();
            let other: Vec<usize> = (0..nstates).filter(|i| states[*i] != alloca_state).collect();
            if !own.is_empty() && !other.is_empty() {
                let rule = |graph: &mut Graph| -> Result<bool> {
                    let region = graph.node(node).region();
                    let mut operands = vec![address, value];
                    operands.extend(own.iter().map(|&i| states[i]));
                    let replacement = simple::create_node(
                        graph,
                        region,
                        Operation::Memory(MemoryOp::Store {
                            stored: stored.clone(),
                            nstates: own.len(),
                            alignment,
                        }),
                        &operands,
                    )?;
                    for (new_index, &old_index) in own.iter().enumerate() {
                        graph.divert_users(
                            Origin::Output(node, old_index),
                            Origin::Output(replacement, new_index),
                        )?;
                    }
                    for &old_index in &other {
                        graph.divert_users(Origin::Output(node, old_index), states[old_index])?;
                    }
                    log::debug!("store {node} localized to its alloca");
                    Ok(true)
                };
                return rule(graph).unwrap_or(false);
            }
        }
    }

    false
}

pub(crate) fn normalize_load(graph: &mut Graph, node: NodeId) -> bool {
    if graph.node(node).is_dead() {
        return false;
    }
    let Some(Operation::Memory(MemoryOp::Load {
        loaded,
        nstates,
        alignment,
    })) = graph.node(node).operation().cloned()
    else {
        return false;
    };
    let address = graph.input_origin(node, 0);
    let states: Vec<Origin> = (0..nstates)
        .map(|i| graph.input_origin(node, 1 + i))
        .collect();
    let forms = graph.normal_forms();
    let multiple_origin = forms.enabled(OpClass::Load, NormFlags::MULTIPLE_ORIGIN);
    let load_mux = forms.enabled(OpClass::Load, NormFlags::LOAD_MUX);
    let load_store = forms.enabled(OpClass::Load, NormFlags::LOAD_STORE);
    let load_alloca = forms.enabled(OpClass::Load, NormFlags::LOAD_ALLOCA);

    if multiple_origin {
        if let Some(fired) = dedup_states(graph, node, &states, 1, |unique| {
            Operation::Memory(MemoryOp::Load {
                loaded: loaded.clone(),
                nstates: unique,
                alignment,
            })
        }, &[address])
        {
            return fired;
        }
    }

    if load_mux && nstates == 1 {
        if let Some(merged) = state_merge_operands(graph, states[0]) {
            let rule = |graph: &mut Graph| -> Result<bool> {
                let region = graph.node(node).region();
                let mut operands = vec![address];
                operands.extend(merged.iter().copied());
                let replacement = simple::create_node(
                    graph,
                    region,
                    Operation::Memory(MemoryOp::Load {
                        loaded: loaded.clone(),
                        nstates: merged.len(),
                        alignment,
                    }),
                    &operands,
                )?;
                let state_outputs: Vec<Origin> = (0..merged.len())
                    .map(|i| Origin::Output(replacement, 1 + i))
                    .collect();
                let merge = simple::create_node(
                    graph,
                    region,
                    Operation::Memory(MemoryOp::StateMerge {
                        noperands: state_outputs.len(),
                    }),
                    &state_outputs,
                )?;
                graph.divert_users(Origin::Output(node, 0), Origin::Output(replacement, 0))?;
                graph.divert_users(Origin::Output(node, 1), Origin::Output(merge, 0))?;
                Ok(true)
            };
            return rule(graph).unwrap_or(false);
        }
    }

    if load_store {
        if let Some(prior) = forwarding_store(graph, address, &loaded, &states) {
            let rule = |graph: &mut Graph| -> Result<bool> {
                let value = graph.input_origin(prior, 1);
                graph.divert_users(Origin::Output(node, 0), value)?;
                for (index, state) in states.iter().enumerate() {
                    graph.divert_users(Origin::Output(node, 1 + index), *state)?;
                }
                log::debug!("load {node} forwarded from store {prior}");
                Ok(true)
            };
            return rule(graph).unwrap_or(false);
        }
    }

    if load_alloca {
        if let Some(alloca) = alloca_behind(graph, address) {
            let alloca_state = Origin::Output(alloca, 1);
            let own: Vec<usize> = (0..nstates).filter(|i| states[*i] == alloca_state).collect();
            let other: Vec<usize> = (0..nstates).filter(|i| states[*i] != alloca_state).collect();
            if !own.is_empty() && !other.is_empty() {
                let rule = |graph: &mut Graph| -> Result<bool> {
                    let region = graph.node(node).region();
                    let mut operands = vec![address];
                    operands.extend(own.iter().map(|&i| states[i]));
                    let replacement = simple::create_node(
                        graph,
                        region,
                        Operation::Memory(MemoryOp::Load {
                            loaded: loaded.clone(),
                            nstates: own.len(),
                            alignment,
                        }),
                        &operands,
                    )?;
                    graph.divert_users(Origin::Output(node, 0), Origin::Output(replacement, 0))?;
                    for (new_index, &old_index) in own.iter().enumerate() {
                        graph.divert_users(
                            Origin::Output(node, 1 + old_index),
                            Origin::Output(replacement, 1 + new_index),
                        )?;
                    }
                    for &old_index in &other {
                        graph
                            .divert_users(Origin::Output(node, 1 + old_index), states[old_index])?;
                    }
                    Ok(true)
                };
                return rule(graph).unwrap_or(false);
            }
        }
    }

    false
}

/// Shared `MULTIPLE_ORIGIN` rule: collapses duplicate state inputs.
///
/// `output_offset` is where the state outputs start: 0 for stores, 1 for loads
/// (output 0 of a load is the value, which is diverted one-to-one).
fn dedup_states(
    graph: &mut Graph,
    node: NodeId,
    states: &[Origin],
    output_offset: usize,
    make_op: impl Fn(usize) -> Operation,
    leading_operands: &[Origin],
) -> Option<bool> {
    let mut unique: Vec<Origin> = Vec::new();
    let mut mapping: Vec<usize> = Vec::with_capacity(states.len());
    for state in states {
        match unique.iter().position(|u| u == state) {
            Some(index) => mapping.push(index),
            None => {
                mapping.push(unique.len());
                unique.push(*state);
            }
        }
    }
    if unique.len() == states.len() {
        return None;
    }
    let rule = |graph: &mut Graph| -> Result<bool> {
        let region = graph.node(node).region();
        let mut operands = leading_operands.to_vec();
        operands.extend(unique.iter().copied());
        let replacement = simple::create_node(graph, region, make_op(unique.len()), &operands)?;
        if output_offset == 1 {
            graph.divert_users(Origin::Output(node, 0), Origin::Output(replacement, 0))?;
        }
        for (old_index, new_index) in mapping.iter().enumerate() {
            graph.divert_users(
                Origin::Output(node, output_offset + old_index),
                Origin::Output(replacement, output_offset + new_index),
            )?;
        }
        log::debug!("{node} collapsed duplicate state inputs");
        Ok(true)
    };
    Some(rule(graph).unwrap_or(false))
}

/// Finds a store that this store may absorb: every state input of `node` comes
/// from `prior`, the addresses agree, and nothing else observes `prior`.
fn absorbable_prior_store(
    graph: &Graph,
    node: NodeId,
    address: Origin,
    stored: &crate::types::Type,
    states: &[Origin],
) -> Option<NodeId> {
    let mut prior: Option<NodeId> = None;
    for state in states {
        let (candidate, _, op) = producer(graph, *state)?;
        let Operation::Memory(MemoryOp::Store {
            stored: prior_stored,
            ..
        }) = op
        else {
            return None;
        };
        if prior_stored != stored || graph.input_origin(candidate, 0) != address {
            return None;
        }
        if prior.is_some_and(|p| p != candidate) {
            return None;
        }
        prior = Some(candidate);
    }
    let prior = prior?;
    // The earlier store dies with this rewrite, so it must have no other observer.
    for index in 0..graph.node(prior).noutputs() {
        for user in graph.users(Origin::Output(prior, index)) {
            match user {
                crate::rvsdg::node::User::Input(consumer, _) if *consumer == node => {}
                _ => return None,
            }
        }
    }
    Some(prior)
}

/// Finds a store this load can forward from: same address, same value type, and
/// every state input of the load produced by it.
fn forwarding_store(
    graph: &Graph,
    address: Origin,
    loaded: &crate::types::Type,
    states: &[Origin],
) -> Option<NodeId> {
    let mut prior: Option<NodeId> = None;
    for state in states {
        let (candidate, _, op) = producer(graph, *state)?;
        let Operation::Memory(MemoryOp::Store { stored, .. }) = op else {
            return None;
        };
        if stored != loaded || graph.input_origin(candidate, 0) != address {
            return None;
        }
        if prior.is_some_and(|p| p != candidate) {
            return None;
        }
        prior = Some(candidate);
    }
    prior
}
