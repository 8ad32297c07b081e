//! Normalization integration tests.
//!
//! These tests verify the normal-form engine through the public API:
//! 1. Build graphs with the relevant rules disabled
//! 2. Enable the rules and run `normalize` + `prune`
//! 3. Verify the rewritten topology and the graph invariants

use ridge::prelude::*;
use ridge::rvsdg::simple;

fn store_op(nstates: usize) -> Operation {
    Operation::Memory(MemoryOp::Store {
        stored: Type::Bit(32),
        nstates,
        alignment: 4,
    })
}

fn load_op(nstates: usize) -> Operation {
    Operation::Memory(MemoryOp::Load {
        loaded: Type::Bit(32),
        nstates,
        alignment: 4,
    })
}

fn producing_node(origin: Origin) -> NodeId {
    match origin {
        Origin::Output(node, _) => node,
        Origin::Argument(..) => panic!("expected a node output, found an argument"),
    }
}

fn is_store(graph: &Graph, node: NodeId) -> bool {
    matches!(
        graph.node(node).operation(),
        Some(Operation::Memory(MemoryOp::Store { .. }))
    )
}

#[test]
fn test_store_mux_reduction() -> Result<()> {
    let mut graph = Graph::new();
    let root = graph.root();
    graph.normal_forms_mut().set_mutable(OpClass::Any, false);

    let a = graph.add_import(Type::Pointer, "a");
    let v = graph.add_import(Type::Bit(32), "v");
    let s1 = graph.add_import(Type::MemState, "s1");
    let s2 = graph.add_import(Type::MemState, "s2");
    let s3 = graph.add_import(Type::MemState, "s3");

    let mux = simple::create(
        &mut graph,
        root,
        Operation::Memory(MemoryOp::StateMerge { noperands: 3 }),
        &[s1, s2, s3],
    )?[0];
    let state = simple::create(&mut graph, root, store_op(1), &[a, v, mux])?[0];
    graph.add_export(state, "s")?;

    graph.normal_forms_mut().set_mutable(OpClass::Any, true);
    graph
        .normal_forms_mut()
        .set_flag(OpClass::Store, NormFlags::STORE_MUX, true);
    graph.normalize();
    graph.prune();
    graph.verify()?;

    // The exported state is now a merge of three stores.
    let exported = graph.region(root).results()[0].origin();
    let merge = producing_node(exported);
    assert!(matches!(
        graph.node(merge).operation(),
        Some(Operation::Memory(MemoryOp::StateMerge { noperands: 3 }))
    ));
    for index in 0..3 {
        let input = graph.input_origin(merge, index);
        assert!(is_store(&graph, producing_node(input)));
    }
    Ok(())
}

#[test]
fn test_multiple_origin_reduction() -> Result<()> {
    let mut graph = Graph::new();
    let root = graph.root();
    graph.normal_forms_mut().set_mutable(OpClass::Any, false);

    let a = graph.add_import(Type::Pointer, "a");
    let v = graph.add_import(Type::Bit(32), "v");
    let s = graph.add_import(Type::MemState, "s");

    let states = simple::create(&mut graph, root, store_op(4), &[a, v, s, s, s, s])?;
    graph.add_export(states[0], "s")?;

    graph.normal_forms_mut().set_mutable(OpClass::Any, true);
    graph
        .normal_forms_mut()
        .set_flag(OpClass::Store, NormFlags::MULTIPLE_ORIGIN, true);
    graph.normalize();
    graph.prune();
    graph.verify()?;

    // One store remains, with the address, the value, and a single state input.
    let exported = graph.region(root).results()[0].origin();
    let store = producing_node(exported);
    assert!(is_store(&graph, store));
    assert_eq!(graph.node(store).ninputs(), 3);
    Ok(())
}

#[test]
fn test_store_store_reduction() -> Result<()> {
    let mut graph = Graph::new();
    let root = graph.root();

    let a = graph.add_import(Type::Pointer, "address");
    let v1 = graph.add_import(Type::Bit(32), "value1");
    let v2 = graph.add_import(Type::Bit(32), "value2");
    let s = graph.add_import(Type::MemState, "state");

    let first = simple::create(&mut graph, root, store_op(1), &[a, v1, s])?[0];
    let second = simple::create(&mut graph, root, store_op(1), &[a, v2, first])?[0];
    let exported = graph.add_export(second, "state")?;

    graph
        .normal_forms_mut()
        .set_flag(OpClass::Store, NormFlags::STORE_STORE, true);
    graph.normalize();
    graph.prune();
    graph.verify()?;

    // The earlier store is dead: one store remains, writing the second value
    // into the imported state directly.
    assert_eq!(graph.region(root).nnodes(), 1);
    let survivor = producing_node(graph.region(root).results()[exported].origin());
    assert!(is_store(&graph, survivor));
    assert_eq!(graph.input_origin(survivor, 1), v2);
    assert_eq!(graph.input_origin(survivor, 2), s);
    Ok(())
}

#[test]
fn test_single_store_load_body() -> Result<()> {
    // λ f(p, s): v = load(p, s); store(p, v, s'); the body must stay put under
    // the load/store rules: the load reads the incoming state, and the final
    // state holds exactly one store whose value is the loaded one.
    let mut graph = Graph::new();
    let root = graph.root();

    let ty = FunctionType::new(
        vec![Type::Pointer, Type::MemState],
        vec![Type::Bit(32), Type::MemState],
    );
    let lambda = LambdaNode::create(&mut graph, root, ty, "f", Linkage::External)?;
    let body = lambda.subregion(&graph);
    let p = lambda.argument(&graph, 0);
    let s = lambda.argument(&graph, 1);

    let loaded = simple::create(&mut graph, body, load_op(1), &[p, s])?;
    let stored = simple::create(&mut graph, body, store_op(1), &[p, loaded[0], loaded[1]])?[0];
    let output = lambda.finalize(&mut graph, &[loaded[0], stored])?;
    graph.add_export(output, "f")?;

    graph
        .normal_forms_mut()
        .set_flag(OpClass::Store, NormFlags::STORE_STORE, true);
    graph
        .normal_forms_mut()
        .set_flag(OpClass::Load, NormFlags::LOAD_STORE, true);
    graph.normalize();
    graph.prune();
    graph.verify()?;

    // The value result is still the load; the state result is one store whose
    // value input is the load's result.
    let value = graph.region(body).results()[0].origin();
    let load = producing_node(value);
    assert!(matches!(
        graph.node(load).operation(),
        Some(Operation::Memory(MemoryOp::Load { .. }))
    ));
    let state = graph.region(body).results()[1].origin();
    let store = producing_node(state);
    assert!(is_store(&graph, store));
    assert_eq!(graph.input_origin(store, 1), value);

    let stores = graph
        .region(body)
        .nodes()
        .iter()
        .filter(|&&node| is_store(&graph, node))
        .count();
    assert_eq!(stores, 1);
    Ok(())
}

#[test]
fn test_load_after_store_forwarding() -> Result<()> {
    let mut graph = Graph::new();
    let root = graph.root();
    graph.normal_forms_mut().set_mutable(OpClass::Any, false);

    let p = graph.add_import(Type::Pointer, "p");
    let v = graph.add_import(Type::Bit(32), "v");
    let s = graph.add_import(Type::MemState, "s");

    let stored = simple::create(&mut graph, root, store_op(1), &[p, v, s])?[0];
    let loaded = simple::create(&mut graph, root, load_op(1), &[p, stored])?;
    graph.add_export(loaded[0], "value")?;
    graph.add_export(loaded[1], "state")?;

    graph.normal_forms_mut().set_mutable(OpClass::Any, true);
    graph
        .normal_forms_mut()
        .set_flag(OpClass::Load, NormFlags::LOAD_STORE, true);
    graph.normalize();
    graph.prune();
    graph.verify()?;

    // The load disappeared: its value is the stored value, its state the
    // store's output.
    let value = graph.region(root).results()[0].origin();
    assert_eq!(value, v);
    let state = graph.region(root).results()[1].origin();
    assert!(is_store(&graph, producing_node(state)));
    Ok(())
}

#[test]
fn test_store_alloca_reduction() -> Result<()> {
    let mut graph = Graph::new();
    let root = graph.root();
    graph.normal_forms_mut().set_mutable(OpClass::Any, false);

    let size = graph.add_import(Type::Bit(32), "size");
    let value = graph.add_import(Type::Bit(32), "value");
    let s = graph.add_import(Type::MemState, "s");

    let alloca_op = Operation::Memory(MemoryOp::Alloca {
        value_type: Type::Bit(32),
        alignment: 4,
    });
    let a1 = simple::create(&mut graph, root, alloca_op.clone(), &[size])?;
    let a2 = simple::create(&mut graph, root, alloca_op, &[size])?;

    let first = simple::create(
        &mut graph,
        root,
        store_op(3),
        &[a1[0], value, a1[1], a2[1], s],
    )?;
    let second = simple::create(
        &mut graph,
        root,
        store_op(3),
        &[a2[0], value, first[0], first[1], first[2]],
    )?;
    graph.add_export(second[0], "s1")?;
    graph.add_export(second[1], "s2")?;
    graph.add_export(second[2], "s3")?;

    graph.normal_forms_mut().set_mutable(OpClass::Any, true);
    graph
        .normal_forms_mut()
        .set_flag(OpClass::Store, NormFlags::STORE_ALLOCA, true);
    graph.normalize();
    graph.prune();
    graph.verify()?;

    // The unrelated state bypasses both stores: one export is the import again.
    let has_import = (0..graph.region(root).nresults())
        .any(|index| graph.region(root).results()[index].origin() == s);
    assert!(has_import);
    Ok(())
}

#[test]
fn test_alloca_state_is_local_to_function() -> Result<()> {
    // λ g(v, s): the only use of an alloca is a store into it; with the alloca
    // rule the external memory state at the exit equals the state at the entry.
    let mut graph = Graph::new();
    let root = graph.root();

    let ty = FunctionType::new(vec![Type::Bit(32), Type::MemState], vec![Type::MemState]);
    let lambda = LambdaNode::create(&mut graph, root, ty, "g", Linkage::External)?;
    let body = lambda.subregion(&graph);
    let v = lambda.argument(&graph, 0);
    let s = lambda.argument(&graph, 1);

    let size = simple::bit_constant(&mut graph, body, 32, 4)?;
    let slot = simple::create(
        &mut graph,
        body,
        Operation::Memory(MemoryOp::Alloca {
            value_type: Type::Bit(32),
            alignment: 4,
        }),
        &[size],
    )?;
    let states = simple::create(&mut graph, body, store_op(2), &[slot[0], v, slot[1], s])?;
    let output = lambda.finalize(&mut graph, &[states[1]])?;
    graph.add_export(output, "g")?;

    graph
        .normal_forms_mut()
        .set_flag(OpClass::Store, NormFlags::STORE_ALLOCA, true);
    graph.normalize();
    graph.prune();
    graph.verify()?;

    assert_eq!(graph.region(body).results()[0].origin(), s);
    Ok(())
}

#[test]
fn test_cse_merges_equivalent_nodes() -> Result<()> {
    let mut graph = Graph::new();
    let root = graph.root();
    graph.normal_forms_mut().set_mutable(OpClass::Any, false);

    let x = graph.add_import(Type::Bit(32), "x");
    let y = graph.add_import(Type::Bit(32), "y");
    let first = simple::bit_binary(&mut graph, root, BitBinaryKind::Add, 32, x, y)?;
    let second = simple::bit_binary(&mut graph, root, BitBinaryKind::Add, 32, x, y)?;
    assert_ne!(first, second);
    graph.add_export(first, "a")?;
    graph.add_export(second, "b")?;

    graph.normal_forms_mut().set_mutable(OpClass::Any, true);
    graph.normalize();
    graph.prune();
    graph.verify()?;

    let a = graph.region(root).results()[0].origin();
    let b = graph.region(root).results()[1].origin();
    assert_eq!(a, b);
    assert_eq!(graph.region(root).nnodes(), 1);
    Ok(())
}

#[test]
fn test_normalize_reaches_fixed_point() -> Result<()> {
    let mut graph = Graph::new();
    let root = graph.root();
    graph.normal_forms_mut().set_mutable(OpClass::Any, false);

    let x = graph.add_import(Type::Bit(32), "x");
    let zero = simple::bit_constant(&mut graph, root, 32, 0)?;
    let one = simple::bit_constant(&mut graph, root, 32, 1)?;
    let sum = simple::bit_binary(&mut graph, root, BitBinaryKind::Add, 32, x, zero)?;
    let product = simple::bit_binary(&mut graph, root, BitBinaryKind::Mul, 32, sum, one)?;
    graph.add_export(product, "r")?;

    graph.normal_forms_mut().set_mutable(OpClass::Any, true);
    let rewrites = graph.normalize();
    assert!(rewrites > 0);
    // Quiescent: a second run changes nothing.
    assert_eq!(graph.normalize(), 0);

    let pruned = graph.prune();
    assert!(pruned > 0);
    // Pruning is idempotent and leaves live nodes alone.
    assert_eq!(graph.prune(), 0);
    graph.verify()?;

    assert_eq!(graph.region(root).results()[0].origin(), x);
    Ok(())
}

#[test]
fn test_prune_keeps_nodes_with_users() -> Result<()> {
    let mut graph = Graph::new();
    let root = graph.root();
    let x = graph.add_import(Type::Bit(32), "x");
    let sum = simple::bit_binary(&mut graph, root, BitBinaryKind::Add, 32, x, x)?;
    graph.add_export(sum, "sum")?;

    assert_eq!(graph.prune(), 0);
    assert_eq!(graph.region(root).nnodes(), 1);

    // Removing a node with users is refused outright.
    let node = producing_node(sum);
    assert!(matches!(graph.remove_node(node), Err(Error::NodeInUse)));
    Ok(())
}
