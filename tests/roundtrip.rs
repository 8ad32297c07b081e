//! SSA ↔ RVSDG round-trip tests.
//!
//! These tests verify the bridges through the public API:
//! 1. Build an LLVM-like module (or a graph directly)
//! 2. Construct the RVSDG and verify its invariants
//! 3. Destructure back to CFG form and check the recovered structure

use ridge::prelude::*;
use ridge::rvsdg::simple;

fn bit32() -> Type {
    Type::Bit(32)
}

fn add_op() -> Operation {
    Operation::Bit(BitOp::Binary {
        kind: BitBinaryKind::Add,
        width: 32,
    })
}

fn compare_op(kind: BitCompareKind) -> Operation {
    Operation::Bit(BitOp::Compare { kind, width: 32 })
}

fn match_op(mapping: Vec<(u64, usize)>, default_alternative: usize) -> Operation {
    Operation::Control(ControlOp::Match {
        nbits: 1,
        mapping,
        default_alternative,
        nalternatives: 2,
    })
}

fn tac(op: Operation, operands: Vec<VarId>, results: Vec<VarId>) -> Tac {
    Tac {
        op,
        operands,
        results,
    }
}

#[test]
fn test_partial_gamma_structuring() -> Result<()> {
    // λ f(c, x) with γ[sub0: pass x through; sub1: testop(x)]. After
    // structuring, one branch edge goes straight to the join: the CFG is
    // structured but not proper structured.
    let mut graph = Graph::new();
    let root = graph.root();
    let ty = FunctionType::new(vec![Type::Bit(1), bit32()], vec![bit32()]);
    let lambda = LambdaNode::create(&mut graph, root, ty, "f", Linkage::External)?;
    let body = lambda.subregion(&graph);
    let c = lambda.argument(&graph, 0);
    let x = lambda.argument(&graph, 1);

    let predicate = simple::match_op(&mut graph, body, 1, vec![(0, 0)], 1, 2, c)?;
    let gamma = GammaNode::create(&mut graph, body, predicate, 2)?;
    let entry = gamma.add_entry_var(&mut graph, x)?;
    let gamma_region_1 = gamma.subregion(&graph, 1);
    let tested = simple::bit_binary(
        &mut graph,
        gamma_region_1,
        BitBinaryKind::Mul,
        32,
        entry.arguments[1],
        entry.arguments[1],
    )?;
    let exit = gamma.add_exit_var(&mut graph, &[entry.arguments[0], tested])?;
    let output = lambda.finalize(&mut graph, &[exit.output])?;
    graph.add_export(output, "f")?;
    graph.verify()?;

    let module = RvsdgModule::with_graph("partial-gamma", graph);
    let lowered = destruct(&module)?;
    let function = lowered.function("f").expect("function f");
    let cfg = function.cfg.as_ref().expect("definition");

    assert!(is_structured(cfg));
    assert!(!is_proper_structured(cfg));

    // Three blocks: the branch, the one non-empty arm, the join; the join
    // recovers x from the empty arm and testop(x) from the other.
    assert_eq!(cfg.nblocks(), 3);
    let join = cfg
        .block_ids()
        .find(|id| !cfg.block(*id).phis.is_empty())
        .expect("join block");
    assert_eq!(cfg.block(join).phis.len(), 1);
    assert_eq!(cfg.block(join).phis[0].operands.len(), 2);
    Ok(())
}

fn build_diamond() -> IrModule {
    let mut cfg = Cfg::new(&[bit32(), bit32()]);
    let a = cfg.params()[0];
    let b = cfg.params()[1];
    let c = cfg.add_var(Type::Bit(1));
    let selector = cfg.add_var(Type::Control(2));
    let t1 = cfg.add_var(bit32());
    let t2 = cfg.add_var(bit32());
    let r = cfg.add_var(bit32());

    let then_block = cfg.add_block();
    let else_block = cfg.add_block();
    let join = cfg.add_block();
    let entry = cfg.entry();

    cfg.block_mut(entry)
        .tacs
        .push(tac(compare_op(BitCompareKind::Ult), vec![a, b], vec![c]));
    cfg.block_mut(entry)
        .tacs
        .push(tac(match_op(vec![(0, 0)], 1), vec![c], vec![selector]));
    cfg.block_mut(entry).terminator = Some(Terminator::Branch {
        operand: selector,
        targets: vec![then_block, else_block],
    });

    cfg.block_mut(then_block)
        .tacs
        .push(tac(add_op(), vec![a, a], vec![t1]));
    cfg.block_mut(then_block).terminator = Some(Terminator::Jump(join));
    cfg.block_mut(else_block)
        .tacs
        .push(tac(add_op(), vec![b, b], vec![t2]));
    cfg.block_mut(else_block).terminator = Some(Terminator::Jump(join));

    cfg.block_mut(join).phis.push(PhiInstr {
        dest: r,
        operands: vec![(then_block, t1), (else_block, t2)],
    });
    cfg.block_mut(join).terminator = Some(Terminator::Return(vec![r]));

    let mut module = IrModule::new("diamond");
    module.functions.push(IrFunction {
        name: "select_sum".into(),
        linkage: Linkage::External,
        ty: FunctionType::new(vec![bit32(), bit32()], vec![bit32()]),
        cfg: Some(cfg),
    });
    module
}

#[test]
fn test_diamond_roundtrip() -> Result<()> {
    let module = build_diamond();
    assert!(is_proper_structured(module.functions[0].cfg.as_ref().expect("body")));

    let constructed = construct(&module)?;
    constructed.graph().verify()?;

    // One γ in the function body, no θ.
    let root = constructed.graph().root();
    let lambda = constructed
        .graph()
        .region(root)
        .nodes()
        .iter()
        .copied()
        .find(|&node| matches!(constructed.graph().node(node).kind(), NodeKind::Lambda(_)))
        .expect("lambda");
    let body = constructed.graph().node(lambda).subregions()[0];
    let gammas = constructed
        .graph()
        .region(body)
        .nodes()
        .iter()
        .filter(|&&node| matches!(constructed.graph().node(node).kind(), NodeKind::Gamma))
        .count();
    assert_eq!(gammas, 1);

    let lowered = destruct(&constructed)?;
    let cfg = lowered.function("select_sum").expect("fn").cfg.as_ref().expect("body");
    assert!(is_structured(cfg));
    assert!(is_proper_structured(cfg));

    // The join recovers exactly one phi with one operand per arm.
    let join = cfg
        .block_ids()
        .find(|id| !cfg.block(*id).phis.is_empty())
        .expect("join block");
    assert_eq!(cfg.block(join).phis[0].operands.len(), 2);

    // The lowered module converts again without errors.
    let reconstructed = construct(&lowered)?;
    reconstructed.graph().verify()?;
    Ok(())
}

fn build_counting_loop() -> IrModule {
    let mut cfg = Cfg::new(&[bit32()]);
    let limit = cfg.params()[0];
    let i0 = cfg.add_var(bit32());
    let one = cfg.add_var(bit32());
    let i1 = cfg.add_var(bit32());
    let i2 = cfg.add_var(bit32());
    let c = cfg.add_var(Type::Bit(1));
    let selector = cfg.add_var(Type::Control(2));

    let header = cfg.add_block();
    let exit = cfg.add_block();
    let entry = cfg.entry();

    cfg.block_mut(entry).tacs.push(tac(
        Operation::Bit(BitOp::Constant {
            width: 32,
            value: 0,
        }),
        vec![],
        vec![i0],
    ));
    cfg.block_mut(entry).tacs.push(tac(
        Operation::Bit(BitOp::Constant {
            width: 32,
            value: 1,
        }),
        vec![],
        vec![one],
    ));
    cfg.block_mut(entry).terminator = Some(Terminator::Jump(header));

    cfg.block_mut(header).phis.push(PhiInstr {
        dest: i1,
        operands: vec![(entry, i0), (header, i2)],
    });
    cfg.block_mut(header)
        .tacs
        .push(tac(add_op(), vec![i1, one], vec![i2]));
    cfg.block_mut(header)
        .tacs
        .push(tac(compare_op(BitCompareKind::Ult), vec![i2, limit], vec![c]));
    cfg.block_mut(header)
        .tacs
        .push(tac(match_op(vec![(1, 1)], 0), vec![c], vec![selector]));
    cfg.block_mut(header).terminator = Some(Terminator::Branch {
        operand: selector,
        targets: vec![exit, header],
    });

    cfg.block_mut(exit).terminator = Some(Terminator::Return(vec![i2]));

    let mut module = IrModule::new("loop");
    module.functions.push(IrFunction {
        name: "count_to".into(),
        linkage: Linkage::External,
        ty: FunctionType::new(vec![bit32()], vec![bit32()]),
        cfg: Some(cfg),
    });
    module
}

#[test]
fn test_loop_roundtrip() -> Result<()> {
    let module = build_counting_loop();
    let constructed = construct(&module)?;
    constructed.graph().verify()?;

    // The tail-controlled loop became a θ node.
    let graph = constructed.graph();
    let root = graph.root();
    let lambda = graph
        .region(root)
        .nodes()
        .iter()
        .copied()
        .find(|&node| matches!(graph.node(node).kind(), NodeKind::Lambda(_)))
        .expect("lambda");
    let body = graph.node(lambda).subregions()[0];
    let theta = graph
        .region(body)
        .nodes()
        .iter()
        .copied()
        .find(|&node| matches!(graph.node(node).kind(), NodeKind::Theta))
        .expect("theta");
    let theta = ThetaNode::from_node(graph, theta).expect("theta handle");
    // The counter phi plus the two live-in values (the constant one, the limit).
    assert_eq!(theta.nloop_vars(graph), 3);

    let lowered = destruct(&constructed)?;
    let cfg = lowered.function("count_to").expect("fn").cfg.as_ref().expect("body");
    assert!(is_structured(cfg));

    // The loop header carries one phi per loop variable.
    let header = cfg
        .block_ids()
        .find(|id| !cfg.block(*id).phis.is_empty())
        .expect("header block");
    assert_eq!(cfg.block(header).phis.len(), 3);
    Ok(())
}

#[test]
fn test_recursive_function_builds_phi() -> Result<()> {
    let f_ty = FunctionType::new(vec![bit32()], vec![bit32()]);
    let mut cfg = Cfg::new(&[bit32()]);
    let n = cfg.params()[0];
    let z = cfg.add_var(bit32());
    let one = cfg.add_var(bit32());
    let c = cfg.add_var(Type::Bit(1));
    let selector = cfg.add_var(Type::Control(2));
    let fref = cfg.add_var(Type::Function(Box::new(f_ty.clone())));
    let nm1 = cfg.add_var(bit32());
    let r = cfg.add_var(bit32());
    let res = cfg.add_var(bit32());

    let rec = cfg.add_block();
    let join = cfg.add_block();
    let entry = cfg.entry();

    cfg.block_mut(entry).tacs.push(tac(
        Operation::Bit(BitOp::Constant {
            width: 32,
            value: 0,
        }),
        vec![],
        vec![z],
    ));
    cfg.block_mut(entry)
        .tacs
        .push(tac(compare_op(BitCompareKind::Eq), vec![n, z], vec![c]));
    // n != 0 selects the recursive arm.
    cfg.block_mut(entry)
        .tacs
        .push(tac(match_op(vec![(0, 0)], 1), vec![c], vec![selector]));
    cfg.block_mut(entry).terminator = Some(Terminator::Branch {
        operand: selector,
        targets: vec![rec, join],
    });

    cfg.block_mut(rec).tacs.push(tac(
        Operation::Misc(MiscOp::SymbolRef {
            name: "countdown".into(),
            ty: Type::Function(Box::new(f_ty.clone())),
        }),
        vec![],
        vec![fref],
    ));
    cfg.block_mut(rec).tacs.push(tac(
        Operation::Bit(BitOp::Constant {
            width: 32,
            value: 1,
        }),
        vec![],
        vec![one],
    ));
    cfg.block_mut(rec).tacs.push(tac(
        Operation::Bit(BitOp::Binary {
            kind: BitBinaryKind::Sub,
            width: 32,
        }),
        vec![n, one],
        vec![nm1],
    ));
    cfg.block_mut(rec)
        .tacs
        .push(tac(Operation::Call { ty: f_ty.clone() }, vec![fref, nm1], vec![r]));
    cfg.block_mut(rec).terminator = Some(Terminator::Jump(join));

    cfg.block_mut(join).phis.push(PhiInstr {
        dest: res,
        operands: vec![(rec, r), (entry, z)],
    });
    cfg.block_mut(join).terminator = Some(Terminator::Return(vec![res]));

    let mut module = IrModule::new("recursion");
    module.functions.push(IrFunction {
        name: "countdown".into(),
        linkage: Linkage::External,
        ty: f_ty,
        cfg: Some(cfg),
    });

    let constructed = construct(&module)?;
    constructed.graph().verify()?;

    // Self recursion is wrapped in a φ node with one recursion variable.
    let graph = constructed.graph();
    let root = graph.root();
    let phi = graph
        .region(root)
        .nodes()
        .iter()
        .copied()
        .find(|&node| matches!(graph.node(node).kind(), NodeKind::Phi))
        .expect("phi node");
    let phi = PhiNode::from_node(graph, phi).expect("phi handle");
    assert_eq!(phi.nrecvars(graph), 1);

    // Destructuring recovers the symbol reference.
    let lowered = destruct(&constructed)?;
    let cfg = lowered.function("countdown").expect("fn").cfg.as_ref().expect("body");
    let has_self_ref = cfg.block_ids().any(|id| {
        cfg.block(id).tacs.iter().any(|tac| {
            matches!(
                &tac.op,
                Operation::Misc(MiscOp::SymbolRef { name, .. }) if name == "countdown"
            )
        })
    });
    assert!(has_self_ref);
    Ok(())
}

#[test]
fn test_global_roundtrip() -> Result<()> {
    let mut initializer = Cfg::new(&[]);
    let value = initializer.add_var(bit32());
    let entry = initializer.entry();
    initializer.block_mut(entry).tacs.push(tac(
        Operation::Bit(BitOp::Constant {
            width: 32,
            value: 42,
        }),
        vec![],
        vec![value],
    ));
    initializer.block_mut(entry).terminator = Some(Terminator::Return(vec![value]));

    let mut module = IrModule::new("globals");
    module.globals.push(IrGlobal {
        name: "answer".into(),
        linkage: Linkage::External,
        value_type: bit32(),
        constant: true,
        initializer: Some(initializer),
    });

    let constructed = construct(&module)?;
    constructed.graph().verify()?;
    let graph = constructed.graph();
    let root = graph.root();
    assert!(graph
        .region(root)
        .nodes()
        .iter()
        .any(|&node| matches!(graph.node(node).kind(), NodeKind::Delta(_))));

    let lowered = destruct(&constructed)?;
    let global = lowered.global("answer").expect("global");
    assert_eq!(global.value_type, bit32());
    assert!(global.constant);
    let body = global.initializer.as_ref().expect("initializer");
    assert!(body.block(body.entry()).tacs.iter().any(|tac| matches!(
        tac.op,
        Operation::Bit(BitOp::Constant { value: 42, .. })
    )));
    Ok(())
}

#[test]
fn test_external_call_roundtrip() -> Result<()> {
    let ext_ty = FunctionType::new(vec![bit32()], vec![bit32()]);
    let mut cfg = Cfg::new(&[bit32()]);
    let x = cfg.params()[0];
    let fref = cfg.add_var(Type::Function(Box::new(ext_ty.clone())));
    let r = cfg.add_var(bit32());
    let entry = cfg.entry();
    cfg.block_mut(entry).tacs.push(tac(
        Operation::Misc(MiscOp::SymbolRef {
            name: "ext".into(),
            ty: Type::Function(Box::new(ext_ty.clone())),
        }),
        vec![],
        vec![fref],
    ));
    cfg.block_mut(entry)
        .tacs
        .push(tac(Operation::Call { ty: ext_ty.clone() }, vec![fref, x], vec![r]));
    cfg.block_mut(entry).terminator = Some(Terminator::Return(vec![r]));

    let mut module = IrModule::new("external");
    module.functions.push(IrFunction {
        name: "ext".into(),
        linkage: Linkage::External,
        ty: ext_ty.clone(),
        cfg: None,
    });
    module.functions.push(IrFunction {
        name: "caller".into(),
        linkage: Linkage::External,
        ty: FunctionType::new(vec![bit32()], vec![bit32()]),
        cfg: Some(cfg),
    });

    let constructed = construct(&module)?;
    constructed.graph().verify()?;
    assert_eq!(constructed.graph().imports(), &["ext".to_string()]);

    let lowered = destruct(&constructed)?;
    let declaration = lowered.function("ext").expect("declaration");
    assert!(declaration.cfg.is_none());
    assert_eq!(declaration.ty, ext_ty);
    Ok(())
}

#[test]
fn test_view_reflects_structural_equivalence() -> Result<()> {
    let build = || -> Result<Graph> {
        let mut graph = Graph::new();
        let root = graph.root();
        let c = graph.add_import(Type::Bit(1), "c");
        let x = graph.add_import(bit32(), "x");
        let predicate = simple::match_op(&mut graph, root, 1, vec![(0, 0)], 1, 2, c)?;
        let gamma = GammaNode::create(&mut graph, root, predicate, 2)?;
        let entry = gamma.add_entry_var(&mut graph, x)?;
        let gamma_region_1 = gamma.subregion(&graph, 1);
        let doubled = simple::bit_binary(
            &mut graph,
            gamma_region_1,
            BitBinaryKind::Add,
            32,
            entry.arguments[1],
            entry.arguments[1],
        )?;
        let exit = gamma.add_exit_var(&mut graph, &[entry.arguments[0], doubled])?;
        graph.add_export(exit.output, "r")?;
        Ok(graph)
    };
    assert_eq!(view(&build()?), view(&build()?));
    Ok(())
}
