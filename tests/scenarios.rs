use vsched::ir::{
    BasicBlock, BlockId, DepEdge, DepInfo, DetailLatencyInfo, FuKind,
    FuncUnitId, GraphBuilder, InstPtr, OpRef, OpTable, Operation, Printer,
    ValueClass,
};
use vsched::opt::passes::Strategy;
use vsched::utils::SchedOptions;
use vsched::{RegionScheduler, schedule_block, schedule_graph};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn mult(num: u16) -> FuncUnitId {
    FuncUnitId::new(FuKind::Mult, num)
}

#[test]
fn producer_consumer_and_dangling_op() {
    init();
    let b0 = BlockId(0);
    let mut ops = OpTable::new();
    let op1 = ops.push(Operation::control("mul", b0, mult(0)).with_steps(2));
    let op2 = ops.push(Operation::control("store", b0, mult(1)).with_steps(1));
    let op3 = ops.push(Operation::datapath("add", b0, FuncUnitId::TRIVIAL));
    let mut info = DetailLatencyInfo::from_ops(&ops);
    info.add_dep(op1, DepInfo::live_in());
    info.add_dep(op2, DepInfo::value(op1, 2));
    info.add_dep(op3, DepInfo::live_in());

    let block = BasicBlock::new(b0, vec![op1, op2, op3]);
    let opts = SchedOptions::default();
    let (graph, schedule) =
        schedule_block(&ops, &info, &block, 1, &opts).unwrap();

    let (s1, s2) = (schedule.slot(op1).unwrap(), schedule.slot(op2).unwrap());
    assert!(s1 < s2);
    assert!(s2 - s1 >= 2);
    assert_eq!(graph.unit(graph.entry_root()).slot(), Some(1));

    let u3 = graph.lookup_op(op3).unwrap();
    assert!(graph.unit(u3).is_dangling());
    assert_eq!(schedule.slot(op3), graph.end_slot(b0));
    assert_eq!(schedule.slot(op3), Some(4));

    let dump = Printer::graph_to_string(&graph, &ops);
    assert_eq!(dump.lines().count(), graph.num_units());
    assert!(dump.contains("add trivial @4 <Dangling>"));
}

/// a -> b (3 cycles), b -> a in the next iteration (2 cycles).
fn recurrence_block(
    ops: &mut OpTable,
    info: &mut DetailLatencyInfo,
    block: BlockId,
) -> Vec<OpRef> {
    let a =
        ops.push(Operation::control("load", block, mult(0)).with_steps(1));
    let b = ops.push(Operation::control("mul", block, mult(1)).with_steps(1));
    let br = ops.push(Operation::branch(block, block));
    info.set_steps(a, 1);
    info.set_steps(b, 1);
    info.set_steps(br, 0);
    info.add_dep(a, DepInfo::live_in());
    info.add_dep(a, DepInfo::loop_carried(b, 2, 1));
    info.add_dep(b, DepInfo::value(a, 3));
    info.add_dep(br, DepInfo::value(b, 1));
    vec![a, b, br]
}

#[test]
fn recurrence_bounds_initiation_interval() {
    init();
    let b0 = BlockId(0);
    let mut ops = OpTable::new();
    let mut info = DetailLatencyInfo::default();
    let block_ops = recurrence_block(&mut ops, &mut info, b0);
    let (a, b, br) = (block_ops[0], block_ops[1], block_ops[2]);
    let block = BasicBlock::new(b0, block_ops);

    let opts = SchedOptions::default();
    let (graph, schedule) =
        schedule_block(&ops, &info, &block, 1, &opts).unwrap();
    let ii = schedule.ii(b0).unwrap();
    assert!(ii >= 5);
    assert_eq!(ii, 5);
    assert!(ii <= graph.total_slot(b0).unwrap());
    assert_eq!(schedule.slot(br), Some(1 + ii));

    let sa = schedule.slot(a).unwrap() as i64;
    let sb = schedule.slot(b).unwrap() as i64;
    assert!(sb - sa >= 3);
    assert!(sa - sb >= 2 - ii as i64);
}

fn chained(steps: u32, write_until_finish: bool) -> ValueClass {
    let b0 = BlockId(0);
    let mut ops = OpTable::new();
    let mut producer =
        Operation::control("mul", b0, mult(0)).with_steps(steps);
    if write_until_finish {
        producer = producer.with_write_until_finish();
    }
    let p = ops.push(producer);
    let u = ops.push(Operation::datapath("add", b0, FuncUnitId::TRIVIAL));
    let bus = FuncUnitId::new(FuKind::MemoryBus, 0);
    let c = ops.push(Operation::control("store", b0, bus));
    let mut info = DetailLatencyInfo::from_ops(&ops);
    info.add_dep(p, DepInfo::live_in());
    info.add_dep(u, DepInfo::value(p, 1));
    info.add_dep(c, DepInfo::value(u, 0));

    let block = BasicBlock::new(b0, vec![p, u, c]);
    let opts = SchedOptions::default();
    let (_, schedule) =
        schedule_block(&ops, &info, &block, 1, &opts).unwrap();
    assert_eq!(schedule.slot(u), Some(2));
    schedule.value_class(u).unwrap()
}

#[test]
fn chaining_flips_to_register_when_producer_finishes_late() {
    init();
    assert_eq!(chained(1, false), ValueClass::Wire);
    assert_eq!(chained(2, false), ValueClass::Register);
    assert_eq!(chained(1, true), ValueClass::Register);
}

#[test]
fn rescheduling_is_idempotent() {
    init();
    let b0 = BlockId(0);
    let mut ops = OpTable::new();
    let x = ops.push(Operation::control("mul", b0, mult(0)).with_steps(2));
    let y = ops.push(Operation::control("mul", b0, mult(0)).with_steps(2));
    let s = ops.push(Operation::datapath("add", b0, FuncUnitId::TRIVIAL));
    let z = ops.push(Operation::control("store", b0, mult(1)).with_steps(1));
    let mut info = DetailLatencyInfo::from_ops(&ops);
    info.add_dep(x, DepInfo::live_in());
    info.add_dep(y, DepInfo::live_in());
    info.add_dep(s, DepInfo::value(x, 2));
    info.add_dep(s, DepInfo::value(y, 2));
    info.add_dep(z, DepInfo::value(s, 0));

    let opts = SchedOptions::default();
    let block = BasicBlock::new(b0, vec![x, y, s, z]);
    let (mut graph, first) =
        schedule_block(&ops, &info, &block, 1, &opts).unwrap();
    assert_ne!(first.slot(x), first.slot(y));

    let before = graph.units().map(|u| u.slot()).collect::<Vec<_>>();
    graph.reset_cp_schedule(0).unwrap();
    graph.reset_dp_schedule();
    Strategy::ControlPath.run(&mut graph, &opts).unwrap();
    Strategy::DataPath.run(&mut graph, &opts).unwrap();
    let after = graph.units().map(|u| u.slot()).collect::<Vec<_>>();
    assert_eq!(before, after);
}

#[test]
fn phi_is_copied_one_interval_later() {
    init();
    let b0 = BlockId(0);
    let mut ops = OpTable::new();
    let mut info = DetailLatencyInfo::default();
    let mut block_ops = recurrence_block(&mut ops, &mut info, b0);
    let phi = ops.push(
        Operation::control("phi", b0, FuncUnitId::TRIVIAL).with_phi(),
    );
    info.set_steps(phi, 0);
    info.add_dep(phi, DepInfo::live_in());
    block_ops.push(phi);
    let br = block_ops[2];
    let block = BasicBlock::new(b0, block_ops);

    let opts = SchedOptions::default();
    let (graph, schedule) =
        schedule_block(&ops, &info, &block, 1, &opts).unwrap();
    let ii = schedule.ii(b0).unwrap();
    assert_eq!(ii, 5);
    assert_eq!(schedule.slot(br), Some(1 + ii));
    // Issued with the entry, then moved to the next iteration.
    assert_eq!(schedule.slot(phi), Some(1 + ii));
    let uphi = graph.lookup_op(phi).unwrap();
    assert!(graph.unit(uphi).is_phi());
    assert!(schedule.slot(phi) <= graph.end_slot(b0));
}

#[test]
fn exhausted_modulo_search_falls_back_to_straight_line() {
    init();
    let b0 = BlockId(0);
    let mut ops = OpTable::new();
    let a = ops.push(Operation::control("mul", b0, mult(0)).with_steps(1));
    let br = ops.push(Operation::branch(b0, b0));
    let mut info = DetailLatencyInfo::from_ops(&ops);
    info.add_dep(a, DepInfo::live_in());
    info.add_dep(br, DepInfo::value(a, 0));

    let block = BasicBlock::new(b0, vec![a, br]);
    let mut graph = GraphBuilder::build_block(&ops, &info, &block, 1).unwrap();
    assert!(graph.enable_pipeline());
    // The terminator may not leave the entry slot, so no II fits.
    let ubr = graph.lookup_op(br).unwrap();
    let entry = graph.entry_root();
    graph.add_dep(ubr, entry, DepEdge::fixed_timing(0)).unwrap();

    schedule_graph(&mut graph, &SchedOptions::default()).unwrap();
    assert!(!graph.enable_pipeline());
    assert_eq!(graph.ii(b0), None);
    assert_eq!(graph.unit(ubr).slot(), Some(1));
    let ua = graph.lookup_op(a).unwrap();
    assert_eq!(graph.unit(ua).slot(), Some(1));
}

#[test]
fn pipelined_loop_is_frozen_into_region() {
    init();
    let (b0, b1, b2) = (BlockId(0), BlockId(1), BlockId(2));
    let mut ops = OpTable::new();
    let mut info = DetailLatencyInfo::default();

    let x = ops.push(Operation::control("mul", b0, mult(0)).with_steps(1));
    let br0 = ops.push(Operation::branch(b0, b1));
    info.set_steps(x, 1);
    info.add_dep(x, DepInfo::live_in());
    info.add_dep(br0, DepInfo::value(x, 1));

    let mut loop_ops = recurrence_block(&mut ops, &mut info, b1);
    let (a, b, br1) = (loop_ops[0], loop_ops[1], loop_ops[2]);
    // The exit condition is computed on the data path.
    let d = ops.push(Operation::datapath("icmp", b1, FuncUnitId::TRIVIAL));
    let phi = ops.push(
        Operation::control("phi", b1, FuncUnitId::TRIVIAL).with_phi(),
    );
    info.set_steps(d, 0);
    info.set_steps(phi, 0);
    info.add_dep(d, DepInfo::value(b, 1));
    info.add_dep(br1, DepInfo::value(d, 0));
    info.add_dep(phi, DepInfo::live_in());
    loop_ops.extend([d, phi]);

    let y = ops.push(Operation::control("store", b2, mult(0)).with_steps(1));
    info.set_steps(y, 1);
    info.add_dep(y, DepInfo::value(b, 1));

    let blocks = [
        BasicBlock::new(b0, vec![x, br0]),
        BasicBlock::new(b1, loop_ops),
        BasicBlock::new(b2, vec![y]),
    ];
    let opts = SchedOptions::default();
    let (_, alone) =
        schedule_block(&ops, &info, &blocks[1], 1, &opts).unwrap();
    let (graph, schedule) = RegionScheduler::new(&ops, &info, opts)
        .schedule(&blocks)
        .unwrap();
    graph.verify().unwrap();

    let slot = |op| schedule.slot(op).unwrap();
    assert_eq!(schedule.ii(b1), Some(5));
    // The loop keeps the timing it was pipelined with.
    assert_eq!(slot(br1) - slot(a), 5);
    assert_eq!(slot(br1) - slot(b), 2);
    assert!(slot(a) >= slot(br0));
    assert!(slot(y) >= slot(b) + 1);
    assert!(slot(y) >= slot(br1));
    assert_eq!((slot(x), slot(br0), slot(br1), slot(y)), (1, 2, 7, 7));

    // Data-path and PHI units stay where the loop schedule put them.
    let alone_slot = |op| alone.slot(op).unwrap();
    assert!(slot(d) <= slot(br1));
    assert_eq!(
        slot(br1) - slot(d),
        alone_slot(br1) - alone_slot(d),
    );
    assert_eq!(slot(phi), slot(br1));
    assert_eq!(schedule.value_class(d), alone.value_class(d));
    assert!(schedule.value_class(d).is_some());
    assert!(!graph.unit(graph.lookup_op(d).unwrap()).is_dangling());
}

#[test]
fn leading_loop_takes_over_the_entry_root() {
    init();
    let (b0, b1) = (BlockId(0), BlockId(1));
    let mut ops = OpTable::new();
    let mut info = DetailLatencyInfo::default();
    let loop_ops = recurrence_block(&mut ops, &mut info, b0);
    let (b, br0) = (loop_ops[1], loop_ops[2]);
    let y = ops.push(Operation::control("store", b1, mult(0)).with_steps(1));
    info.set_steps(y, 1);
    info.add_dep(y, DepInfo::value(b, 1));

    let blocks = [
        BasicBlock::new(b0, loop_ops),
        BasicBlock::new(b1, vec![y]),
    ];
    let (graph, schedule) =
        RegionScheduler::new(&ops, &info, SchedOptions::default())
            .schedule(&blocks)
            .unwrap();
    graph.verify().unwrap();

    let entries = graph
        .units()
        .filter(|u| u.representative() == InstPtr::Block(b0))
        .count();
    assert_eq!(entries, 1);
    assert_eq!(graph.lookup(InstPtr::Block(b0)), Some(graph.entry_root()));
    assert_eq!(graph.unit(graph.entry_root()).slot(), Some(1));
    assert_eq!(schedule.ii(b0), Some(5));
    assert_eq!(schedule.slot(br0), Some(6));
    assert_eq!(schedule.slot(y), Some(6));
}
