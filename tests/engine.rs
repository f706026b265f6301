use fa_rs::config::EngineConfig;
use fa_rs::engine::Engine;
use fa_rs::error::Error;
use fa_rs::program::{BinaryOp, BlockId, FncBuilder, Insn, Location, Operand, Program, ProgramBuilder, ProgramPoint, TypeRef, VarId};

use test_log::test;

struct Types {
    int: TypeRef,
    boolean: TypeRef,
    ptr: TypeRef,
}

/// `struct node { struct node* next; struct node* prev; }`
fn types(pb: &mut ProgramBuilder) -> Types {
    let node = pb.declare_struct("node");
    let ptr = pb.pointer(node);
    pb.define_struct(node, 16, &[("next", 0, ptr), ("prev", 8, ptr)]);
    Types {
        int: pb.int(),
        boolean: pb.bool(),
        ptr,
    }
}

fn new_node(fb: &mut FncBuilder, block: BlockId, t: &Types, var: VarId) {
    fb.push(block, Insn::call(Operand::var(var, t.ptr), "malloc", vec![Operand::int(16, t.int)]));
    fb.push(block, Insn::assign(Operand::var(var, t.ptr), Operand::var(var, t.ptr)));
}

/// `c = nondet(); b = c == 0; if (b) goto then; else goto else;`
fn nondet_branch(fb: &mut FncBuilder, block: BlockId, t: &Types, c: VarId, b: VarId, then: BlockId, other: BlockId) {
    fb.push(block, Insn::call(Operand::var(c, t.int), "__nondet", vec![]));
    fb.push(
        block,
        Insn::binop(BinaryOp::Eq, Operand::var(b, t.boolean), Operand::var(c, t.int), Operand::int(0, t.int)),
    );
    fb.push(block, Insn::cond(Operand::var(b, t.boolean), then, other).kill([c, b]));
}

/// `while (x != NULL) { tmp = x->next; free(x); x = tmp; } return;`
#[allow(clippy::too_many_arguments)]
fn free_list(fb: &mut FncBuilder, head: BlockId, body: BlockId, exit: BlockId, t: &Types, x: VarId, tmp: VarId, b: VarId) {
    fb.push(
        head,
        Insn::binop(BinaryOp::Ne, Operand::var(b, t.boolean), Operand::var(x, t.ptr), Operand::null(t.ptr)),
    );
    fb.push(head, Insn::cond(Operand::var(b, t.boolean), body, exit).kill([b]));
    fb.push(body, Insn::assign(Operand::var(tmp, t.ptr), Operand::var(x, t.ptr).field(0, t.ptr)));
    fb.push(body, Insn::call(Operand::void(), "free", vec![Operand::var(x, t.ptr)]));
    fb.push(body, Insn::assign(Operand::var(x, t.ptr), Operand::var(tmp, t.ptr)).kill([tmp]));
    fb.push(body, Insn::jmp(head));
    fb.push(exit, Insn::ret());
}

fn run(program: &Program) -> Result<fa_rs::engine::Report, Error> {
    Engine::new(program, EngineConfig::default())?.run("main")
}

#[test]
fn test_loop_free_tree() {
    let mut pb = ProgramBuilder::new();
    let t = types(&mut pb);
    let mut fb = FncBuilder::new("main");
    let root = fb.var("root", t.ptr);
    let left = fb.var("left", t.ptr);
    let right = fb.var("right", t.ptr);
    let entry = fb.block("entry");
    new_node(&mut fb, entry, &t, root);
    new_node(&mut fb, entry, &t, left);
    new_node(&mut fb, entry, &t, right);
    fb.push(entry, Insn::assign(Operand::var(root, t.ptr).field(0, t.ptr), Operand::var(left, t.ptr)));
    fb.push(entry, Insn::assign(Operand::var(root, t.ptr).field(8, t.ptr), Operand::var(right, t.ptr)));
    for v in [left, right] {
        fb.push(entry, Insn::assign(Operand::var(v, t.ptr).field(0, t.ptr), Operand::null(t.ptr)));
        fb.push(entry, Insn::assign(Operand::var(v, t.ptr).field(8, t.ptr), Operand::null(t.ptr)));
    }
    for v in [left, right, root] {
        fb.push(entry, Insn::call(Operand::void(), "free", vec![Operand::var(v, t.ptr)]));
    }
    fb.push(entry, Insn::ret());
    pb.function(fb.build());
    let program = pb.build();

    let report = run(&program).unwrap();
    assert!(report.fixpoints.is_empty());
    assert_eq!(report.restarts, 0);
    // One step per instruction on the only path.
    assert_eq!(report.states_evaluated, 16);
    assert_eq!(report.traces_evaluated, 0);
}

#[test]
fn test_free_of_integer() {
    let mut pb = ProgramBuilder::new();
    let t = types(&mut pb);
    let mut fb = FncBuilder::new("main");
    let i = fb.var("i", t.int);
    let entry = fb.block("entry");
    fb.push(entry, Insn::assign(Operand::var(i, t.int), Operand::int(5, t.int)).at(Location::new("free.c", 2)));
    fb.push(entry, Insn::call(Operand::void(), "free", vec![Operand::var(i, t.int)]).at(Location::new("free.c", 3)));
    fb.push(entry, Insn::ret().at(Location::new("free.c", 4)));
    pb.function(fb.build());
    let program = pb.build();

    match run(&program) {
        Err(Error::Program(e)) => {
            assert_eq!(e.message, "releasing non-pointer value");
            assert_eq!(e.location, Some(Location::new("free.c", 3)));
            assert_eq!(e.trace.len(), 2);
            assert_eq!(e.trace[0].location, Location::new("free.c", 2));
            assert_eq!(e.trace.last().unwrap().location, Location::new("free.c", 3));
        }
        other => panic!("expected a violation, got {:?}", other.map(|r| r.states_evaluated)),
    }
}

#[test]
fn test_null_dereference() {
    let mut pb = ProgramBuilder::new();
    let t = types(&mut pb);
    let mut fb = FncBuilder::new("main");
    let x = fb.var("x", t.ptr);
    let y = fb.var("y", t.ptr);
    let entry = fb.block("entry");
    fb.push(entry, Insn::assign(Operand::var(x, t.ptr), Operand::null(t.ptr)));
    fb.push(
        entry,
        Insn::assign(Operand::var(y, t.ptr), Operand::var(x, t.ptr).field(0, t.ptr)).at(Location::new("null.c", 9)),
    );
    fb.push(entry, Insn::ret());
    pb.function(fb.build());
    let program = pb.build();

    match run(&program) {
        Err(Error::Program(e)) => {
            assert_eq!(e.message, "dereferencing NULL pointer");
            assert_eq!(e.location, Some(Location::new("null.c", 9)));
        }
        other => panic!("expected a violation, got {:?}", other.map(|r| r.states_evaluated)),
    }
}

#[test]
fn test_leak_is_garbage() {
    let mut pb = ProgramBuilder::new();
    let t = types(&mut pb);
    let mut fb = FncBuilder::new("main");
    let x = fb.var("x", t.ptr);
    let entry = fb.block("entry");
    new_node(&mut fb, entry, &t, x);
    fb.push(entry, Insn::assign(Operand::var(x, t.ptr), Operand::null(t.ptr)).at(Location::new("leak.c", 5)));
    fb.push(entry, Insn::ret());
    pb.function(fb.build());
    let program = pb.build();

    match run(&program) {
        Err(Error::Program(e)) => {
            assert_eq!(e.message, "garbage detected");
            assert_eq!(e.location, Some(Location::new("leak.c", 5)));
        }
        other => panic!("expected a violation, got {:?}", other.map(|r| r.states_evaluated)),
    }
}

#[test]
fn test_leak_at_return() {
    let mut pb = ProgramBuilder::new();
    let t = types(&mut pb);
    let mut fb = FncBuilder::new("main");
    let x = fb.var("x", t.ptr);
    let entry = fb.block("entry");
    new_node(&mut fb, entry, &t, x);
    fb.push(entry, Insn::ret().at(Location::new("ret.c", 4)));
    pb.function(fb.build());
    let program = pb.build();

    match run(&program) {
        Err(Error::Program(e)) => {
            assert_eq!(e.message, "garbage detected");
            assert_eq!(e.location, Some(Location::new("ret.c", 4)));
            assert_eq!(e.trace.len(), 3);
        }
        other => panic!("expected a violation, got {:?}", other.map(|r| r.states_evaluated)),
    }
}

fn fixpoint_at(report: &fa_rs::engine::Report, block: usize) -> &fa_rs::engine::FixpointReport {
    let point = ProgramPoint::block_start(0, BlockId(block));
    match report.fixpoints.iter().find(|f| f.point == point) {
        Some(fixpoint) => fixpoint,
        None => panic!("no fixpoint at {}", point),
    }
}

/// `x = NULL; while (nondet()) { y = new node; y->next = x; x = y; }`, then
/// the list is released.
fn list_prepend() -> Program {
    let mut pb = ProgramBuilder::new();
    let t = types(&mut pb);
    let mut fb = FncBuilder::new("main");
    let x = fb.var("x", t.ptr);
    let y = fb.var("y", t.ptr);
    let c = fb.var("c", t.int);
    let b = fb.var("b", t.boolean);
    let entry = fb.block("entry");
    let head = fb.block("head");
    let body = fb.block("body");
    let exit = fb.block("exit");
    let free_head = fb.block("free_head");
    let free_body = fb.block("free_body");
    let done = fb.block("done");
    fb.push(entry, Insn::assign(Operand::var(x, t.ptr), Operand::null(t.ptr)));
    fb.push(entry, Insn::jmp(head));
    nondet_branch(&mut fb, head, &t, c, b, body, exit);
    new_node(&mut fb, body, &t, y);
    fb.push(body, Insn::assign(Operand::var(y, t.ptr).field(0, t.ptr), Operand::var(x, t.ptr)));
    fb.push(body, Insn::assign(Operand::var(y, t.ptr).field(8, t.ptr), Operand::null(t.ptr)));
    fb.push(body, Insn::assign(Operand::var(x, t.ptr), Operand::var(y, t.ptr)).kill([y]));
    fb.push(body, Insn::jmp(head));
    fb.push(exit, Insn::jmp(free_head));
    free_list(&mut fb, free_head, free_body, done, &t, x, y, b);
    pb.function(fb.build());
    pb.build()
}

#[test]
fn test_list_prepend_converges() {
    let program = list_prepend();
    let report = run(&program).unwrap();
    assert_eq!(report.restarts, 0);
    assert_eq!(report.fixpoints.len(), 2);
    // The empty list and at least one abstracted non-empty list.
    assert!(fixpoint_at(&report, 1).configurations.len() >= 2);
    assert!(!fixpoint_at(&report, 4).configurations.is_empty());
}

#[test]
fn test_list_prepend_any_seed() {
    let program = list_prepend();
    for seed in [1, 2, 3] {
        let config = EngineConfig {
            seed,
            ..Default::default()
        };
        let report = Engine::new(&program, config).unwrap().run("main").unwrap();
        assert_eq!(report.fixpoints.len(), 2);
    }
}

/// `h = new node; tl = h; while (nondet()) { n = new node; tl->next = n; tl = n; }`,
/// then the list is released from `h`.
fn list_append() -> Program {
    let mut pb = ProgramBuilder::new();
    let t = types(&mut pb);
    let mut fb = FncBuilder::new("main");
    let h = fb.var("h", t.ptr);
    let tl = fb.var("tl", t.ptr);
    let n = fb.var("n", t.ptr);
    let c = fb.var("c", t.int);
    let b = fb.var("b", t.boolean);
    let entry = fb.block("entry");
    let head = fb.block("head");
    let body = fb.block("body");
    let exit = fb.block("exit");
    let free_head = fb.block("free_head");
    let free_body = fb.block("free_body");
    let done = fb.block("done");

    new_node(&mut fb, entry, &t, h);
    fb.push(entry, Insn::assign(Operand::var(h, t.ptr).field(0, t.ptr), Operand::null(t.ptr)));
    fb.push(entry, Insn::assign(Operand::var(h, t.ptr).field(8, t.ptr), Operand::null(t.ptr)));
    fb.push(entry, Insn::assign(Operand::var(tl, t.ptr), Operand::var(h, t.ptr)));
    fb.push(entry, Insn::jmp(head));

    nondet_branch(&mut fb, head, &t, c, b, body, exit);
    new_node(&mut fb, body, &t, n);
    fb.push(body, Insn::assign(Operand::var(n, t.ptr).field(0, t.ptr), Operand::null(t.ptr)));
    fb.push(body, Insn::assign(Operand::var(n, t.ptr).field(8, t.ptr), Operand::null(t.ptr)));
    fb.push(body, Insn::assign(Operand::var(tl, t.ptr).field(0, t.ptr), Operand::var(n, t.ptr)));
    fb.push(body, Insn::assign(Operand::var(tl, t.ptr), Operand::var(n, t.ptr)).kill([n]));
    fb.push(body, Insn::jmp(head));

    fb.push(exit, Insn::assign(Operand::var(tl, t.ptr), Operand::null(t.ptr)));
    fb.push(exit, Insn::jmp(free_head));
    free_list(&mut fb, free_head, free_body, done, &t, h, n, b);
    pb.function(fb.build());
    pb.build()
}

#[test]
fn test_list_append_converges() {
    let program = list_append();
    let report = run(&program).unwrap();
    assert_eq!(report.restarts, 0);
    assert_eq!(report.fixpoints.len(), 2);
    // Further appends stay inside the fixpoint, so it stays small.
    let fixpoint = fixpoint_at(&report, 1);
    assert!(fixpoint.configurations.len() >= 2);
    assert!(fixpoint.configurations.len() <= 4);
    assert!(report.states_evaluated < 1000);
}

/// Builds a two-node doubly-linked list, spins in a loop and releases it.
fn dll_pair() -> Program {
    let mut pb = ProgramBuilder::new();
    let t = types(&mut pb);
    let mut fb = FncBuilder::new("main");
    let x = fb.var("x", t.ptr);
    let y = fb.var("y", t.ptr);
    let c = fb.var("c", t.int);
    let b = fb.var("b", t.boolean);
    let entry = fb.block("entry");
    let head = fb.block("head");
    let exit = fb.block("exit");
    new_node(&mut fb, entry, &t, x);
    new_node(&mut fb, entry, &t, y);
    fb.push(entry, Insn::assign(Operand::var(x, t.ptr).field(0, t.ptr), Operand::var(y, t.ptr)));
    fb.push(entry, Insn::assign(Operand::var(x, t.ptr).field(8, t.ptr), Operand::null(t.ptr)));
    fb.push(entry, Insn::assign(Operand::var(y, t.ptr).field(0, t.ptr), Operand::null(t.ptr)));
    fb.push(entry, Insn::assign(Operand::var(y, t.ptr).field(8, t.ptr), Operand::var(x, t.ptr)));
    fb.push(entry, Insn::jmp(head));
    nondet_branch(&mut fb, head, &t, c, b, head, exit);
    fb.push(exit, Insn::call(Operand::void(), "free", vec![Operand::var(x, t.ptr)]));
    fb.push(exit, Insn::call(Operand::void(), "free", vec![Operand::var(y, t.ptr)]));
    fb.push(exit, Insn::ret());
    pb.function(fb.build());
    pb.build()
}

#[test]
fn test_box_discovery_restarts_once() {
    let program = dll_pair();
    let mut engine = Engine::new(&program, EngineConfig::default()).unwrap();
    let report = engine.run("main").unwrap();
    assert_eq!(report.restarts, 1);
    assert_eq!(report.fixpoints.len(), 1);
    let catalog = engine.registry().catalog();
    assert_eq!(catalog.len(), 1);
    assert_eq!(engine.registry().box_def(catalog[0]).name(), "box0");
}

#[test]
fn test_box_discovery_disabled() {
    let program = dll_pair();
    let config = EngineConfig {
        box_discovery: false,
        ..Default::default()
    };
    let mut engine = Engine::new(&program, config).unwrap();
    let report = engine.run("main").unwrap();
    assert_eq!(report.restarts, 0);
    assert!(engine.registry().catalog().is_empty());
}
