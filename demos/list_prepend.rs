use clap::Parser;

use fa_rs::config::EngineConfig;
use fa_rs::engine::Engine;
use fa_rs::fa::Matcher;
use fa_rs::program::{BinaryOp, FncBuilder, Insn, Location, Operand, Program, ProgramBuilder};

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Seed deciding the order of nondeterministic branches.
    #[arg(long, value_name = "INT", default_value = "0")]
    seed: u64,

    /// Abstraction height at loop entries.
    #[arg(long, value_name = "INT", default_value = "1")]
    height: usize,

    /// Also compare data leaves when abstracting.
    #[arg(long)]
    operands: bool,

    /// Dump the first configuration reaching the loop.
    #[arg(long)]
    debug: bool,
}

/// ```c
/// struct node { struct node* next; struct node* prev; };
/// x = NULL;
/// while (nondet()) { y = malloc(sizeof(struct node)); y->next = x; y->prev = NULL; x = y; }
/// while (x != NULL) { y = x->next; free(x); x = y; }
/// ```
fn build() -> Program {
    let loc = |line| Location::new("list_prepend.c", line);
    let mut pb = ProgramBuilder::new();
    let node = pb.declare_struct("node");
    let ptr = pb.pointer(node);
    pb.define_struct(node, 16, &[("next", 0, ptr), ("prev", 8, ptr)]);
    let int = pb.int();
    let boolean = pb.bool();

    let mut fb = FncBuilder::new("main");
    let x = fb.var("x", ptr);
    let y = fb.var("y", ptr);
    let c = fb.var("c", int);
    let b = fb.var("b", boolean);
    let entry = fb.block("entry");
    let head = fb.block("head");
    let body = fb.block("body");
    let exit = fb.block("exit");
    let free_head = fb.block("free_head");
    let free_body = fb.block("free_body");
    let done = fb.block("done");

    fb.push(entry, Insn::assign(Operand::var(x, ptr), Operand::null(ptr)).at(loc(3)));
    fb.push(entry, Insn::jmp(head));

    fb.push(head, Insn::call(Operand::var(c, int), "__nondet", vec![]).at(loc(4)));
    fb.push(
        head,
        Insn::binop(BinaryOp::Ne, Operand::var(b, boolean), Operand::var(c, int), Operand::int(0, int)).at(loc(4)),
    );
    fb.push(head, Insn::cond(Operand::var(b, boolean), body, exit).at(loc(4)).kill([c, b]));

    fb.push(body, Insn::call(Operand::var(y, ptr), "malloc", vec![Operand::int(16, int)]).at(loc(5)));
    fb.push(body, Insn::assign(Operand::var(y, ptr), Operand::var(y, ptr)).at(loc(5)));
    fb.push(body, Insn::assign(Operand::var(y, ptr).field(0, ptr), Operand::var(x, ptr)).at(loc(6)));
    fb.push(body, Insn::assign(Operand::var(y, ptr).field(8, ptr), Operand::null(ptr)).at(loc(7)));
    fb.push(body, Insn::assign(Operand::var(x, ptr), Operand::var(y, ptr)).at(loc(8)).kill([y]));
    fb.push(body, Insn::jmp(head));

    fb.push(exit, Insn::jmp(free_head));

    fb.push(
        free_head,
        Insn::binop(BinaryOp::Ne, Operand::var(b, boolean), Operand::var(x, ptr), Operand::null(ptr)).at(loc(10)),
    );
    fb.push(free_head, Insn::cond(Operand::var(b, boolean), free_body, done).at(loc(10)).kill([b]));
    fb.push(free_body, Insn::assign(Operand::var(y, ptr), Operand::var(x, ptr).field(0, ptr)).at(loc(10)));
    fb.push(free_body, Insn::call(Operand::void(), "free", vec![Operand::var(x, ptr)]).at(loc(10)));
    fb.push(free_body, Insn::assign(Operand::var(x, ptr), Operand::var(y, ptr)).at(loc(10)).kill([y]));
    fb.push(free_body, Insn::jmp(free_head));

    fb.push(done, Insn::ret().at(loc(11)));
    pb.function(fb.build());
    pb.build()
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let time_total = std::time::Instant::now();

    let args = Cli::parse();
    println!("args = {:?}", args);

    let program = build();
    let config = EngineConfig {
        seed: args.seed,
        abstraction_height: args.height,
        max_abstraction_height: args.height.max(EngineConfig::default().max_abstraction_height),
        matcher: if args.operands { Matcher::TagOperands } else { Matcher::Tag },
        ..Default::default()
    };
    let mut engine = Engine::new(&program, config)?;
    if args.debug {
        engine.set_debug_flag();
    }

    match engine.run("main") {
        Ok(report) => {
            for fixpoint in &report.fixpoints {
                println!(
                    "Fixpoint at {} ({}): {} configuration(s)",
                    fixpoint.point,
                    fixpoint.location,
                    fixpoint.configurations.len()
                );
                for (i, config) in fixpoint.configurations.iter().enumerate() {
                    println!("--- configuration {} ---", i);
                    print!("{}", config.dump(engine.registry()));
                }
            }
            for id in engine.registry().catalog() {
                println!("learned {}", engine.registry().box_def(id));
            }
            println!(
                "states = {}, traces = {}, restarts = {}",
                report.states_evaluated, report.traces_evaluated, report.restarts
            );
        }
        Err(fa_rs::error::Error::Program(e)) => {
            println!("{}", e);
            for entry in &e.trace {
                println!("  {}", entry);
            }
        }
        Err(e) => return Err(e.into()),
    }

    println!("\nAll done in {:.3} s", time_total.elapsed().as_secs_f64());
    Ok(())
}
