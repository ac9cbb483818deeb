//! Standalone script runner
//!
//! Loads one script file, binds a callback to each hook that the script
//! defines under a conventional name, and runs the reference simulation.
//!
//! Usage:
//!   run_script <script.rhai> [--steps <count>]
//!
//! Callbacks picked up by name:
//!   post_force(lmp, vflag)
//!   end_of_step(lmp)

use sim_hook_bridge::{BridgeError, HookKind, InterpreterConfig, Simulation, SimulationConfig};
use std::env;
use std::path::PathBuf;

fn main() {
    // Script print/debug output goes through the log facade; RUST_LOG=debug shows both
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        println!("Usage: {} <script.rhai> [--steps <count>]", args[0]);
        return;
    }

    let script = PathBuf::from(&args[1]);
    let mut steps = 100;
    let mut i = 2;
    while i < args.len() {
        if args[i] == "--steps" && i + 1 < args.len() {
            steps = match args[i + 1].parse() {
                Ok(n) => n,
                Err(e) => {
                    eprintln!("Invalid step count '{}': {}", args[i + 1], e);
                    std::process::exit(2);
                }
            };
            i += 2;
        } else {
            eprintln!("Unknown argument: {}", args[i]);
            std::process::exit(2);
        }
    }

    if let Err(e) = run(&script, steps) {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}

fn run(script: &PathBuf, steps: u64) -> Result<(), BridgeError> {
    let mut sim =
        Simulation::with_global_interpreter(&InterpreterConfig::default(), SimulationConfig::new())?;
    sim.interpreter().exec_file(script)?;

    for hook in HookKind::ALL {
        let line = format!("{} {}", hook.token(), hook.token());
        match sim.interpreter().resolve(hook.token(), hook.arity()) {
            Ok(_) => sim.add_fix_line(hook.token(), &line)?,
            Err(_) => println!("No '{}' callback defined, skipping", hook.token()),
        }
    }

    let summary = sim.run(steps)?;

    println!("Steps run:        {}", summary.steps_run);
    println!("Final time:       {:.6}", summary.final_time);
    println!("post_force calls: {}", summary.post_force_calls);
    println!("end_of_step calls: {}", summary.end_of_step_calls);
    for (name, value) in &summary.counters {
        println!("  {} = {}", name, value);
    }
    Ok(())
}
