//! Command-line driver: load a story, optionally dump its tables, and
//! pump the execution loop against stdin/stdout.

use brasslantern::config::InterpreterConfig;
use brasslantern::input::InputRequest;
use brasslantern::interpreter::{Interpreter, MachineState};
use brasslantern::machine::Machine;
use brasslantern::memory::Memory;
use brasslantern::saveformat::QuetzalFormat;
use brasslantern::screen::StdoutScreen;
use brasslantern::storage::FileStorage;
use clap::Parser;
use log::debug;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "brasslantern", about = "A Z-machine interpreter")]
struct Args {
    /// Story file to load (.z1 through .z8, .dat)
    story_file: PathBuf,

    /// Verbose execution tracing to the log
    #[arg(long)]
    debug: bool,

    /// Load and validate the story without executing it
    #[arg(long)]
    no_exec: bool,

    /// Print the story header
    #[arg(long)]
    header: bool,

    /// Print the object tree
    #[arg(long)]
    object_tree: bool,

    /// Print the dictionary
    #[arg(long)]
    dict: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let mut builder = env_logger::Builder::from_default_env();
    if args.debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> brasslantern::Result<ExitCode> {
    let bytes = std::fs::read(&args.story_file).map_err(|e| {
        brasslantern::Error::Load(format!("cannot read {}: {e}", args.story_file.display()))
    })?;
    let memory = Memory::from_story(bytes)?;
    let machine = Machine::new(memory)?;

    if args.header {
        println!("{}", machine.memory.header);
    }
    if args.object_tree {
        print_object_tree(&machine)?;
    }
    if args.dict {
        print_dictionary(&machine)?;
    }
    if args.no_exec {
        return Ok(ExitCode::SUCCESS);
    }

    let config_path = args.story_file.with_extension("toml");
    let config = if config_path.exists() {
        InterpreterConfig::from_file(&config_path)?
    } else {
        InterpreterConfig::default()
    };

    let mut interpreter = Interpreter::new(
        machine,
        Box::new(StdoutScreen),
        Box::new(FileStorage::for_story(&args.story_file)),
        Box::new(QuetzalFormat),
        config,
    );

    let stdin = io::stdin();
    loop {
        match interpreter.run()? {
            MachineState::Halted => {
                debug!(
                    "halted after {} instructions",
                    interpreter.instruction_count()
                );
                return Ok(ExitCode::SUCCESS);
            }
            MachineState::Running => continue,
            MachineState::AwaitingInput(request) => {
                io::stdout().flush().ok();
                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    // EOF on stdin: nothing more to feed the story.
                    return Ok(ExitCode::SUCCESS);
                }
                match request {
                    InputRequest::Line { .. } => interpreter.resume_with_input(&line)?,
                    InputRequest::Char { .. } => {
                        let ch = line.chars().next().unwrap_or('\n');
                        interpreter.resume_with_char(ch)?;
                    }
                }
            }
        }
    }
}

fn print_object_tree(machine: &Machine) -> brasslantern::Result<()> {
    let objects = &machine.objects;
    let memory = &machine.memory;
    println!("{} objects", objects.object_count());
    for obj in 1..=objects.object_count() {
        if objects.parent(memory, obj)? != 0 {
            continue;
        }
        print_object_subtree(machine, obj, 0)?;
    }
    Ok(())
}

fn print_object_subtree(machine: &Machine, obj: u16, depth: usize) -> brasslantern::Result<()> {
    let name = machine.objects.name(&machine.memory, obj)?;
    let label = if name.is_empty() {
        "(unnamed)"
    } else {
        name.as_str()
    };
    println!("{}{obj}. {label}", "  ".repeat(depth));
    let mut child = machine.objects.child(&machine.memory, obj)?;
    while child != 0 {
        print_object_subtree(machine, child, depth + 1)?;
        child = machine.objects.sibling(&machine.memory, child)?;
    }
    Ok(())
}

fn print_dictionary(machine: &Machine) -> brasslantern::Result<()> {
    let words = machine.dictionary.words(&machine.memory)?;
    println!(
        "{} dictionary entries, separators {:?}",
        words.len(),
        machine
            .dictionary
            .separators()
            .iter()
            .map(|&b| b as char)
            .collect::<String>()
    );
    for chunk in words.chunks(8) {
        println!("  {}", chunk.join("  "));
    }
    Ok(())
}
