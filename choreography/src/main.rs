//! The `scribble` command-line tool (§6 "CLI surface").
//!
//! Exit codes: `0` success, `1` verification failure, `2` parse error,
//! `3` IO error.

use argh::FromArgs;
use scribble_dmst::ast::Role;
use scribble_dmst::registry::ProtocolRegistry;
use scribble_dmst::verifier::Priority;
use scribble_dmst::{cfg, projector, verifier};
use scribble_dmst_choreography::{parse_module, render};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(FromArgs)]
/// scribble-dmst: parse, verify, project and simulate Scribble-2.0 / DMst protocols.
struct Cli {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Project(ProjectArgs),
    Parse(ParseArgs),
    Verify(VerifyArgs),
    Simulate(SimulateArgs),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
    Both,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "both" => Ok(OutputFormat::Both),
            other => Err(format!("unknown format `{other}` (expected text|json|both)")),
        }
    }
}

#[derive(FromArgs)]
/// Parse, verify and project a protocol module.
#[argh(subcommand, name = "project")]
struct ProjectArgs {
    #[argh(positional)]
    /// path to a `.scribble` source file; omitted when --stdin is given
    file: Option<PathBuf>,

    #[argh(option)]
    /// protocol name to select when the module declares more than one
    protocol: Option<String>,

    #[argh(option)]
    /// project a single role instead of every role
    role: Option<String>,

    #[argh(option, default = "OutputFormat::Text")]
    /// text|json|both
    format: OutputFormat,

    #[argh(option)]
    /// write each role's projection to `<dir>/<Role>.txt` instead of stdout
    output_dir: Option<PathBuf>,

    #[argh(switch)]
    /// read source from stdin instead of a file
    stdin: bool,
}

#[derive(FromArgs)]
/// Parse a protocol module and report structural errors only.
#[argh(subcommand, name = "parse")]
struct ParseArgs {
    #[argh(positional)]
    file: Option<PathBuf>,

    #[argh(switch)]
    /// read source from stdin instead of a file
    stdin: bool,
}

#[derive(FromArgs)]
/// Parse and verify a protocol module, printing violations grouped by kind.
#[argh(subcommand, name = "verify")]
struct VerifyArgs {
    #[argh(positional)]
    file: Option<PathBuf>,

    #[argh(option)]
    /// protocol name to select when the module declares more than one
    protocol: Option<String>,

    #[argh(switch)]
    /// read source from stdin instead of a file
    stdin: bool,
}

#[derive(FromArgs)]
/// Parse, project and run a protocol's CFSMs to completion under scheduled coordination.
#[argh(subcommand, name = "simulate")]
struct SimulateArgs {
    #[argh(positional)]
    file: Option<PathBuf>,

    #[argh(option)]
    /// protocol name to select when the module declares more than one
    protocol: Option<String>,

    #[argh(option, default = "10_000")]
    /// abort after this many total scheduler steps
    max_steps: u64,

    #[argh(switch)]
    /// read source from stdin instead of a file
    stdin: bool,
}

fn read_source(file: &Option<PathBuf>, stdin: bool) -> Result<String, ExitCode> {
    if stdin {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).map_err(|e| {
            eprintln!("error: failed to read stdin: {e}");
            ExitCode::from(3)
        })?;
        return Ok(buf);
    }
    match file {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            eprintln!("error: failed to read {}: {e}", path.display());
            ExitCode::from(3)
        }),
        None => {
            eprintln!("error: no input file given and --stdin not set");
            Err(ExitCode::from(3))
        }
    }
}

fn select_protocol<'a>(registry: &'a ProtocolRegistry, requested: &Option<String>) -> Result<String, ExitCode> {
    if let Some(name) = requested {
        if registry.contains(name) {
            return Ok(name.clone());
        }
        eprintln!("error: no protocol named `{name}` in this module");
        return Err(ExitCode::from(2));
    }
    let mut names = registry.names();
    match (names.next(), names.next()) {
        (Some(only), None) => Ok(only.to_string()),
        (Some(_), Some(_)) => {
            eprintln!("error: module declares more than one protocol; pass --protocol");
            Err(ExitCode::from(2))
        }
        (None, _) => {
            eprintln!("error: module declares no protocols");
            Err(ExitCode::from(2))
        }
    }
}

fn print_violations(diagnosis: &verifier::Diagnosis) {
    for priority in [Priority::P0, Priority::P1, Priority::P2, Priority::P3] {
        let matching: Vec<_> = diagnosis.violations.iter().filter(|v| v.priority() == priority).collect();
        if matching.is_empty() {
            continue;
        }
        eprintln!("{priority:?}:");
        for v in matching {
            eprintln!("  {v}");
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::try_init().ok();
    let cli: Cli = argh::from_env();
    tracing::debug!("dispatching CLI command");

    match cli.command {
        Command::Parse(args) => run_parse(args),
        Command::Verify(args) => run_verify(args),
        Command::Project(args) => run_project(args),
        Command::Simulate(args) => run_simulate(args),
    }
}

fn run_parse(args: ParseArgs) -> ExitCode {
    let source = match read_source(&args.file, args.stdin) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match parse_module(&source) {
        Ok(module) => {
            println!("parsed {} protocol declaration(s)", module.protocols.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

fn run_verify(args: VerifyArgs) -> ExitCode {
    let source = match read_source(&args.file, args.stdin) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let module = match parse_module(&source) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    let registry = ProtocolRegistry::from_module(&module);
    let protocol_name = match select_protocol(&registry, &args.protocol) {
        Ok(n) => n,
        Err(code) => return code,
    };

    let (cfg, warnings) = match cfg::build(&protocol_name, &registry) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    for w in &warnings {
        eprintln!("warning: {w:?}");
    }

    let diagnosis = verifier::verify(&cfg);
    print_violations(&diagnosis);
    if diagnosis.ok() {
        println!("ok: no projection-blocking violations");
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn run_project(args: ProjectArgs) -> ExitCode {
    let source = match read_source(&args.file, args.stdin) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let module = match parse_module(&source) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    let registry = ProtocolRegistry::from_module(&module);
    let protocol_name = match select_protocol(&registry, &args.protocol) {
        Ok(n) => n,
        Err(code) => return code,
    };

    let (cfg, _warnings) = match cfg::build(&protocol_name, &registry) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let diagnosis = verifier::verify(&cfg);
    print_violations(&diagnosis);
    if !diagnosis.ok() {
        return ExitCode::from(1);
    }

    let outcomes = match &args.role {
        Some(role) => {
            let role = Role::new(role.as_str());
            let outcome = projector::project(&cfg, &role, &registry);
            vec![(role, outcome)]
        }
        None => projector::project_all(&cfg, &registry).into_iter().collect(),
    };

    for (role, outcome) in &outcomes {
        if !outcome.errors.is_empty() {
            eprintln!("projection errors for `{role}`:");
            for e in &outcome.errors {
                eprintln!("  {e}");
            }
        }
    }

    for (role, outcome) in &outcomes {
        let text = render(&outcome.cfsm);
        let json = project_json(role, &outcome.cfsm);
        let body = match args.format {
            OutputFormat::Text => text.clone(),
            OutputFormat::Json => json.to_string(),
            OutputFormat::Both => format!("{text}\n--- json ---\n{json}"),
        };

        match &args.output_dir {
            Some(dir) => {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    eprintln!("error: failed to create {}: {e}", dir.display());
                    return ExitCode::from(3);
                }
                let path = dir.join(format!("{role}.txt"));
                if let Err(e) = std::fs::write(&path, &body) {
                    eprintln!("error: failed to write {}: {e}", path.display());
                    return ExitCode::from(3);
                }
            }
            None => {
                println!("=== {role} ===");
                println!("{body}");
            }
        }
    }

    ExitCode::SUCCESS
}

fn project_json(role: &Role, cfsm: &scribble_dmst::cfsm::Cfsm) -> serde_json::Value {
    let (states, transitions) = cfsm.size();
    let edges: Vec<serde_json::Value> = cfsm
        .transitions()
        .map(|(from, to, action)| {
            serde_json::json!({
                "from": from.index(),
                "to": to.index(),
                "action": action.to_string(),
            })
        })
        .collect();
    serde_json::json!({
        "role": role.to_string(),
        "states": states,
        "transitions": transitions,
        "edges": edges,
    })
}

fn run_simulate(args: SimulateArgs) -> ExitCode {
    let source = match read_source(&args.file, args.stdin) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let module = match parse_module(&source) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    let registry = ProtocolRegistry::from_module(&module);
    let protocol_name = match select_protocol(&registry, &args.protocol) {
        Ok(n) => n,
        Err(code) => return code,
    };

    let (cfg, _warnings) = match cfg::build(&protocol_name, &registry) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let diagnosis = verifier::verify(&cfg);
    print_violations(&diagnosis);
    if !diagnosis.ok() {
        return ExitCode::from(1);
    }

    let projected = projector::project_all(&cfg, &registry);
    let cfsms: std::collections::HashMap<Role, std::sync::Arc<scribble_dmst::cfsm::Cfsm>> =
        projected.into_iter().map(|(r, o)| (r, std::sync::Arc::new(o.cfsm))).collect();

    let config = scribble_dmst::runtime::ScheduledConfig {
        scheduling: scribble_dmst::runtime::SchedulingPolicy::RoundRobin,
        max_steps: args.max_steps,
        record_trace: true,
    };
    let call_registry = std::sync::Arc::new(scribble_dmst::runtime::CfsmRegistry::new());
    let mut sim = scribble_dmst::runtime::DistributedSimulator::new(cfsms, call_registry, config);

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("tokio runtime");
    let result = runtime.block_on(sim.run());

    if result.success {
        println!("completed in {} steps", result.global_steps);
        ExitCode::SUCCESS
    } else {
        eprintln!("run failed after {} steps: {:?}", result.global_steps, result.error);
        ExitCode::from(1)
    }
}
