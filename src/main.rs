use clap::{Parser, Subcommand};
use std::fs;
use std::process::ExitCode;
use wazm::parser::module::ValueType;
use wazm::runtime::{Environment, LinkingThreadOptions, Runtime, TypedValue, Value};

#[derive(Parser)]
#[command(name = "wazm")]
#[command(about = "WebAssembly 1.0 interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump module information
    Dump {
        /// Path to the WebAssembly module
        file: String,
    },

    /// Invoke an exported function
    Run {
        /// Path to the WebAssembly module
        file: String,

        /// Name of the exported function
        func: String,

        /// Arguments, one per parameter (floats accept `0x`-prefixed raw
        /// bits)
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Dump { file } => dump_module(&file),
        Commands::Run { file, func, args } => run_export(&file, &func, &args),
    }
}

fn load(file: &str) -> Result<Environment, ExitCode> {
    let bytes = fs::read(file).map_err(|e| {
        eprintln!("Error reading {}: {}", file, e);
        ExitCode::FAILURE
    })?;
    let mut env = Environment::new();
    env.set_error_sink(Box::new(|tag, message| {
        eprintln!("[{}] {}", tag, message);
    }));
    env.load_module("main", &bytes).map_err(|e| {
        eprintln!("Error parsing {}: {}", file, e);
        ExitCode::FAILURE
    })?;
    Ok(env)
}

fn dump_module(file: &str) -> ExitCode {
    let env = match load(file) {
        Ok(env) => env,
        Err(code) => return code,
    };
    let module = env.module("main").expect("just loaded");
    print!("{}", module.to_details_string());
    ExitCode::SUCCESS
}

fn run_export(file: &str, func: &str, args: &[String]) -> ExitCode {
    let env = match load(file) {
        Ok(env) => env,
        Err(code) => return code,
    };
    let mut runtime = match Runtime::init(&env, LinkingThreadOptions::default()) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error linking {}: {}", file, e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(start) = runtime.start_func("main") {
        let mut none = Vec::new();
        if !runtime.call(start, &mut none) {
            eprintln!("Error: start function trapped");
            return ExitCode::FAILURE;
        }
    }

    let Some(handle) = runtime.get_export_func("main", func) else {
        eprintln!("Error: no exported function \"{}\"", func);
        return ExitCode::FAILURE;
    };

    let params = runtime.func_signature(handle).params.clone();
    if args.len() != params.len() {
        eprintln!(
            "Error: \"{}\" takes {} argument(s), got {}",
            func,
            params.len(),
            args.len()
        );
        return ExitCode::FAILURE;
    }
    let mut values = Vec::with_capacity(args.len());
    for (arg, t) in args.iter().zip(&params) {
        match parse_arg(arg, *t) {
            Some(value) => values.push(value),
            None => {
                eprintln!("Error: cannot parse \"{}\" as {}", arg, t);
                return ExitCode::FAILURE;
            }
        }
    }

    if !runtime.call(handle, &mut values) {
        return ExitCode::FAILURE;
    }
    for value in &values {
        println!("{}", value);
    }
    ExitCode::SUCCESS
}

fn parse_arg(arg: &str, t: ValueType) -> Option<TypedValue> {
    let hex = arg.strip_prefix("0x");
    match t {
        ValueType::I32 => {
            let v = match hex {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => arg.parse::<i64>().ok()? as u32,
            };
            Some(TypedValue::new(ValueType::I32, Value::from_u32(v)))
        }
        ValueType::I64 => {
            let v = match hex {
                Some(hex) => u64::from_str_radix(hex, 16).ok()?,
                None => arg.parse::<i64>().ok()? as u64,
            };
            Some(TypedValue::new(ValueType::I64, Value::from_u64(v)))
        }
        ValueType::F32 => match hex {
            Some(hex) => Some(TypedValue::f32_bits(u32::from_str_radix(hex, 16).ok()?)),
            None => Some(TypedValue::f32(arg.parse::<f32>().ok()?)),
        },
        ValueType::F64 => match hex {
            Some(hex) => Some(TypedValue::f64_bits(u64::from_str_radix(hex, 16).ok()?)),
            None => Some(TypedValue::f64(arg.parse::<f64>().ok()?)),
        },
        _ => None,
    }
}
