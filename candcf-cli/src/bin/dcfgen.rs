//! Generate master and slave configuration from a YAML network description

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use candcf_cli::report_warnings;
use candcf_core::diag::Diagnostics;
use candcf_core::sdo::format_record;
use candcf_gen::{generate_network, NetworkConfig};

#[derive(Parser)]
#[command(about = "Generate the configuration for a CANopen master from a YAML file")]
struct Args {
    /// The directory in which to store the generated file(s)
    #[arg(short, long, value_name = "DIR", default_value = "")]
    directory: PathBuf,
    /// Generate remote PDO mappings
    #[arg(short = 'r', long)]
    remote_pdo: bool,
    /// Do not abort in case of an invalid slave EDS/DCF
    #[arg(short = 'S', long)]
    no_strict: bool,
    /// Print the generated SDO requests
    #[arg(short, long)]
    verbose: bool,
    /// The YAML network configuration file
    filename: PathBuf,
}

fn run(args: &Args, diag: &mut Diagnostics) -> Result<(), Box<dyn std::error::Error>> {
    let config = NetworkConfig::load(&args.filename)?;

    let (mut master, slaves) = generate_network(&config, diag, !args.no_strict)?;
    master.remote_pdo = args.remote_pdo;

    for slave in slaves.values() {
        slave.write_bin(&args.directory)?;
        if args.verbose {
            for record in &slave.sdo {
                println!("{}", format_record(&slave.name, record));
            }
        }
    }
    master.write_bin(&args.directory)?;
    if args.verbose {
        for record in &master.sdo {
            println!("{}", format_record("master", record));
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    let mut diag = Diagnostics::new();
    let result = run(&args, &mut diag);
    report_warnings(&diag);
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
