//! Check the validity of an EDS/DCF file

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use candcf_cli::report_warnings;
use candcf_core::device::Device;
use candcf_core::diag::Diagnostics;
use candcf_core::ini::load_dcf;
use candcf_core::lint::lint;
use candcf_core::pdo::{print_rpdo, print_tpdo};
use candcf_core::value::Env;

#[derive(Parser)]
#[command(about = "Check the validity of an EDS/DCF file")]
struct Args {
    /// The node-ID to resolve $NODEID values with
    #[arg(short, long, value_name = "ID", default_value_t = 255)]
    node_id: u8,
    /// Print the PDO mappings
    #[arg(short, long)]
    print: bool,
    /// The EDS/DCF file to be checked
    filename: PathBuf,
}

fn run(args: &Args, diag: &mut Diagnostics) -> Result<bool, Box<dyn std::error::Error>> {
    let cfg = load_dcf(&args.filename)?;

    if !lint(&cfg, diag) {
        return Ok(false);
    }

    let mut env = Env::new();
    if args.node_id != 255 {
        env.insert("NODEID".to_string(), args.node_id);
    }
    let dev = Device::new(cfg, env, diag)?;

    if args.print {
        print_rpdo(&dev)?;
        print_tpdo(&dev)?;
    }

    Ok(true)
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    let mut diag = Diagnostics::new();
    let result = run(&args, &mut diag);
    report_warnings(&diag);
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
