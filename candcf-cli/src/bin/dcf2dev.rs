//! Generate a static C device description from an EDS/DCF file

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use candcf_cli::render::{write_device_header, write_device_source};
use candcf_cli::report_warnings;
use candcf_core::data_type::DataType;
use candcf_core::device::Device;
use candcf_core::diag::Diagnostics;
use candcf_core::value::{parse_ticks, Env, TypedValue, ValueError};
use candcf_gen::cdevice::{self, CDevice};

#[derive(Parser)]
#[command(about = "Generate a static C device description from an EDS/DCF file")]
struct Args {
    /// Do not include optional strings in the output
    #[arg(long)]
    no_strings: bool,
    /// Add '#include <config.h>' to the output
    #[arg(long)]
    include_config: bool,
    /// Generate the header with the declaration instead of the definition
    #[arg(long)]
    header: bool,
    /// Use INDEX for the ECSS SCET time data type
    #[arg(long, value_name = "INDEX")]
    deftype_time_scet: Option<u16>,
    /// Use INDEX for the ECSS SUTC time data type
    #[arg(long, value_name = "INDEX")]
    deftype_time_sutc: Option<u16>,
    /// Write the output to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
    /// The EDS/DCF file
    filename: PathBuf,
    /// The variable name of the generated device description
    name: String,
}

fn parse_time_scet(literal: &str) -> Result<TypedValue, ValueError> {
    // seconds, subseconds
    parse_ticks(literal, 2).map(TypedValue::Ticks)
}

fn parse_time_sutc(literal: &str) -> Result<TypedValue, ValueError> {
    // days, ms, usec
    parse_ticks(literal, 3).map(TypedValue::Ticks)
}

fn run(args: &Args, diag: &mut Diagnostics) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(index) = args.deftype_time_scet {
        DataType::add_custom(index, "TIME_SCET", parse_time_scet)?;
        cdevice::add_custom_format(index, "scet", |t| {
            format!("{{ .subseconds = {}, .seconds = {} }}", t[1], t[0])
        });
    }
    if let Some(index) = args.deftype_time_sutc {
        DataType::add_custom(index, "TIME_SUTC", parse_time_sutc)?;
        cdevice::add_custom_format(index, "sutc", |t| {
            format!("{{ .usec = {}, .ms = {}, .days = {} }}", t[2], t[1], t[0])
        });
    }

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) if path.as_os_str() != "-" => Box::new(std::fs::File::create(path)?),
        _ => Box::new(std::io::stdout()),
    };

    if args.header {
        write_device_header(&mut out, &args.name)?;
        return Ok(());
    }

    let env = Env::from([("NODEID".to_string(), 255)]);
    let dev = Device::from_dcf(&args.filename, env, diag, true)?;

    let cdev = CDevice::from_device(&dev)?;
    write_device_source(
        &mut out,
        &cdev,
        &args.name,
        args.no_strings,
        args.include_config,
    )?;
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
