#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    recursive: bool,
    inputs: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    cadre::app::run_with_startup(cadre::app::AppStartupOptions {
        inputs: args.inputs,
        recursive: args.recursive,
    })
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "-r" | "--recursive" => out.recursive = true,
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--" => {
                out.inputs.extend(args[index + 1..].iter().cloned());
                break;
            }
            other if other.starts_with('-') && other.len() > 1 => {
                anyhow::bail!("unknown argument {other}")
            }
            other => out.inputs.push(other.to_string()),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("cadre [options] [files, folders or urls...]");
    println!("  -r, --recursive   Descend into subfolders of folder inputs");
    println!("  -h, --help        Show this help");
    println!();
    println!("Log level is read from {}.", cadre::logging::LOG_ENV);
}
