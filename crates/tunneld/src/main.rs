//! Binary entry point.
//!
//! Parses up to two positional arguments by hand (no `clap`): the path to
//! the configuration file, defaulting to a compiled-in path, and an
//! optional second argument some platforms use to select a configuration
//! section. Exit codes: 0 normal exit, 1 startup/configuration failure, 3
//! signal-initiated termination.

const DEFAULT_CONFIG_PATH: &str = "/etc/tunneld/tunneld.toml";

fn main() {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let _section = args.next();

    let config = match tunnel_config::load_file(std::path::Path::new(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tunneld: {e}");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("tunneld: failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    let exit_code = runtime.block_on(tunneld::run(config));
    std::process::exit(exit_code);
}
