//! CLI argument surface, grounded on the `app_from_crate!` usage in the
//! teacher's `connection-dropper` binary.

use clap::{app_from_crate, crate_authors, crate_description, crate_name, crate_version, Arg};

/// Parsed command-line overrides; `None` means "use config/env default".
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub interface: Option<String>,
    pub daemonize: bool,
    pub resource_path: Option<String>,
    pub debug_level: Option<String>,
}

/// Parses `std::env::args()` into [`CliOverrides`].
///
/// # Panics
///
/// If `--port` is supplied but isn't a valid `u16` (clap's validator
/// rejects the argument before this function is reached only if a
/// validator is attached; here we parse explicitly and panic with a
/// message clap would have shown, keeping error text in one place).
#[must_use]
pub fn parse() -> CliOverrides {
    let matches = app_from_crate!()
        .about("Live network telemetry appliance")
        .arg(
            Arg::with_name("port")
                .long("port")
                .takes_value(true)
                .help("TCP port the WebSocket/HTTP server listens on"),
        )
        .arg(
            Arg::with_name("interface")
                .long("interface")
                .takes_value(true)
                .help("Network interface to sample on startup"),
        )
        .arg(
            Arg::with_name("daemonize")
                .long("daemonize")
                .help("Detach and run in the background"),
        )
        .arg(
            Arg::with_name("resource_path")
                .long("resource_path")
                .takes_value(true)
                .help("Directory serving the static browser UI"),
        )
        .arg(
            Arg::with_name("debug")
                .long("debug")
                .takes_value(true)
                .help("Log level: trace, debug, info, warning, error"),
        )
        .get_matches();

    CliOverrides {
        port: matches
            .value_of("port")
            .map(|p| p.parse().expect("--port must be a valid TCP port number")),
        interface: matches.value_of("interface").map(str::to_owned),
        daemonize: matches.is_present("daemonize"),
        resource_path: matches.value_of("resource_path").map(str::to_owned),
        debug_level: matches.value_of("debug").map(str::to_owned),
    }
}
