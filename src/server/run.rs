// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use clap::Arg;
use tokio::runtime::Runtime;

use super::ServerContext;
use crate::config::Config;
use crate::error::{Error, ErrorKind};
use crate::log::init_log;

pub const DEFAULT_CONFIG: &str = "/etc/tianhe/tianhe.toml";

/// Entry point of server.
///
/// # Errors
///
/// Returns error if the config file is invalid or the broker fails to
/// start.
pub fn run_server() -> Result<(), Error> {
    let matches = clap::App::new("Tianhe")
        .version("0.1.2")
        .author("Tianhe Project Authors")
        .about("Distributed MQTT broker")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("config_file")
                .takes_value(true)
                .help("Specify config file path"),
        )
        .arg(
            Arg::with_name("test")
                .short("t")
                .long("test")
                .takes_value(false)
                .help("Test config file"),
        )
        .get_matches();

    let config_file = matches.value_of("config").unwrap_or(DEFAULT_CONFIG);
    let config = if std::path::Path::new(config_file).exists() {
        let config_content = std::fs::read_to_string(config_file)?;
        toml::from_str(&config_content).map_err(|err| {
            Error::from_string(ErrorKind::ConfigError, format!("Invalid config: {err:?}"))
        })?
    } else if matches.is_present("config") {
        return Err(Error::from_string(
            ErrorKind::ConfigError,
            format!("Config file not found: {config_file}"),
        ));
    } else {
        Config::default()
    };

    if matches.is_present("test") {
        println!("The configuration file {config_file} syntax is Ok");
        return Ok(());
    }

    init_log(config.log())?;

    let mut server = ServerContext::new(config);
    let runtime = Runtime::new()?;
    server.run_loop(&runtime)
}

/// Run server with a prepared config.
///
/// Useful for integration tests.
///
/// # Errors
///
/// Returns error if the broker fails to start.
pub fn run_server_with_config(config: Config) -> Result<(), Error> {
    init_log(config.log())?;
    let mut server = ServerContext::new(config);
    let runtime = Runtime::new()?;
    server.run_loop(&runtime)
}
