use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "octopus")]
#[command(about = "octopus - PostgreSQL wire protocol gateway federating queries over registered data sources", long_about = None)]
pub struct Config {
    // Listener configuration
    #[arg(long, default_value = "0.0.0.0", env = "OCTOPUS_LISTEN_ADDRESS")]
    pub listen_address: String,

    #[arg(short, long, default_value = "58000", env = "OCTOPUS_PORT")]
    pub port: u16,

    #[arg(long, default_value = "info", env = "OCTOPUS_LOG_LEVEL")]
    pub log_level: String,

    #[arg(long, default_value = "100", env = "OCTOPUS_MAX_CONNECTIONS", help = "Connections beyond this count are rejected with TOO_MANY_CONNECTIONS")]
    pub max_connections: usize,

    // Catalog bootstrap
    #[arg(long, default_value = "octopus", env = "OCTOPUS_SUPERUSER", help = "Name of the user created when the catalog starts empty")]
    pub superuser: String,

    #[arg(long, default_value = "bitnine", env = "OCTOPUS_SUPERUSER_PASSWORD", help = "Password of the bootstrap user (stored and compared in plaintext)")]
    pub superuser_password: String,

    #[arg(
        long = "datasource",
        value_name = "NAME=URL",
        env = "OCTOPUS_DATASOURCES",
        value_delimiter = ',',
        help = "Data source registered at startup, e.g. sales=jdbc:sqlite:/data/sales.db"
    )]
    pub datasources: Vec<String>,
}

impl Config {
    /// Get a configuration instance with all values resolved from CLI args and environment variables
    pub fn load() -> Self {
        Config::parse()
    }

    /// Split the `--datasource` entries into `(name, url)` pairs.
    pub fn datasource_entries(&self) -> Result<Vec<(String, String)>, String> {
        self.datasources
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
                    Ok((name.trim().to_string(), url.trim().to_string()))
                }
                _ => Err(format!("invalid data source entry '{entry}', expected NAME=URL")),
            })
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["octopus"])
    }
}
