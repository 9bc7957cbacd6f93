use clap::Parser;
use env_logger::Env;
use log::{error, info};
use utxo_snapshot::{Cli, Command};

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("start");

    let result = match cli.command {
        Command::ExportBalance(config) => utxo_snapshot::export_balance(&config),
        Command::ExportRdf(config) => utxo_snapshot::export_rdf(&config),
    };

    match result {
        Ok(()) => info!("end"),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bitcoin::Network;
    use clap::Parser;

    #[test]
    fn test_parse_export_balance() {
        let cli = Cli::parse_from([
            "utxo-snapshot",
            "export-balance",
            "--block",
            "700000",
            "--snapshot",
            "100",
            "--datadir",
            "/data/bitcoin",
            "--magic",
            "bitcoin",
            "--outdir",
            "/out",
        ]);
        match cli.command {
            Command::ExportBalance(config) => {
                assert_eq!(config.block, 700_000);
                assert_eq!(config.snapshot, 100);
                assert_eq!(config.magic, Network::Bitcoin);
            }
            Command::ExportRdf(_) => panic!("wrong subcommand parsed"),
        }
    }

    #[test]
    fn test_parse_export_rdf() {
        let cli = Cli::parse_from([
            "utxo-snapshot",
            "export-rdf",
            "--datadir",
            "/data/bitcoin",
            "--magic",
            "testnet",
            "--outdir",
            "/out",
        ]);
        match cli.command {
            Command::ExportRdf(config) => assert_eq!(config.magic, Network::Testnet),
            Command::ExportBalance(_) => panic!("wrong subcommand parsed"),
        }
    }
}
