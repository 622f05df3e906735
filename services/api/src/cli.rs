use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use fonds_argile::config::AppConfig;
use fonds_argile::error::AppError;
use fonds_argile::workflows::parcours::simulation::RgaCipher;

#[derive(Parser, Debug)]
#[command(
    name = "Fonds Prévention Argile",
    about = "Run the Fonds Prévention Argile service and its support tooling",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Seal or open simulator hand-off payloads with the configured key
    Simulation {
        #[command(subcommand)]
        command: SimulationCommand,
    },
    /// Run an end-to-end journey against in-memory collaborators
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum SimulationCommand {
    /// Encrypt simulator answers given as a JSON object
    Encrypt {
        /// Simulator answers, e.g. '{"logement":{"adresse":"..."}}'
        #[arg(long)]
        json: String,
    },
    /// Decrypt a hand-off payload and print the answers
    Decrypt {
        /// URL-safe payload produced by `encrypt` or the simulator
        encrypted: String,
    },
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Simulation { command } => run_simulation(command),
        Command::Demo(args) => run_demo(args).await,
    }
}

fn run_simulation(command: SimulationCommand) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    if config.simulation.generated_key {
        eprintln!("warning: RGA_ENCRYPTION_KEY is not set, using a throwaway key");
    }
    let cipher = RgaCipher::new(&config.simulation.encryption_key);

    match command {
        SimulationCommand::Encrypt { json } => {
            let value: serde_json::Value = serde_json::from_str(&json)?;
            let sealed = cipher.encrypt_value(Some(&value))?;
            println!("{}", sealed.encrypted);
        }
        SimulationCommand::Decrypt { encrypted } => {
            let data = cipher.decrypt(&encrypted)?;
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["fonds-argile-api"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn simulation_subcommands_parse() {
        let cli = Cli::try_parse_from([
            "fonds-argile-api",
            "simulation",
            "encrypt",
            "--json",
            "{\"logement\":{\"adresse\":\"1 rue Haute\"}}",
        ])
        .expect("parses");
        assert!(matches!(
            cli.command,
            Some(Command::Simulation {
                command: SimulationCommand::Encrypt { .. }
            })
        ));

        let cli = Cli::try_parse_from(["fonds-argile-api", "simulation", "decrypt", "abc"])
            .expect("parses");
        assert!(matches!(
            cli.command,
            Some(Command::Simulation {
                command: SimulationCommand::Decrypt { ref encrypted }
            }) if encrypted == "abc"
        ));
    }

    #[test]
    fn demo_flags_parse() {
        let cli = Cli::try_parse_from(["fonds-argile-api", "demo", "--outage", "--refuse-amo"])
            .expect("parses");
        match cli.command {
            Some(Command::Demo(args)) => {
                assert!(args.outage);
                assert!(args.refuse_amo);
            }
            other => panic!("expected demo command, got {other:?}"),
        }
    }
}
