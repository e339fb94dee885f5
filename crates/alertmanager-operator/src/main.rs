use std::path::{Path, PathBuf};

use alertmanager_config::validation;
use alertmanager_operator::{
    cli::{self, Command, RenderArguments},
    constants::{APP_NAME, LOG_ENV},
    logging,
    reconciler::{self, DesiredState},
    remote,
};
use clap::Parser;
use snafu::{ResultExt, Snafu};
use tracing::info;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to load the inputs"))]
    LoadInputs { source: cli::Error },

    #[snafu(display("failed to compute the desired state"))]
    ComputeDesiredState { source: reconciler::Error },

    #[snafu(display("failed to create directory {path:?}"))]
    CreateDirectory {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to write {path:?}"))]
    WriteFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to load {path:?}"))]
    LoadConfig {
        source: remote::Error,
        path: PathBuf,
    },

    #[snafu(display("{path:?} is not a valid config"))]
    InvalidConfig {
        source: validation::Errors,
        path: PathBuf,
    },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let command = Command::parse();
    logging::initialize_logging(LOG_ENV, APP_NAME).context(InitializeLoggingSnafu)?;

    match command {
        Command::Render(arguments) => render(arguments).await,
        Command::Validate(arguments) => validate(&arguments.file).await,
        Command::CommandLine(arguments) => {
            let inputs = arguments.load().await.context(LoadInputsSnafu)?;
            let desired = DesiredState::compute(&inputs).context(ComputeDesiredStateSnafu)?;
            println!("{}", desired.settings.command(&desired.peer_addresses));
            Ok(())
        }
    }
}

async fn render(arguments: RenderArguments) -> Result<(), Error> {
    let inputs = arguments.inputs.load().await.context(LoadInputsSnafu)?;
    let desired = DesiredState::compute(&inputs).context(ComputeDesiredStateSnafu)?;

    for path in desired.manifest.paths() {
        // Tombstones have nothing to render.
        let Some(Some(content)) = desired.manifest.get(path) else {
            continue;
        };

        match &arguments.output_dir {
            Some(output_dir) => {
                let target = output_dir.join(path.trim_start_matches('/'));
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .context(CreateDirectorySnafu { path: parent })?;
                }
                tokio::fs::write(&target, content)
                    .await
                    .context(WriteFileSnafu { path: &target })?;
                info!(path = %target.display(), "rendered file");
            }
            None => println!("# {path}\n{content}"),
        }
    }
    Ok(())
}

async fn validate(file: &Path) -> Result<(), Error> {
    let configuration = remote::load_config_file(file)
        .await
        .context(LoadConfigSnafu { path: file })?;

    validation::validate_main_keys(&configuration.config)
        .and_then(|()| validation::validate(&configuration.config))
        .context(InvalidConfigSnafu { path: file })?;

    info!(
        path = %file.display(),
        templates = configuration.templates.len(),
        "config is valid"
    );
    Ok(())
}
