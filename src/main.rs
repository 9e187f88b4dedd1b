use std::path::{Path, PathBuf};
use std::process::ExitCode;

use atty::Stream;
use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

use ndt_cfn::aws::AwsProvider;
use ndt_cfn::includes::IncludeResolver;
use ndt_cfn::properties::{ParameterQuery, PropertyLoader};
use ndt_cfn::provider::{CloudProvider, StaticProvider};
use ndt_cfn::template;
use ndt_cfn::{Error, PreprocessingSession, SessionOptions};

#[derive(Parser)]
#[command(name = "ndt-cfn")]
#[command(version)]
#[command(about = "Expands nitor-deploy-tools YAML templates into CloudFormation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Do not call AWS; region and account are read from REGION and ACCOUNT_ID
    #[arg(long, global = true)]
    offline: bool,

    /// Colon separated directories searched for includes
    #[arg(long, global = true, env = "CF_TEMPLATE_INCLUDE")]
    include_path: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a YAML template into CloudFormation JSON
    YamlToJson {
        template: PathBuf,

        /// Print without whitespace
        #[arg(long)]
        small: bool,

        /// Documents the template is merged on top of, in order
        #[arg(long, short)]
        merge: Vec<PathBuf>,
    },

    /// Expand a YAML template and print it as YAML
    YamlToYaml { template: PathBuf },

    /// Convert CloudFormation JSON to YAML, exporting embedded scripts
    JsonToYaml { template: PathBuf },

    /// Print the parameters loaded from infra*.properties files
    LoadParameters {
        #[arg(long, short)]
        component: Option<String>,
        #[arg(long, short)]
        stack: Option<String>,
        #[arg(long)]
        serverless: Option<String>,
        #[arg(long, short)]
        docker: Option<String>,
        #[arg(long, short)]
        image: Option<String>,
        #[arg(long, short)]
        branch: Option<String>,
    },

    /// Print the path an include resolves to
    ResolveInclude { name: String },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let includes = IncludeResolver::from_path_list(cli.include_path.as_deref());

    match cli.command {
        Commands::YamlToJson {
            template,
            small,
            merge,
        } => {
            let provider = provider(cli.offline)?;
            let mut session = session(provider.as_ref(), includes);
            let json = if small {
                template::yaml_to_json_small(&template, &merge, &mut session)?
            } else {
                template::yaml_to_json(&template, &merge, &mut session)?
            };
            println!("{}", json);
        }
        Commands::YamlToYaml { template } => {
            let provider = provider(cli.offline)?;
            let mut session = session(provider.as_ref(), includes);
            print!("{}", template::yaml_to_yaml(&template, &mut session)?);
        }
        Commands::JsonToYaml { template } => {
            print!("{}", template::json_to_yaml(&template)?);
        }
        Commands::LoadParameters {
            component,
            stack,
            serverless,
            docker,
            image,
            branch,
        } => {
            let provider = provider(cli.offline)?;
            let query = ParameterQuery {
                component,
                stack,
                serverless,
                docker,
                image,
                branch,
            };
            let loaded = PropertyLoader::new(".", provider.as_ref()).load_parameters(&query)?;
            for (key, value) in loaded {
                println!("{}={}", key, value);
            }
        }
        Commands::ResolveInclude { name } => match includes.find_include(&name) {
            Some(path) => println!("{}", path.display()),
            None => return Err(Error::IncludeNotFound(name)),
        },
    }
    Ok(())
}

fn provider(offline: bool) -> Result<Box<dyn CloudProvider>, Error> {
    if offline {
        Ok(Box::new(StaticProvider::from_env()))
    } else {
        Ok(Box::new(AwsProvider::new()?))
    }
}

fn session(provider: &dyn CloudProvider, includes: IncludeResolver) -> PreprocessingSession<'_> {
    let options = SessionOptions {
        includes,
        project_root: Path::new(".").to_path_buf(),
        sourced: None,
    };
    PreprocessingSession::new(provider, options)
}

fn report(err: &Error) {
    let tag = if atty::is(Stream::Stderr) {
        style("ERROR").red().bold().to_string()
    } else {
        "ERROR".to_string()
    };
    match err {
        Error::Aggregated(diagnostics) => {
            for diagnostic in diagnostics {
                eprintln!("{}: {}: {}", tag, diagnostic.path, diagnostic.message);
            }
        }
        other => eprintln!("{}: {}", tag, other),
    }
}
