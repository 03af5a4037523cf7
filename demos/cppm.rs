//! Small command line front end for the ClearPass client.
//!
//! Session state is passed through the environment (`CPPM_SERVER`,
//! `CPPM_TOKEN`, `CPPM_REFRESH`, `CPPM_COOKIE`); `login` and `web-login`
//! print the variables to export for the following commands.

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cppm_client::{ClientCredentials, CppmClientBuilder, Filter, Tokens};
use http::Method;
use secrecy::ExposeSecret;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Appliance address, host or host:port.
    #[arg(short = 's', long, env = "CPPM_SERVER")]
    server: Option<String>,

    /// Skip TLS certificate verification.
    #[arg(short = 'k', long)]
    insecure: bool,

    #[arg(long, env = "CPPM_CLIENT_ID", default_value = "cppm-client")]
    client_id: String,

    #[arg(long, env = "CPPM_CLIENT_SECRET", default_value = "")]
    client_secret: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Obtain an API token.
    Login {
        #[arg(short = 'u', long)]
        username: Option<String>,
        #[arg(short = 'p', long, env = "CPPM_PASSWORD")]
        password: Option<String>,
    },
    /// Check (and refresh) the cached API token.
    Validate,
    /// GET an API path and print every item.
    Get {
        path: String,
        /// `field`, `field=value` or `field={json}`; repeatable.
        #[arg(short = 'f', long = "filter")]
        filters: Vec<String>,
        #[arg(long)]
        page_size: Option<u32>,
    },
    /// Log into the web interface.
    WebLogin {
        #[arg(short = 'u', long)]
        username: String,
        #[arg(short = 'p', long, env = "CPPM_PASSWORD")]
        password: String,
    },
    /// Log out of the web interface.
    WebLogout,
    /// Export a resource type to a file.
    Export {
        resource: String,
        #[arg(long, default_value = "")]
        password: String,
        /// Directory to write into.
        #[arg(short = 'o', long, default_value = ".")]
        output: PathBuf,
    },
    /// Import a previously exported file.
    Import {
        file: PathBuf,
        resource: String,
        #[arg(long, default_value = "")]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let cli = Cli::parse();

    let mut builder = CppmClientBuilder::from_env()?;
    if let Some(server) = &cli.server {
        builder = builder.address(server);
    }
    if cli.insecure {
        builder = builder.accept_invalid_certs(true);
    }
    let client = builder.build()?;
    let credentials = ClientCredentials::new(&cli.client_id).secret(&cli.client_secret);

    match cli.command {
        Commands::Login { username, password } => {
            let credentials = match (username, password) {
                (Some(username), Some(password)) => credentials.user(username, password),
                _ => credentials,
            };
            print_tokens(&client.login(&credentials).await?);
        }
        Commands::Validate => {
            let token = client.token().ok_or("CPPM_TOKEN is not set")?;
            let refresh = client.refresh_token();
            let cached = Tokens::new(
                token.expose_secret(),
                refresh.as_ref().map(|r| r.expose_secret()),
            );
            print_tokens(&client.validate(&credentials, &cached).await?);
        }
        Commands::Get {
            path,
            filters,
            page_size,
        } => {
            let mut filter = Filter::new();
            for arg in &filters {
                filter.parse_arg(arg)?;
            }
            let mut request = client.request(Method::GET, path).filter(filter);
            if let Some(page_size) = page_size {
                request = request.page_size(page_size);
            }
            let mut reply = request.send().await;
            while reply.advance().await {
                if let Some(item) = reply.current() {
                    println!("{}", serde_json::to_string_pretty(item)?);
                }
            }
            if let Some(err) = reply.last_error() {
                eprintln!("{err}");
                std::process::exit(1);
            }
        }
        Commands::WebLogin { username, password } => {
            let cookies = client.web_login(&username, &password).await?;
            println!("export CPPM_COOKIE='{}'", serde_json::to_string(&cookies)?);
        }
        Commands::WebLogout => {
            client.web_logout().await?;
            println!("unset CPPM_COOKIE");
        }
        Commands::Export {
            resource,
            password,
            output,
        } => {
            let mut export = client.export(&resource, &password).await?;
            let target = output.join(export.filename());
            let mut file = tokio::fs::File::create(&target).await?;
            let size = export.copy_to(&mut file).await?;
            println!("wrote {size} bytes to {}", target.display());
        }
        Commands::Import {
            file,
            resource,
            password,
        } => {
            client.import(&file, &resource, &password).await?;
            println!("imported {}", file.display());
        }
    }

    Ok(())
}

fn print_tokens(tokens: &Tokens) {
    println!("export CPPM_TOKEN={}", tokens.access_token.expose_secret());
    match &tokens.refresh_token {
        Some(refresh) => println!("export CPPM_REFRESH={}", refresh.expose_secret()),
        None => println!("unset CPPM_REFRESH"),
    }
}
