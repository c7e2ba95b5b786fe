//! filegate client CLI
//!
//! Connects, authenticates, runs one action and disconnects.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write as _;
use std::path::Path;

use filegate::cli::{Action, ClientOpts};
use filegate::logger::setup_logging;
use filegate::{Client, Outcome};

#[tokio::main]
async fn main() -> Result<()> {
    let opts = ClientOpts::parse();
    setup_logging(opts.verbose);

    let mut client = Client::new(opts.host.clone(), opts.port);
    if client.connect().await == Outcome::CannotConnect {
        bail!("cannot connect to {}:{}", opts.host, opts.port);
    }
    if client.send_password(&opts.password).await? != Outcome::Ok {
        let _ = client.client_exit().await;
        bail!("authentication failed");
    }

    let result = run_action(&mut client, &opts.action).await;
    if client.is_connected() {
        let _ = client.client_exit().await;
    }
    result
}

async fn run_action(client: &mut Client, action: &Action) -> Result<()> {
    match action {
        Action::Ls => match client.list_directory().await? {
            Outcome::DirectoryListing(listing) => {
                for name in listing.split_whitespace() {
                    println!("{}", name);
                }
            }
            other => bail!("cannot list directory: {:?}", other),
        },
        Action::Put { local, name } => {
            let content = std::fs::read_to_string(local)
                .with_context(|| format!("read {}", local.display()))?;
            let remote = match name {
                Some(name) => name.clone(),
                None => file_name_of(local)?,
            };
            match client.send_file(&remote, &content).await? {
                Outcome::Ok => println!("stored {}", remote),
                other => bail!("cannot send {}: {:?}", remote, other),
            }
        }
        Action::Get { name, out } => match client.receive_file(name).await? {
            Outcome::FileContent(text) => match out {
                Some(path) => std::fs::write(path, text)
                    .with_context(|| format!("write {}", path.display()))?,
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(text.as_bytes())?;
                    stdout.flush()?;
                }
            },
            other => bail!("cannot receive {}: {:?}", name, other),
        },
        Action::Shutdown => match client.server_exit().await? {
            Outcome::Ok => println!("server stopped"),
            other => bail!("shutdown refused: {:?}", other),
        },
    }
    Ok(())
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}
