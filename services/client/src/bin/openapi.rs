//! services/client/src/bin/openapi.rs
//!
//! Prints or saves the OpenAPI description of the callback server.

use std::path::PathBuf;

use clap::Parser;
use client_lib::{error::ClientError, web::rest::ApiDoc};
use utoipa::OpenApi;

#[derive(Parser)]
#[command(name = "openapi")]
#[command(about = "Export the callback server's OpenAPI description")]
struct Args {
    /// File to write; `-` prints to stdout
    #[arg(short, long, default_value = "openapi.json")]
    output: PathBuf,
}

fn main() -> Result<(), ClientError> {
    let args = Args::parse();
    let document = ApiDoc::openapi()
        .to_pretty_json()
        .map_err(|e| ClientError::Internal(format!("Failed to serialize OpenAPI document: {e}")))?;

    if args.output.as_os_str() == "-" {
        println!("{document}");
    } else {
        std::fs::write(&args.output, document)?;
        eprintln!("Wrote {}", args.output.display());
    }
    Ok(())
}
