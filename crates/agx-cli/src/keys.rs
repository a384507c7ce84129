//! # Keys Subcommand
//!
//! `generate` creates a secp256k1 attestor key and prints it once;
//! `address` shows which account the key in `AGX_ATTESTOR_KEY` signs as.

use agx_crypto::{AttestationSigner, LocalKeySigner};
use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::config::ATTESTOR_KEY_VAR;
use crate::runtime::env_signer;

/// Arguments for `agx keys`.
#[derive(Args, Debug)]
pub struct KeysArgs {
    #[command(subcommand)]
    pub command: KeysCommand,
}

/// Key subcommands.
#[derive(Subcommand, Debug)]
pub enum KeysCommand {
    /// Generate a new attestor key.
    Generate,
    /// Print the address of the configured attestor key.
    Address,
}

#[derive(Debug, Serialize)]
struct GeneratedKey {
    address: String,
    secret_key: String,
}

/// Entry point for `agx keys`.
pub fn run_keys(args: &KeysArgs) -> Result<u8> {
    match args.command {
        KeysCommand::Generate => {
            let signer = LocalKeySigner::generate();
            let out = GeneratedKey {
                address: signer.address().to_string(),
                secret_key: format!("0x{}", signer.secret_hex().as_str()),
            };
            eprintln!("Store secret_key in {ATTESTOR_KEY_VAR}; it is not shown again.");
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        KeysCommand::Address => {
            let signer = env_signer()?;
            println!("{}", signer.address());
        }
    }
    Ok(0)
}
