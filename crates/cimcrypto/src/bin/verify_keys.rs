use clap::Parser;
use cimcrypto::{hash_key, load_json, PaillierPrivateKey, PaillierPublicKey, RegistryId};

/// Sanity-check service key files and print the pinning material.
#[derive(Parser, Debug)]
struct Opt {
    #[arg(long)]
    service_pub: String,
    #[arg(long)]
    service_priv: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    let pk: PaillierPublicKey = load_json(&opt.service_pub)?;
    println!("Public key hash: {}", hash_key(&pk));
    println!("Registry id: {}", RegistryId::from_service_key(&pk));
    if let Some(sk_path) = opt.service_priv {
        let sk: PaillierPrivateKey = load_json(&sk_path)?;
        anyhow::ensure!(sk.n == pk.n, "private key modulus does not match public key");
        println!("Private key file looks well-formed.");
    }
    Ok(())
}
