use clap::Parser;
use cimcrypto::{keygen, save_json, RegistryId};

/// Generate the registry service Paillier keypair.
#[derive(Parser, Debug)]
struct Opt {
    /// Output directory
    #[arg(long, default_value = "./keys")]
    out: String,
    /// Key size in bits
    #[arg(long, default_value_t = 2048)]
    bits: u32,
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    std::fs::create_dir_all(&opt.out)?;
    let (pk, sk) = keygen(opt.bits, &mut rand::rngs::OsRng);
    save_json(&format!("{}/service_pub.json", opt.out), &pk)?;
    save_json(&format!("{}/service_priv.json", opt.out), &sk)?;
    println!("Wrote service keys to {}", opt.out);
    println!("Registry id: {}", RegistryId::from_service_key(&pk));
    Ok(())
}
