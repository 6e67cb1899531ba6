// cimnode/src/bin/client.rs
// Operator client for the registry:
// - QUIC/TLS with pinned server cert, optional registry-id pinning
// - Builds encrypted inputs locally; plaintext interests never leave here
// - Subcommands mirror the registry surface: submit, request-match,
//   list-players, has-prefs, get-match, decrypt-match

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use std::time::{SystemTime, UNIX_EPOCH};
use std::{fs, net::SocketAddr, path::Path, path::PathBuf};

use cimnode::{
    make_client_config_with_root, match_signing_bytes, read_msg, send_frame, submit_signing_bytes,
    Hello, Msg, ServiceInfo, PAD_TO_DECRYPT, PAD_TO_HELLO, PAD_TO_MATCH, PAD_TO_QUERY,
    PAD_TO_SUBMIT, PROTO_VER,
};

use cimcrypto::access::key_fingerprint;
use cimcrypto::input::EncryptedInputBuilder;
use cimcrypto::{dec, keygen, DecryptionAuthorization, Identity};
use cimproto::{
    HasPrefsReq, MatchGetReq, MatchReq, PlayersReq, SubmitReq, UserDecryptReq,
};
use ed25519_dalek::{Signer, SigningKey};
use quinn::Endpoint;
use rustls::pki_types::CertificateDer;
use serde::{Deserialize, Serialize};

#[derive(Debug, Parser)]
struct Opt {
    /// registryd QUIC address, e.g. 127.0.0.1:9300
    #[arg(long, default_value = "127.0.0.1:9300")]
    peer: SocketAddr,

    /// Path to the server certificate (DER). Use --cert-out on registryd to export.
    #[arg(long)]
    server_cert: Option<PathBuf>,

    /// Identity key file created with `client keygen`
    #[arg(long, default_value = "./identity.json")]
    key: PathBuf,

    /// Optional expected registry id (0x…) for pinning
    #[arg(long)]
    expect_registry_id: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Generate the ledger identity signing key
    Keygen,
    /// Submit encrypted interests, e.g. --values 1,4,7
    Submit {
        /// Comma separated interest identifiers
        #[arg(long)]
        values: String,
    },
    /// Request an encrypted match indicator versus a candidate
    RequestMatch {
        #[arg(long)]
        candidate: String,
    },
    /// List all registered player addresses
    ListPlayers,
    /// Check whether an identity has preferences (defaults to own identity)
    HasPrefs {
        #[arg(long)]
        identity: Option<String>,
    },
    /// Fetch the last computed match handle versus a candidate
    GetMatch {
        #[arg(long)]
        candidate: String,
    },
    /// Fetch and decrypt the last computed match versus a candidate
    DecryptMatch {
        #[arg(long)]
        candidate: String,
        /// Authorization validity in whole days
        #[arg(long, default_value_t = 1)]
        duration_days: u32,
        /// Ephemeral reveal key size in bits
        #[arg(long, default_value_t = 1024)]
        reveal_bits: u32,
    },
}

#[derive(Serialize, Deserialize)]
struct IdentityKeyFile {
    signing_key: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    if let Cmd::Keygen = opt.cmd {
        return keygen_identity(&opt.key);
    }

    let signing_key = load_identity(&opt.key)?;
    let identity = Identity::from_verifying_key(&signing_key.verifying_key());

    let cert_path = opt
        .server_cert
        .as_ref()
        .ok_or_else(|| anyhow!("--server-cert is required for this command"))?;
    let der_bytes = fs::read(cert_path)
        .map_err(|e| anyhow!("failed to read server cert {:?}: {}", cert_path, e))?;
    let server_cert = CertificateDer::from(der_bytes);

    let client_cfg = make_client_config_with_root(&server_cert)?;
    let mut endpoint = Endpoint::client("0.0.0.0:0".parse()?)?;
    endpoint.set_default_client_config(client_cfg);

    let conn = endpoint
        .connect(opt.peer, "cim-registry")?
        .await
        .map_err(|e| anyhow!("connect failed: {}", e))?;
    let (mut send, mut recv) = conn.open_bi().await?;

    // Handshake: Hello -> ServiceInfo (service pk, registry id, scheme)
    let hello = Msg::Hello(Hello {
        proto_ver: PROTO_VER,
        features: 0u64,
        client_nonce: rand::random::<[u8; 16]>(),
    });
    send_frame(&mut send, &hello, PAD_TO_HELLO).await?;
    let info = wait_service_info(&mut recv).await?;
    eprintln!("[client] registry id: {}", info.registry_id);
    if let Some(expected) = &opt.expect_registry_id {
        let expected = Identity::from_hex(expected)
            .map_err(|e| anyhow!("bad --expect-registry-id: {e}"))?;
        if expected.0 != info.registry_id.0 {
            bail!(
                "registry id mismatch: got {}, expected 0x{}",
                info.registry_id,
                hex::encode(expected.0)
            );
        }
    }

    match &opt.cmd {
        Cmd::Keygen => unreachable!("handled above"),

        Cmd::Submit { values } => {
            let interests = parse_three(values)?;
            let mut builder = EncryptedInputBuilder::new(info.registry_id, identity);
            for v in &interests {
                builder.add_u32(*v)?;
            }
            let input = builder.encrypt(&info.pk, &mut rand::rngs::OsRng);
            let signature = signing_key
                .sign(&submit_signing_bytes(&info.registry_id, &input.proof))
                .to_bytes()
                .to_vec();
            let req = SubmitReq {
                owner_key: signing_key.verifying_key().to_bytes(),
                handles: input.handles,
                proof: input.proof,
                signature,
            };
            send_frame(&mut send, &Msg::Submit(req), PAD_TO_SUBMIT).await?;
            match expect_reply(&mut recv).await? {
                Msg::SubmitOk(resp) => {
                    println!("Preferences registered for {} at {}", resp.owner, resp.timestamp);
                }
                m => bail!("unexpected reply to Submit: {m:?}"),
            }
        }

        Cmd::RequestMatch { candidate } => {
            let candidate = Identity::from_hex(candidate)?;
            let signature = signing_key
                .sign(&match_signing_bytes(&info.registry_id, &candidate))
                .to_bytes()
                .to_vec();
            let req = MatchReq {
                requester_key: signing_key.verifying_key().to_bytes(),
                candidate,
                signature,
            };
            send_frame(&mut send, &Msg::RequestMatch(req), PAD_TO_MATCH).await?;
            match expect_reply(&mut recv).await? {
                Msg::MatchReady(resp) => {
                    println!(
                        "Encrypted indicator: {:?}",
                        cimcrypto::HandleId::of(&resp.indicator)
                    );
                    println!("Decrypt it with: client decrypt-match --candidate {candidate}");
                }
                m => bail!("unexpected reply to RequestMatch: {m:?}"),
            }
        }

        Cmd::ListPlayers => {
            send_frame(&mut send, &Msg::ListPlayers(PlayersReq {}), PAD_TO_QUERY).await?;
            match expect_reply(&mut recv).await? {
                Msg::PlayersOk(resp) => {
                    if resp.players.is_empty() {
                        println!("No registered players yet");
                    } else {
                        println!("Registered players:");
                        for (index, player) in resp.players.iter().enumerate() {
                            println!("{}. {}", index + 1, player);
                        }
                    }
                }
                m => bail!("unexpected reply to ListPlayers: {m:?}"),
            }
        }

        Cmd::HasPrefs { identity: target } => {
            let target = match target {
                Some(s) => Identity::from_hex(s)?,
                None => identity,
            };
            send_frame(
                &mut send,
                &Msg::HasPrefs(HasPrefsReq { identity: target }),
                PAD_TO_QUERY,
            )
            .await?;
            match expect_reply(&mut recv).await? {
                Msg::HasPrefsOk(resp) => {
                    println!("{target} has preferences: {}", resp.present);
                }
                m => bail!("unexpected reply to HasPrefs: {m:?}"),
            }
        }

        Cmd::GetMatch { candidate } => {
            let candidate = Identity::from_hex(candidate)?;
            let indicator = fetch_match(&mut send, &mut recv, identity, candidate).await?;
            println!(
                "Encrypted indicator: {:?}",
                cimcrypto::HandleId::of(&indicator)
            );
        }

        Cmd::DecryptMatch {
            candidate,
            duration_days,
            reveal_bits,
        } => {
            let candidate = Identity::from_hex(candidate)?;
            let indicator = fetch_match(&mut send, &mut recv, identity, candidate).await?;

            // Ephemeral reveal keypair; the signed authorization binds its
            // fingerprint, the registry id and the validity window.
            let (reveal_pk, reveal_sk) = keygen(*reveal_bits, &mut rand::rngs::OsRng);
            let auth = DecryptionAuthorization {
                reveal_key_fingerprint: key_fingerprint(&reveal_pk),
                registry_id: info.registry_id,
                valid_from: now(),
                duration_days: *duration_days,
            };
            let signature = auth.sign(&signing_key).to_bytes().to_vec();
            let req = UserDecryptReq {
                handle: indicator,
                auth,
                requester_key: signing_key.verifying_key().to_bytes(),
                signature,
                reveal_pk,
            };
            send_frame(&mut send, &Msg::UserDecrypt(req), PAD_TO_DECRYPT).await?;
            match expect_reply(&mut recv).await? {
                Msg::UserDecryptOk(resp) => {
                    let value = u32::try_from(&dec(&reveal_sk, &resp.masked))
                        .map_err(|_| anyhow!("gateway returned a non-u32 value"))?;
                    println!("Match detected (1=yes,0=no): {value}");
                }
                m => bail!("unexpected reply to UserDecrypt: {m:?}"),
            }
        }
    }

    // Close cleanly
    send.finish()?;
    conn.close(0u32.into(), b"bye");
    endpoint.wait_idle().await;
    Ok(())
}

fn keygen_identity(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("refusing to overwrite existing key file {:?}", path);
    }
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    let file = IdentityKeyFile {
        signing_key: hex::encode(signing_key.to_bytes()),
    };
    fs::write(path, serde_json::to_string_pretty(&file)?)?;
    let identity = Identity::from_verifying_key(&signing_key.verifying_key());
    println!("Wrote identity key to {:?}", path);
    println!("Identity: {identity}");
    Ok(())
}

fn load_identity(path: &Path) -> Result<SigningKey> {
    let data = fs::read(path)
        .map_err(|e| anyhow!("failed to read key file {:?} (run `client keygen`?): {}", path, e))?;
    let file: IdentityKeyFile = serde_json::from_slice(&data)?;
    let bytes = hex::decode(&file.signing_key)?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("signing key must be 32 bytes"))?;
    Ok(SigningKey::from_bytes(&arr))
}

fn parse_three(values: &str) -> Result<[u32; 3]> {
    let parsed: Result<Vec<u32>> = values
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| anyhow!("'{}' is not an integer interest", v.trim()))
        })
        .collect();
    let parsed = parsed?;
    parsed
        .try_into()
        .map_err(|_| anyhow!("Provide exactly three integer interests using --values e.g. 1,4,7"))
}

async fn wait_service_info(recv: &mut quinn::RecvStream) -> Result<ServiceInfo> {
    loop {
        match read_msg(recv).await? {
            Msg::ServiceInfo(info) => return Ok(info),
            Msg::Error(e) => bail!("registry rejected hello: {} ({:?})", e.message, e.kind),
            other => eprintln!("[client] waiting ServiceInfo, got: {:?}", other),
        }
    }
}

/// Read one reply; surface a typed registry failure as an error.
async fn expect_reply(recv: &mut quinn::RecvStream) -> Result<Msg> {
    match read_msg(recv).await? {
        Msg::Error(e) => bail!("registry error [{:?}]: {}", e.kind, e.message),
        m => Ok(m),
    }
}

async fn fetch_match(
    send: &mut quinn::SendStream,
    recv: &mut quinn::RecvStream,
    requester: Identity,
    candidate: Identity,
) -> Result<cimcrypto::Ciphertext> {
    send_frame(
        send,
        &Msg::GetMatch(MatchGetReq {
            requester,
            candidate,
        }),
        PAD_TO_QUERY,
    )
    .await?;
    match expect_reply(recv).await? {
        Msg::MatchOk(resp) => Ok(resp.indicator),
        m => bail!("unexpected reply to GetMatch: {m:?}"),
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs()
}
