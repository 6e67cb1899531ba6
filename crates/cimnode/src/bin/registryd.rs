// cimnode/src/bin/registryd.rs
// Server: holds the registry ledger and the decryption capability.
// - Generate or load the service Paillier keypair; announce ServiceInfo
// - Serve Submit / RequestMatch / read queries / UserDecrypt
// - Drain and log registry events after each mutation

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use std::{fs, net::SocketAddr, path::PathBuf};

use cimnode::{
    make_server_config_self_signed, match_signing_bytes, read_msg, send_frame,
    submit_signing_bytes, ErrorKind, ErrorResp, Msg, ServiceInfo, SubmitResp, PAD_TO_DECRYPT,
    PAD_TO_HELLO, PAD_TO_INFO, PAD_TO_MATCH, PAD_TO_QUERY, PAD_TO_SUBMIT, PROTO_VER,
};

use cimcrypto::{
    hash_key, keygen, load_json, save_json, EncU32, EqualityScheme, HandleId, Identity,
    PaillierPrivateKey, PaillierPublicKey, ThresholdGateway,
};
use cimengine::EvalCtx;
use cimproto::{HasPrefsResp, MatchGetResp, MatchResp, PlayersResp, PrefsResp, UserDecryptResp};
use cimregistry::{Registry, RegistryError};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use quinn::Endpoint;

/// registryd command-line options
#[derive(Debug, Parser)]
struct Opt {
    /// Listen address, e.g. 0.0.0.0:9300
    #[arg(long, default_value = "0.0.0.0:9300")]
    listen: SocketAddr,

    /// Optional path to write the self-signed server certificate (DER) for client pinning
    #[arg(long)]
    cert_out: Option<PathBuf>,

    /// Optional: load the service Paillier public key from file instead of generating
    #[arg(long)]
    service_pub: Option<PathBuf>,

    /// Optional: load the service Paillier private key from file instead of generating
    #[arg(long)]
    service_priv: Option<PathBuf>,

    /// Equality round-trip scheme accepted from clients (blinded|dev)
    #[arg(long, default_value = "blinded")]
    equality: String,

    /// Optional: write the service pk JSON for out-of-band pinning
    #[arg(long)]
    service_pk_out: Option<PathBuf>,
}

struct Shared {
    registry: Registry,
    gateway: ThresholdGateway,
    scheme: EqualityScheme,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    // Self-signed QUIC/TLS server config (dev) + DER for client pinning
    let (server_cfg, server_cert_der) = make_server_config_self_signed("cim-registry")?;
    if let Some(path) = &opt.cert_out {
        fs::write(path, server_cert_der.clone().into_owned())
            .map_err(|e| anyhow!("failed to write cert {:?}: {}", path, e))?;
        eprintln!("[registryd] wrote DER cert to {:?}", path);
    }

    // Generate or load the service Paillier keypair
    let (pk, sk): (PaillierPublicKey, PaillierPrivateKey) =
        match (&opt.service_pub, &opt.service_priv) {
            (Some(pub_path), Some(priv_path)) => {
                let pk = load_json(
                    pub_path
                        .to_str()
                        .ok_or_else(|| anyhow!("bad --service-pub path"))?,
                )?;
                let sk = load_json(
                    priv_path
                        .to_str()
                        .ok_or_else(|| anyhow!("bad --service-priv path"))?,
                )?;
                (pk, sk)
            }
            (None, None) => keygen(2048, &mut rand::rngs::OsRng),
            _ => {
                return Err(anyhow!(
                    "Must provide both --service-pub and --service-priv, or neither to generate new keys"
                ));
            }
        };

    eprintln!("[registryd] service pk hash: {}", hash_key(&pk));
    if let Some(p) = &opt.service_pk_out {
        save_json(p.to_str().ok_or_else(|| anyhow!("bad --service-pk-out path"))?, &pk)?;
    }

    let scheme = match opt.equality.to_lowercase().as_str() {
        "dev" => {
            eprintln!("[registryd] Warning: dev equality scheme leaks difference values to the gateway");
            EqualityScheme::DevOracle
        }
        _ => EqualityScheme::Blinded,
    };

    let gateway = ThresholdGateway::new(pk, sk);
    let registry = Registry::new(gateway.registry_id());
    eprintln!("[registryd] registry id: {}", registry.id());
    let shared = Arc::new(Shared {
        registry,
        gateway,
        scheme,
    });

    let endpoint = Endpoint::server(server_cfg, opt.listen)?;
    eprintln!("[registryd] listening on {}", opt.listen);

    while let Some(connecting) = endpoint.accept().await {
        let shared = shared.clone();
        tokio::spawn(async move {
            match connecting.await {
                Ok(conn) => {
                    eprintln!("[registryd] new connection from {}", conn.remote_address());
                    if let Err(e) = handle_connection(conn, shared).await {
                        eprintln!("[registryd] connection handler error: {e:?}");
                    }
                }
                Err(e) => eprintln!("[registryd] failed handshake: {e:?}"),
            }
        });
    }

    endpoint.wait_idle().await;
    Ok(())
}

async fn handle_connection(conn: quinn::Connection, shared: Arc<Shared>) -> Result<()> {
    loop {
        match conn.accept_bi().await {
            Ok((mut send, mut recv)) => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_stream(&mut send, &mut recv, shared).await {
                        eprintln!("[registryd] stream error: {e:?}");
                    }
                });
            }
            Err(quinn::ConnectionError::ApplicationClosed { .. })
            | Err(quinn::ConnectionError::LocallyClosed) => break,
            Err(e) => {
                eprintln!("[registryd] accept_bi error: {e:?}");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_stream(
    send: &mut quinn::SendStream,
    recv: &mut quinn::RecvStream,
    shared: Arc<Shared>,
) -> Result<()> {
    loop {
        let msg = match read_msg(recv).await {
            Ok(m) => m,
            Err(e) => {
                if is_eof(&e) {
                    return Ok(());
                } else {
                    return Err(e);
                }
            }
        };

        match msg {
            Msg::Hello(h) => {
                if h.proto_ver != PROTO_VER {
                    let resp = error_resp(ErrorKind::BadRequest, "protocol version mismatch");
                    send_frame(send, &Msg::Error(resp), PAD_TO_HELLO).await?;
                    continue;
                }
                let info = ServiceInfo {
                    pk: shared.gateway.public_key().clone(),
                    registry_id: shared.registry.id(),
                    equality_scheme: shared.scheme,
                    server_nonce: rand::random::<[u8; 16]>(),
                };
                send_frame(send, &Msg::ServiceInfo(info), PAD_TO_INFO).await?;
            }

            Msg::Submit(req) => {
                let reply = match verify_request(
                    &req.owner_key,
                    &req.signature,
                    &submit_signing_bytes(&shared.registry.id(), &req.proof),
                ) {
                    Err(resp) => Msg::Error(resp),
                    Ok(owner) => {
                        let handles: Vec<EncU32> =
                            req.handles.into_iter().map(EncU32::new).collect();
                        let timestamp = now();
                        match shared
                            .registry
                            .submit_preferences(owner, handles, &req.proof, timestamp)
                        {
                            Ok(()) => Msg::SubmitOk(SubmitResp { owner, timestamp }),
                            Err(e) => Msg::Error(registry_error_resp(&e)),
                        }
                    }
                };
                send_frame(send, &reply, PAD_TO_SUBMIT).await?;
                log_events(&shared);
            }

            Msg::RequestMatch(req) => {
                let reply = match verify_request(
                    &req.requester_key,
                    &req.signature,
                    &match_signing_bytes(&shared.registry.id(), &req.candidate),
                ) {
                    Err(resp) => Msg::Error(resp),
                    Ok(requester) => {
                        // the gateway answers the engine's equality round trips
                        let mut oracle = shared.gateway.clone();
                        let pk = shared.gateway.public_key().clone();
                        let mut ctx = EvalCtx {
                            pk: &pk,
                            scheme: shared.scheme,
                            eq: &mut oracle,
                        };
                        match shared
                            .registry
                            .request_match(requester, req.candidate, &mut ctx, now())
                        {
                            Ok(indicator) => Msg::MatchReady(MatchResp {
                                indicator: indicator.c,
                            }),
                            Err(e) => Msg::Error(registry_error_resp(&e)),
                        }
                    }
                };
                send_frame(send, &reply, PAD_TO_MATCH).await?;
                log_events(&shared);
            }

            Msg::HasPrefs(req) => {
                let present = shared.registry.has_preferences(req.identity);
                send_frame(send, &Msg::HasPrefsOk(HasPrefsResp { present }), PAD_TO_QUERY).await?;
            }

            Msg::GetPrefs(req) => {
                let reply = match shared.registry.get_encrypted_preferences(req.identity) {
                    Ok(handles) => Msg::PrefsOk(PrefsResp {
                        handles: handles.into_iter().map(|h| h.c).collect(),
                    }),
                    Err(e) => Msg::Error(registry_error_resp(&e)),
                };
                send_frame(send, &reply, PAD_TO_QUERY).await?;
            }

            Msg::GetMatch(req) => {
                let reply = match shared.registry.get_encrypted_match(req.requester, req.candidate)
                {
                    Ok(ind) => Msg::MatchOk(MatchGetResp { indicator: ind.c }),
                    Err(e) => Msg::Error(registry_error_resp(&e)),
                };
                send_frame(send, &reply, PAD_TO_QUERY).await?;
            }

            Msg::ListPlayers(_) => {
                let players = shared.registry.registered_players();
                send_frame(send, &Msg::PlayersOk(PlayersResp { players }), PAD_TO_QUERY).await?;
            }

            Msg::UserDecrypt(req) => {
                let grantee = shared.registry.grant_holder(HandleId::of(&req.handle));
                let reply = match shared.gateway.user_decrypt(
                    &req.handle,
                    grantee,
                    &req.auth,
                    &req.requester_key,
                    &req.signature,
                    &req.reveal_pk,
                    now(),
                ) {
                    Ok(masked) => Msg::UserDecryptOk(UserDecryptResp { masked }),
                    Err(e) => {
                        let kind = match e {
                            cimcrypto::AccessError::UnknownHandle => ErrorKind::NotFound,
                            _ => ErrorKind::Unauthorized,
                        };
                        Msg::Error(error_resp(kind, &e.to_string()))
                    }
                };
                send_frame(send, &reply, PAD_TO_DECRYPT).await?;
            }

            other => {
                eprintln!("[registryd] unhandled msg variant: {:?}", other);
                break Ok(());
            }
        }
    }
}

fn verify_request(key: &[u8; 32], signature: &[u8], payload: &[u8]) -> Result<Identity, ErrorResp> {
    let vk = VerifyingKey::from_bytes(key)
        .map_err(|_| error_resp(ErrorKind::Unauthorized, "malformed verifying key"))?;
    let sig = Signature::from_slice(signature)
        .map_err(|_| error_resp(ErrorKind::Unauthorized, "malformed signature"))?;
    vk.verify(payload, &sig)
        .map_err(|_| error_resp(ErrorKind::Unauthorized, "request signature rejected"))?;
    Ok(Identity::from_verifying_key(&vk))
}

fn registry_error_resp(e: &RegistryError) -> ErrorResp {
    let kind = match e {
        RegistryError::WrongCount { .. } => ErrorKind::WrongCount,
        RegistryError::InvalidProof { .. } => ErrorKind::InvalidProof,
        RegistryError::SelfMatch => ErrorKind::SelfMatch,
        RegistryError::NoPreferences { .. } => ErrorKind::NoPreferences,
        RegistryError::NotFound => ErrorKind::NotFound,
        RegistryError::Eval(_) => ErrorKind::BadRequest,
    };
    error_resp(kind, &e.to_string())
}

fn error_resp(kind: ErrorKind, message: &str) -> ErrorResp {
    ErrorResp {
        kind,
        message: message.to_string(),
    }
}

fn log_events(shared: &Shared) {
    for ev in shared.registry.drain_events() {
        eprintln!("[registryd] event: {ev:?}");
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs()
}

#[inline]
fn is_eof(err: &anyhow::Error) -> bool {
    let s = format!("{err}");
    s.contains("unexpected end of file") || s.contains("closed") || s.contains("Reset")
}
