//! ---
//! msp_section: "06-tooling"
//! msp_subsection: "binary"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Simulator subcommand serving a fake flight controller over TCP."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use msp_common::AppConfig;
use msp_schema::FieldValues;
use msp_sim::{serve_tcp, SimulatedFc};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Address to listen on; overrides `simulator.listen`.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,
    /// Seed for IMU and attitude noise; replies are noise-free without it.
    #[arg(long)]
    pub noise_seed: Option<u64>,
    /// Noise amplitude in raw units.
    #[arg(long, default_value_t = 5)]
    pub noise_amplitude: i64,
}

pub fn build_fc(config: &AppConfig, args: &SimulateArgs) -> Result<SimulatedFc> {
    let registry = Arc::new(config.build_registry()?);
    let mut fc = SimulatedFc::new(registry);
    if let Some(seed) = args.noise_seed {
        fc = fc.with_noise(seed, args.noise_amplitude);
    }
    for (name, values) in &config.simulator.replies {
        let values: FieldValues = values.iter().map(|(k, v)| (k.clone(), *v)).collect();
        fc.set_reply(name, &values)
            .with_context(|| format!("simulator reply for `{name}`"))?;
    }
    Ok(fc)
}

pub async fn run(config: &AppConfig, args: SimulateArgs) -> Result<()> {
    let fc = Arc::new(build_fc(config, &args)?);
    let listen = args.listen.unwrap_or(config.simulator.listen);
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding simulator on {listen}"))?;
    info!(%listen, overrides = config.simulator.replies.len(), "simulator ready");

    tokio::select! {
        result = serve_tcp(Arc::clone(&fc), listener) => result?,
        _ = tokio::signal::ctrl_c() => info!(stats = ?fc.stats(), "simulator interrupted"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use msp_schema::codes;
    use msp_wire::{Direction, Frame, ProtocolVersion};

    use super::*;

    #[test]
    fn configured_replies_override_defaults() {
        let config: AppConfig = r#"
            [simulator.replies.MSP_ATTITUDE]
            roll = 15
            pitch = -20
            yaw = 90
        "#
        .parse()
        .unwrap();
        let args = SimulateArgs {
            listen: None,
            noise_seed: None,
            noise_amplitude: 0,
        };
        let fc = build_fc(&config, &args).unwrap();
        let reply = fc
            .handle(&Frame::new(
                ProtocolVersion::V1,
                Direction::Request,
                codes::MSP_ATTITUDE,
                bytes::Bytes::new(),
            ))
            .unwrap();
        assert_eq!(&reply.payload[..], &[15, 0, 0xEC, 0xFF, 90, 0]);
    }

    #[test]
    fn unknown_reply_names_are_reported() {
        let config: AppConfig = "[simulator.replies.MSP_NOPE]\nvalue = 1\n".parse().unwrap();
        let args = SimulateArgs {
            listen: None,
            noise_seed: None,
            noise_amplitude: 0,
        };
        assert!(build_fc(&config, &args).is_err());
    }
}
