//! ---
//! msp_section: "06-tooling"
//! msp_subsection: "binary"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Client subcommands: probe, get, gps-inject and command listing."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use msp_common::AppConfig;
use msp_core::{codes, CommandCode, Engine, FieldValues, MspError, Record};
use msp_sim::GpsSample;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Identity and status queries issued by `probe`, in order.
const PROBE_COMMANDS: &[&str] = &[
    "MSP_API_VERSION",
    "MSP_FC_VARIANT",
    "MSP_FC_VERSION",
    "MSP_BUILD_INFO",
    "MSP_BOARD_INFO",
    "MSP_UID",
    "MSP_ACC_TRIM",
    "MSP_NAME",
    "MSP_STATUS",
    "MSP_STATUS_EX",
    "MSP_BATTERY_CONFIG",
    "MSP_BATTERY_STATE",
    "MSP_BOXNAMES",
];

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Command name (e.g. MSP_ATTITUDE) or numeric code for an undecoded request.
    pub command: String,
    /// Request field as NAME=VALUE; repeatable.
    #[arg(long = "field", value_name = "NAME=VALUE", value_parser = parse_field)]
    pub fields: Vec<(String, i64)>,
}

#[derive(Debug, Args)]
pub struct GpsInjectArgs {
    #[arg(long, default_value_t = 45.50496682273918, allow_negative_numbers = true)]
    pub lat: f64,
    #[arg(long, default_value_t = -73.61319383049725, allow_negative_numbers = true)]
    pub lon: f64,
    /// Mean sea level altitude in centimetres.
    #[arg(long, default_value_t = 5000)]
    pub alt_cm: i32,
    #[arg(long, default_value_t = 3)]
    pub fix_type: u8,
    #[arg(long, default_value_t = 10)]
    pub satellites: u8,
    /// Injections per second.
    #[arg(long, default_value_t = 10.0)]
    pub rate_hz: f64,
    /// Stop after this many iterations; runs until Ctrl-C otherwise.
    #[arg(long)]
    pub count: Option<u64>,
}

fn parse_field(raw: &str) -> Result<(String, i64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    let value = value
        .trim()
        .parse::<i64>()
        .map_err(|err| format!("invalid value for `{name}`: {err}"))?;
    Ok((name.trim().to_string(), value))
}

fn parse_code(raw: &str) -> Option<CommandCode> {
    let raw = raw.trim();
    let code = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok()?,
        None => raw.parse::<u16>().ok()?,
    };
    Some(CommandCode(code))
}

async fn connect(config: &AppConfig) -> Result<Engine> {
    let registry = Arc::new(config.build_registry()?);
    let endpoint = &config.connection.endpoint;
    let engine = Engine::connect(
        endpoint,
        config.connection.connect_timeout,
        registry,
        config.engine.clone(),
    )
    .await
    .with_context(|| format!("connecting to {endpoint}"))?;
    info!(%endpoint, "connected");
    Ok(engine)
}

fn print_record(record: &Record) -> Result<()> {
    let mut value = serde_json::to_value(record)?;
    if record.spec().schema.is_empty() {
        if let Some(object) = value.as_object_mut() {
            object.insert("text".into(), record.text().into());
            object.insert("raw".into(), hex::encode(&record.raw).into());
        }
    }
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

pub async fn probe(config: &AppConfig) -> Result<()> {
    let engine = connect(config).await?;
    let timeout = config.engine.request_timeout;
    let mut failures = 0usize;
    for name in PROBE_COMMANDS {
        match engine.request_by_name(name, &FieldValues::new(), timeout).await {
            Ok(record) => print_record(&record)?,
            Err(err @ (MspError::RequestTimeout { .. } | MspError::Rejected { .. })) => {
                failures += 1;
                warn!(command = name, error = %err, "probe query failed");
            }
            Err(err) => {
                engine.close().await;
                return Err(err).with_context(|| format!("probing {name}"));
            }
        }
    }
    let metrics = engine.metrics();
    engine.close().await;
    info!(
        answered = PROBE_COMMANDS.len() - failures,
        failed = failures,
        checksum_errors = metrics.checksum_errors,
        "probe finished"
    );
    if failures == PROBE_COMMANDS.len() {
        bail!("flight controller answered none of the probe queries");
    }
    Ok(())
}

pub async fn get(config: &AppConfig, args: GetArgs) -> Result<()> {
    let engine = connect(config).await?;
    let timeout = config.engine.request_timeout;
    let result = match parse_code(&args.command) {
        Some(code) if !engine.registry().contains(code) => {
            if !args.fields.is_empty() {
                bail!("--field needs a registered command; code {code} is not in the registry");
            }
            let frame = engine.request_raw(code, &[], timeout).await;
            frame.map_err(anyhow::Error::from).map(|frame| {
                println!(
                    "{}",
                    serde_json::json!({
                        "code": frame.code.get(),
                        "direction": format!("{:?}", frame.direction),
                        "version": format!("{:?}", frame.version),
                        "payload": hex::encode(&frame.payload),
                    })
                );
            })
        }
        Some(code) => {
            let name = engine.registry().lookup_by_code(code)?.name.clone();
            request_and_print(&engine, &name, &args.fields, timeout).await
        }
        None => request_and_print(&engine, &args.command, &args.fields, timeout).await,
    };
    engine.close().await;
    result
}

async fn request_and_print(
    engine: &Engine,
    name: &str,
    fields: &[(String, i64)],
    timeout: Duration,
) -> Result<()> {
    let fields: FieldValues = fields.iter().cloned().collect();
    let record = engine.request_by_name(name, &fields, timeout).await?;
    if record.partial {
        warn!(command = %record.name, len = record.raw.len(), "reply shorter than schema");
    }
    print_record(&record)
}

pub async fn gps_inject(config: &AppConfig, args: GpsInjectArgs) -> Result<()> {
    if !(args.rate_hz > 0.0 && args.rate_hz.is_finite()) {
        return Err(anyhow!("--rate-hz must be positive"));
    }
    let engine = connect(config).await?;
    let timeout = config.engine.request_timeout;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / args.rate_hz));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut iterations = 0u64;

    let outcome = loop {
        if args.count.is_some_and(|count| iterations >= count) {
            break Ok(());
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break Ok(());
            }
            _ = ticker.tick() => {}
        }
        iterations += 1;

        match engine.request(codes::MSP_RAW_GPS, &[], timeout).await {
            Ok(record) => {
                if let Err(err) = print_record(&record) {
                    break Err(err);
                }
            }
            Err(err @ MspError::RequestTimeout { .. }) => warn!(error = %err, "no MSP_RAW_GPS reply"),
            Err(err) => break Err(err.into()),
        }

        let sample = GpsSample::at(args.lat, args.lon)
            .with_altitude_cm(args.alt_cm)
            .with_fix(args.fix_type, args.satellites);
        if let Err(err) = engine.send_telemetry("MSP2_SENSOR_GPS", &sample.to_fields()).await {
            break Err(err.into());
        }
    };

    let metrics = engine.metrics();
    engine.close().await;
    info!(
        iterations,
        sent = metrics.telemetry_sent,
        timeouts = metrics.requests_timed_out,
        "gps injection stopped"
    );
    outcome
}

pub fn list_commands(config: &AppConfig) -> Result<()> {
    let registry = config.build_registry()?;
    for spec in registry.iter() {
        let fields: Vec<String> = spec
            .schema
            .fields()
            .iter()
            .map(|field| format!("{}:{}", field.name, field.kind))
            .collect();
        println!(
            "{:>5}  {:<24} {}",
            spec.code.get(),
            spec.name,
            if fields.is_empty() {
                "(raw)".to_string()
            } else {
                fields.join(" ")
            }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_arguments_parse() {
        assert_eq!(parse_field("distance=250"), Ok(("distance".to_string(), 250)));
        assert_eq!(parse_field(" quality = -3"), Ok(("quality".to_string(), -3)));
        assert!(parse_field("distance").is_err());
        assert!(parse_field("distance=far").is_err());
    }

    #[test]
    fn numeric_commands_parse_as_codes() {
        assert_eq!(parse_code("108"), Some(CommandCode(108)));
        assert_eq!(parse_code("0x1F03"), Some(codes::MSP2_SENSOR_GPS));
        assert_eq!(parse_code("MSP_ATTITUDE"), None);
    }
}
