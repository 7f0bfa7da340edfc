mod capture;
mod config;
mod credentials;
mod device_info;
#[cfg(feature = "gui")]
mod form;
mod naming;
mod payload;
mod profile;

use anyhow::Result;
use attend_core::PresenceDetector;
use attend_hw::Camera;
use capture::{capture_once, CaptureSettings};
use chrono::Local;
use clap::Parser;
use config::Config;
use device_info::LookupSettings;
use payload::{NoopSink, Payload, PayloadSink};
use profile::ProfileStore;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// No credentials: no saved profile and no usable form, or the form was cancelled.
const EXIT_NO_CREDENTIALS: u8 = 3;
const EXIT_ERROR: u8 = 2;

#[derive(Parser)]
#[command(
    name = "face-attend",
    version,
    about = "Capture one attendance photo once a face is steadily in view"
)]
struct Cli {
    /// Delete the saved name/seat profile before running
    #[arg(long)]
    reset_profile: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "face-attend failed");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let config = Config::load()?;
    let store = ProfileStore::new(&config.profile_path);

    if cli.reset_profile {
        if let Err(e) = store.reset() {
            tracing::warn!(error = %e, "could not reset profile");
        }
    }

    let env = |key: &str| std::env::var(key).ok();
    let Some(mut source) = credentials::select_source(store.load(), env) else {
        tracing::error!(
            profile = %store.path().display(),
            "no saved profile and no display for the details form; \
             run once in a desktop session and choose \"Permanent\""
        );
        return Ok(EXIT_NO_CREDENTIALS);
    };

    let Some(creds) = credentials::request(source.as_mut()) else {
        tracing::info!("no details submitted");
        return Ok(EXIT_NO_CREDENTIALS);
    };

    if creds.persist {
        if let Err(e) = store.save(&creds.profile()) {
            tracing::warn!(error = %e, "could not save profile; continuing");
        }
    }

    println!(
        "USER_DETAILS: name=\"{}\", seat=\"{}\", submitted_at=\"{}\"",
        creds.name,
        creds.seat,
        naming::pretty_timestamp(&Local::now())
    );

    let settings = CaptureSettings::from(&config);
    let result = capture_once(
        &settings,
        &creds.name,
        &creds.seat,
        || {
            PresenceDetector::select(
                &config.network_model_path(),
                &config.cascade_model_path(),
                config.confidence_threshold,
            )
        },
        || {
            Camera::open(config.camera_index).map_err(|e| {
                log_available_devices();
                e
            })
        },
    );

    let device = device_info::collect(&LookupSettings::from(&config));
    let payload = Payload::assemble(&creds.name, &creds.seat, &result, &config, device, Local::now());
    println!("PAYLOAD_JSON: {}", payload.to_json()?);

    if let Err(e) = NoopSink.deliver(&payload) {
        tracing::warn!(error = %e, "payload delivery failed");
    }

    Ok(result.status.exit_code())
}

fn log_available_devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        tracing::warn!("no V4L2 capture devices found");
    }
    for dev in devices {
        tracing::info!(path = %dev.path, name = %dev.name, driver = %dev.driver, "available camera");
    }
}
