mod config;
mod logging;
mod rumqttc_wrapper;

use config::Config;
use rumqttc_wrapper::RumqttcWrapper;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use vedirect2mqtt::frame_assembler::FrameAssembler;
use vedirect2mqtt::metric_collector::MetricCollector;
use vedirect2mqtt::simple_mqtt::SimpleMqtt;
use vedirect2mqtt::vedirect::VeDirect;

use log::{error, info};

static OPEN_RETRY_DELAY: Duration = Duration::from_secs(5);
static REOPEN_DELAY: Duration = Duration::from_secs(3);

/// Sleep for `duration`, waking early once `running` is cleared.
fn sleep_while_running(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(250)));
    }
}

/// Returns false if shutdown was requested before the port could be opened.
fn open_with_retry(device: &mut VeDirect, running: &AtomicBool) -> bool {
    while running.load(Ordering::SeqCst) {
        match device.open() {
            Ok(()) => return true,
            Err(e) => {
                error!(
                    "Serial open failed: {e:#}. Retry in {}s",
                    OPEN_RETRY_DELAY.as_secs()
                );
                sleep_while_running(running, OPEN_RETRY_DELAY);
            }
        }
    }
    false
}

fn main() -> ExitCode {
    logging::init_logger();
    info!("Running revision: {}", env!("GIT_HASH"));
    if std::env::args().len() > 1 {
        error!("Arguments passed. Tool is configured by config.toml and environment variables");
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("shutdown requested");
        handler_flag.store(false, Ordering::SeqCst);
    }) {
        error!("could not install signal handler: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        "Publishing to MQTT broker {}:{} under {}",
        config.mqtt.host,
        config.mqtt.port_or_default(),
        config.publish.topic_prefix
    );
    let mut output_channels: Vec<Box<dyn MetricCollector>> = vec![Box::new(
        SimpleMqtt::<RumqttcWrapper>::new(&config.mqtt, &config.publish),
    )];

    let mut device = VeDirect::new(&config.serial);
    let mut assembler = FrameAssembler::new(&config.frame, Instant::now());
    let mut connected = open_with_retry(&mut device, &running);

    while connected && running.load(Ordering::SeqCst) {
        match device.read_line() {
            Ok(line) => {
                if let Some(frame) = assembler.process(line.as_deref(), Instant::now()) {
                    output_channels.iter_mut().for_each(|channel| {
                        channel.publish(&frame);
                    })
                }
            }
            Err(e) => {
                error!(
                    "Serial error: {e}. Reopening port in {}s...",
                    REOPEN_DELAY.as_secs()
                );
                device.close();
                assembler.reset();
                sleep_while_running(&running, REOPEN_DELAY);
                connected = open_with_retry(&mut device, &running);
            }
        }
    }

    info!("shutting down");
    device.close();
    output_channels
        .iter_mut()
        .for_each(|channel| channel.shutdown());
    ExitCode::SUCCESS
}
