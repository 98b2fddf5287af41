// UADP Publisher Main Entry Point
//
// Flow:
// 1. Load Config.toml and initialise logging
// 2. Install the fatal fault handler
// 3. Bring up the board and the network link
// 4. Once the link is ready, build the published dataset and start publishing

use anyhow::Result;
use log::{error, info};
use uadp_publisher::network::DatalinkLink;
use uadp_publisher::network::multicast::MulticastSink;
use uadp_publisher::os::fault::{FatalFault, FaultHandler, LogAndHalt, install_panic_hook};
use uadp_publisher::os::hardware::{BoardInit, NoBoard, StatusLeds};
use uadp_publisher::threads::Bootstrap;
use uadp_publisher::threads::publisher::{PublisherSettings, PublisherUnit};

fn main() {
    if let Err(e) = run() {
        error!("Application error: {:?}", e);
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = uadp_publisher::os::start::start()?;
    info!("========================================");
    info!("UADP Publisher Starting");
    info!("========================================");

    let faults: &'static LogAndHalt = Box::leak(Box::new(LogAndHalt {
        interval: config.fault_log_interval,
    }));
    install_panic_hook(faults);

    let board: Box<dyn BoardInit> = if config.status_leds.is_empty() {
        Box::new(NoBoard)
    } else {
        Box::new(StatusLeds::new(config.status_leds.clone()))
    };

    let settings = PublisherSettings::from_config(&config);
    let destination = settings.address.socket_addr();

    let bootstrap = Bootstrap::new(faults);
    let handles = bootstrap.run(board, Box::new(DatalinkLink::new()), config.static_ip(), move |link, events| {
        info!("Publisher unit starting on {}", link.interface);
        let sink = match MulticastSink::open(destination, &settings.multicast) {
            Ok(sink) => sink,
            Err(e) => faults.halt(&FatalFault::Startup(format!("multicast socket to {}: {}", destination, e))),
        };
        match PublisherUnit::start(&settings, Box::new(sink), events) {
            Ok(unit) => unit.run(),
            Err(e) => faults.halt(&FatalFault::Startup(format!("{:#}", e))),
        }
    });

    let handles = match handles {
        Ok(handles) => handles,
        Err(e) => faults.halt(&FatalFault::Startup(format!("{:#}", e))),
    };

    info!("Startup complete {:?} after link ready", handles.link_ready_at.elapsed());

    if handles.publisher.join().is_err() {
        faults.halt(&FatalFault::UnitPanicked {
            unit: "publisher".into(),
            message: "publisher unit exited".into(),
        });
    }
    Ok(())
}
