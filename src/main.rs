use barsyncrs::{
    cli::{validate_device, Args},
    control::{run_control_loop, ControlReply},
    handle_device_list, logging,
    midi::{self, DefaultMidiEngine},
    ui::run_status_display,
    Settings, SyncController, SyncSettings, SyncSnapshot, TransportState,
};
use clap::Parser;
use dialoguer::Select;
use std::io;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TEST_MARKER_HOLD: Duration = Duration::from_millis(250);

fn main() {
    let args = Args::parse();
    let settings = load_settings(&args);
    initialize_logging(&args, &settings);

    let devices = handle_device_list();
    if args.device_list {
        list_available_devices(&devices);
        return;
    }

    let (input_device, output_device) = if args.pick_ports {
        pick_ports()
    } else {
        (settings.input_device.clone(), settings.output_device.clone())
    };
    for device_name in input_device.iter().chain(output_device.iter()) {
        if let Err(error_msg) = validate_device(device_name, &devices) {
            exit_with_error(&error_msg);
        }
    }

    let (engine, input_rx) =
        match DefaultMidiEngine::connect(input_device.as_deref(), output_device.as_deref()) {
            Ok(connected) => connected,
            Err(e) => exit_with_error(&format!("Error connecting to MIDI device: {}", e)),
        };
    let controller = Arc::new(SyncController::new(engine, SyncSettings::from(&settings)));

    if args.test_marker {
        controller.send_test_marker(TEST_MARKER_HOLD);
        return;
    }

    if let Some(rx) = input_rx {
        let input_controller = Arc::clone(&controller);
        thread::spawn(move || midi::run_midi_input(rx, input_controller));
    }
    if !args.log_stderr {
        run_status_display(&controller);
    }
    if settings.master {
        controller.start(true);
    }

    run_application_loop(&controller);
}

fn load_settings(args: &Args) -> Settings {
    let mut settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => exit_with_error(&e.to_string()),
    };
    settings.apply_args(args);
    if let Err(e) = settings.validate() {
        exit_with_error(&e.to_string());
    }
    settings
}

fn initialize_logging(args: &Args, settings: &Settings) {
    let result = if args.log_stderr {
        logging::init_stderr_logger(settings.log_level())
    } else {
        logging::init_logger(settings.log_level())
    };
    if let Err(e) = result {
        eprintln!("Logger initialization failed: {}", e);
    }
    log::info!("Application starting");
    log::debug!("Settings: {:?}", settings);
}

fn list_available_devices(devices: &[String]) {
    println!("Available MIDI devices:");
    for device in devices {
        println!("  - {}", device);
    }
}

fn pick_port(prompt: &str, ports: Vec<String>) -> Option<String> {
    if ports.is_empty() {
        println!("No {} ports available", prompt.to_lowercase());
        return None;
    }

    let mut items = vec!["(none)".to_string()];
    items.extend(ports);
    match Select::new()
        .with_prompt(prompt)
        .items(&items)
        .default(1)
        .interact_opt()
    {
        Ok(Some(0)) | Ok(None) => None,
        Ok(Some(index)) => items.get(index).cloned(),
        Err(e) => exit_with_error(&format!("Port selection failed: {}", e)),
    }
}

fn pick_ports() -> (Option<String>, Option<String>) {
    let input = pick_port("Clock input", midi::input_ports());
    let output = pick_port("Clock output", midi::output_ports());
    (input, output)
}

fn print_reply(reply: &ControlReply) {
    match reply {
        ControlReply::Done | ControlReply::Quit => {}
        ControlReply::Rejected(reason) => eprintln!("{}", reason),
        ControlReply::Status(snapshot) => print_status(snapshot),
    }
}

fn print_status(snapshot: &SyncSnapshot) {
    let (bar, beat) = snapshot.position.bar_and_beat();
    println!(
        "{:?} at {:.2} BPM, bar {} beat {} (qn {:.2}), last boundary {}, {} pulses received",
        snapshot.transport,
        snapshot.bpm,
        bar,
        beat,
        snapshot.position.quarter_notes,
        snapshot.last_fired_boundary,
        snapshot.incoming_pulse_count
    );
}

fn run_application_loop(controller: &SyncController) {
    log::info!("Application running. Type 'quit' to exit");
    println!(
        "Commands: start, stop, continue, bpm <n>, locate <qn>, \
         block-tempo on|off, block-sync on|off, status, quit"
    );

    let stdin = io::stdin();
    run_control_loop(stdin.lock(), controller, print_reply);

    if controller.transport_state() == TransportState::RunningMaster {
        controller.stop(true);
    }
    log::info!("Application exiting");
}

fn exit_with_error(error_msg: &str) -> ! {
    log::error!("{}", error_msg);
    eprintln!("{}", error_msg);
    process::exit(1);
}
