use barsyncrs::cli::{validate_device, Args};
use barsyncrs::{handle_device_list, Settings};
use clap::Parser;

#[cfg(feature = "test-mock")]
#[test]
fn test_device_list() {
    let devices = handle_device_list();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0], "Mock Device 1");
    assert_eq!(devices[1], "Mock Device 2");
}

#[cfg(feature = "test-mock")]
#[test]
fn test_valid_device_binding() {
    let devices = handle_device_list();
    assert!(validate_device("Mock Device 1", &devices).is_ok());
}

#[test]
fn test_invalid_device_binding() {
    let devices = vec!["Mock Device 1".to_string(), "Mock Device 2".to_string()];
    let err = validate_device("Nonexistent Device", &devices).unwrap_err();
    assert!(err.contains("Nonexistent Device"));
    assert!(err.contains("  - Mock Device 2"));
}

#[test]
fn test_device_list_never_panics() {
    // Without devices (or a MIDI backend) the list is simply empty
    let _ = handle_device_list();
}

#[test]
fn test_args_with_devices() {
    let args = Args::parse_from([
        "barsyncrs",
        "--input-device",
        "Mock Device 1",
        "--output-device",
        "Mock Device 2",
    ]);
    assert_eq!(args.input_device, Some("Mock Device 1".to_string()));
    assert_eq!(args.output_device, Some("Mock Device 2".to_string()));
    assert!(!args.device_list);
    assert!(!args.pick_ports);
}

#[test]
fn test_args_without_devices() {
    let args = Args::parse_from(["barsyncrs", "--device-list"]);
    assert_eq!(args.input_device, None);
    assert!(args.device_list);
}

#[test]
fn test_args_override_settings() {
    let args = Args::parse_from(["barsyncrs", "--bpm", "132", "--master", "--test-marker"]);
    let mut settings = Settings::default();
    settings.apply_args(&args);
    assert_eq!(settings.bpm, 132.0);
    assert!(settings.master);
    assert!(args.test_marker);
    assert!(settings.validate().is_ok());
}

#[test]
fn test_out_of_range_bpm_fails_validation() {
    let args = Args::parse_from(["barsyncrs", "--bpm", "400"]);
    let mut settings = Settings::default();
    settings.apply_args(&args);
    assert!(settings.validate().is_err());
}
