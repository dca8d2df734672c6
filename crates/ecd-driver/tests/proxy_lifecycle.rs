//! Lifecycle-ordering and configuration-validation tests.
//!
//! None of these touch hardware: they stop at the validation layer that
//! runs before any sysfs access.

use ecd_driver::{Config, EcdError, EcdProxy};

fn demo_config() -> Config {
    Config {
        tmp_dir: std::env::temp_dir(),
        vivado: "/opt/Xilinx/Vivado/2023.1/bin/vivado".into(),
        pci_device: "10ee:7038".into(),
        master_programming_script: vec!["open_hw".into()],
        ecd_programming_script: vec!["open_hw".into()],
        axi_map: vec![
            ("master_revision".into(), 0x0000),
            ("irq_manager".into(), 0x0100),
            ("restart_manager".into(), 0x0200),
            ("data_control".into(), 0x0300),
            ("qsfp_status".into(), 0x0400),
        ],
        irq_count: 2,
    }
}

#[test]
fn unknown_axi_module_fails_init() {
    let mut config = demo_config();
    config.axi_map.push(("foo".into(), 0x1000));

    let mut proxy = EcdProxy::new(config);
    let err = proxy.init().unwrap_err();
    assert!(matches!(err, EcdError::InvalidConfig { .. }), "got {err}");
    assert!(err.to_string().contains("foo"));
}

#[test]
fn missing_axi_module_fails_init() {
    let mut config = demo_config();
    config.axi_map.retain(|(name, _)| name != "data_control");

    let mut proxy = EcdProxy::new(config);
    let err = proxy.init().unwrap_err();
    assert!(matches!(err, EcdError::InvalidConfig { .. }), "got {err}");
    assert!(err.to_string().contains("data_control"));
}

#[test]
fn malformed_pci_id_fails_init() {
    let mut config = demo_config();
    config.pci_device = "not-an-id".into();

    let mut proxy = EcdProxy::new(config);
    assert!(matches!(
        proxy.init().unwrap_err(),
        EcdError::InvalidConfig { .. }
    ));
}

#[test]
fn zero_irq_count_fails_init() {
    let mut config = demo_config();
    config.irq_count = 0;

    let mut proxy = EcdProxy::new(config);
    assert!(matches!(
        proxy.init().unwrap_err(),
        EcdError::InvalidConfig { .. }
    ));
}

#[test]
fn start_pci_before_init_is_invalid_state() {
    let mut proxy = EcdProxy::new(demo_config());
    assert!(matches!(
        proxy.start_pci().unwrap_err(),
        EcdError::InvalidState {
            operation: "start_pci",
            ..
        }
    ));
}

#[test]
fn prepare_data_transfer_before_start_pci_is_invalid_state() {
    let proxy = EcdProxy::new(demo_config());
    assert!(matches!(
        proxy
            .prepare_data_transfer(0x1_0000_0000, 0x1_4000_0000, 16)
            .unwrap_err(),
        EcdError::InvalidState { .. }
    ));
}

#[test]
fn bitstream_load_before_init_is_invalid_state() {
    let mut proxy = EcdProxy::new(demo_config());
    assert!(matches!(
        proxy.load_master_bitstream().unwrap_err(),
        EcdError::InvalidState { .. }
    ));
}

#[test]
fn version_queries_before_start_pci_are_invalid_state() {
    let proxy = EcdProxy::new(demo_config());
    assert!(matches!(
        proxy.master_version().unwrap_err(),
        EcdError::InvalidState { .. }
    ));
    assert!(matches!(
        proxy.master_date().unwrap_err(),
        EcdError::InvalidState { .. }
    ));
}

#[test]
fn init_twice_is_invalid_state() {
    let mut proxy = EcdProxy::new(demo_config());

    match proxy.init() {
        Err(EcdError::Permission { .. }) => {
            // Not root; the ordering check below still needs a first
            // successful init, so there is nothing more to assert here.
        }
        Ok(()) => {
            assert!(matches!(
                proxy.init().unwrap_err(),
                EcdError::InvalidState {
                    operation: "init",
                    ..
                }
            ));
        }
        Err(other) => panic!("unexpected init failure: {other}"),
    }
}
