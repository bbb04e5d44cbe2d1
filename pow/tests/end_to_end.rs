use tritium_pow::{
    testing::{random_transaction, zero_transaction, SimBus, SimDevice, SimPins},
    transaction, Config, Driver, Error,
};

fn trytes(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap()
}

#[test]
fn zero_transaction_gives_the_same_nonce_every_run() {
    let nonces: Vec<String> = (0..3)
        .map(|_| {
            let bus = SimBus::new(1).with_result(44, 1);
            let mut driver = Driver::direct(bus, SimPins::configured(), Config::default());
            driver.init().unwrap();
            driver.do_pow(&trytes(zero_transaction()), 1).unwrap()
        })
        .collect();
    assert!(nonces.iter().all(|nonce| nonce == "PIDIVER999999999UGKMMMMMMMM"));
}

#[test]
fn both_transports_agree() {
    let transaction = trytes(random_transaction());

    let bus = SimBus::new(1).with_result(44, 1);
    let mut direct = Driver::direct(bus, SimPins::configured(), Config::default());
    direct.init().unwrap();

    let sim = SimDevice::configured().with_result(42, 1, 1);
    let mut framed = Driver::framed(sim, Config::default());
    framed.init().unwrap();

    let nonce = direct.do_pow(&transaction, 14).unwrap();
    assert_eq!(framed.do_pow(&transaction, 14).unwrap(), nonce);

    let attached = transaction::attach_nonce(&transaction, &nonce).unwrap();
    assert_eq!(&attached[transaction::NONCE], nonce);
    assert_eq!(attached[..transaction::NONCE.start], transaction[..transaction::NONCE.start]);
}

#[test]
fn transfer_errors_are_resent() {
    let bus = SimBus::new(1).with_result(44, 1).with_bad_crcs(2);
    let mut driver = Driver::direct(bus, SimPins::configured(), Config::default());
    driver.init().unwrap();
    assert!(driver.do_pow(&trytes(zero_transaction()), 1).is_ok());

    let bus = SimBus::new(1).with_result(44, 1).with_bad_crcs(3);
    let mut driver = Driver::direct(bus, SimPins::configured(), Config::default());
    driver.init().unwrap();
    let err = driver.do_pow(&trytes(zero_transaction()), 1).unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }));
    assert!(err.is_transient());

    // without the check, corrupted transfers go unnoticed
    let config = Config {
        use_crc: false,
        ..Config::default()
    };
    let bus = SimBus::new(1).with_result(44, 1).with_bad_crcs(3);
    let mut driver = Driver::direct(bus, SimPins::configured(), config);
    driver.init().unwrap();
    assert!(driver.do_pow(&trytes(zero_transaction()), 1).is_ok());
}

#[test]
fn unconfigured_framed_device_without_image() {
    let config = Config {
        image: "/nonexistent/pidiver.rbf".into(),
        ..Config::default()
    };
    let mut driver = Driver::framed(SimDevice::new(), config);
    assert!(matches!(driver.init(), Err(Error::Io { .. })));
}
