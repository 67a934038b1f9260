//! Byte-exact vectors for the deterministic layers
//!
//! Any change here is a wire format break.

use crate::layer::*;
use crate::types::*;
use std::time::Duration;

fn encoded(layer: Layer) -> String {
    hex::encode(layer.to_bytes().unwrap())
}

#[test]
fn test_confirm_vector() {
    let layer = Layer::Confirm(Confirm::new(Id([0x11; ID_LEN]), 7));
    assert_eq!(
        encoded(layer),
        concat!("6366", "11111111111111111111111111111111", "07")
    );
}

#[test]
fn test_forward_v4_vector() {
    let layer = Layer::Forward(Forward::new("10.0.0.1:3455".parse().unwrap()));
    assert_eq!(
        encoded(layer),
        concat!("6677", "04", "0a000001", "000000000000000000000000", "7f0d")
    );
}

#[test]
fn test_reverse_v6_vector() {
    let layer = Layer::Reverse(Reverse::new("[::1]:1".parse().unwrap()));
    assert_eq!(
        encoded(layer),
        concat!("7276", "06", "00000000000000000000000000000001", "0100")
    );
}

#[test]
fn test_balance_vector() {
    let layer = Layer::Balance(Balance::new(
        Id([0x01; ID_LEN]),
        Id([0x02; ID_LEN]),
        1_000_000,
    ));
    assert_eq!(
        encoded(layer),
        concat!(
            "6261",
            "01010101010101010101010101010101",
            "02020202020202020202020202020202",
            "40420f0000000000"
        )
    );
}

#[test]
fn test_delay_vector() {
    let layer = Layer::Delay(Delay::new(Duration::from_millis(250)));
    assert_eq!(encoded(layer), concat!("646c", "fa00000000000000"));
}

#[test]
fn test_response_vector() {
    let layer = Layer::Response(Response::new(Id([0xaa; ID_LEN]), 80, 3, b"ok".to_vec()));
    assert_eq!(
        encoded(layer),
        concat!(
            "7273",
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "5000",
            "03",
            "02000000",
            "6f6b"
        )
    );
}

#[test]
fn test_nested_forward_diag_vector() {
    let mut layer = Layer::Forward(Forward::new("127.0.0.1:1".parse().unwrap()));
    layer.set_inner(Layer::Diag(Diag::new(Id([0xff; ID_LEN]))));
    assert_eq!(
        encoded(layer),
        concat!(
            "6677",
            "04",
            "7f000001",
            "000000000000000000000000",
            "0100",
            "6467",
            "ffffffffffffffffffffffffffffffff"
        )
    );
}

#[test]
fn test_fixed_lengths() {
    assert_eq!(Crypt::LEN, 54);
    assert_eq!(Forward::LEN, 21);
    assert_eq!(Reverse::LEN, 21);
    assert_eq!(Exit::LEN, 156);
    assert_eq!(Session::LEN, 67);
    assert_eq!(Balance::LEN, 42);
    assert_eq!(GetBalance::LEN, 166);
    assert_eq!(Confirm::LEN, 19);
    assert_eq!(Delay::LEN, 10);
    assert_eq!(Diag::LEN, 18);
    assert_eq!(HiddenService::LEN, 147);
    assert_eq!(IntroQuery::LEN, 50);
    assert_eq!(Response::LEN, 25);
    assert_eq!(REVERSE_HEADER_LEN, 225);
}
