// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The in-process driver registry. Drivers are statically compiled; the
//! `loadso` control command and the enumerator's driver-ID lookup both
//! resolve names here instead of dlopening shared objects.

use crate::drivers::abi::SlotDriver;
use crate::drivers::{bb4io, enumerator, out4};

/// One loadable driver: its user-visible name, the identity the FPGA
/// advertises for it (when FPGA-backed), and its constructor.
#[derive(Debug)]
pub struct DriverSpec {
    pub name: &'static str,
    pub driver_id: Option<u16>,
    pub build: fn() -> Box<dyn SlotDriver>,
}

/// Entry 0 is the enumerator; it is the first driver loaded unless slot 0
/// is overloaded by a board-specific driver.
pub static REGISTRY: &[DriverSpec] = &[
    DriverSpec {
        name: "enumerator",
        driver_id: None,
        build: enumerator::build,
    },
    DriverSpec {
        name: "bb4io",
        driver_id: Some(bb4io::DRIVER_ID),
        build: bb4io::build,
    },
    DriverSpec {
        name: "out4",
        driver_id: Some(out4::DRIVER_ID),
        build: out4::build,
    },
];

#[must_use]
pub fn enumerator_spec() -> &'static DriverSpec { &REGISTRY[0] }

#[must_use]
pub fn by_name(name: &str) -> Option<&'static DriverSpec> {
    REGISTRY.iter().find(|spec| spec.name == name)
}

#[must_use]
pub fn by_driver_id(driver_id: u16) -> Option<&'static DriverSpec> {
    REGISTRY
        .iter()
        .find(|spec| spec.driver_id == Some(driver_id))
}

#[cfg(test)]
mod tests_registry {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn names_resolve() {
        assert_eq!(by_name("out4").unwrap().name, "out4");
        assert_eq!(by_name("bb4io").unwrap().name, "bb4io");
        assert!(by_name("nonesuch").is_none());
    }

    #[test]
    fn driver_ids_resolve() {
        assert_eq!(by_driver_id(bb4io::DRIVER_ID).unwrap().name, "bb4io");
        assert!(by_driver_id(0xFFFF).is_none());
    }

    #[test]
    fn entry_zero_is_the_enumerator() {
        assert_eq!(enumerator_spec().name, "enumerator");
    }
}
